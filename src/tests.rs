use crate::config::Config;
use crate::error::Result;
use crate::formats::pdf::tests::{document, red_jpeg, text_document};
use crate::formats::{BookFormat, CoverBounds, CoverHandler, CoverService, EpubHandler};
use crate::library::cache::{CacheKey, DiskCache, modified_millis};
use crate::library::recent::{self, MetadataStore};
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgb, RgbImage};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// Package naming `front` by meta and `art` by property.
const PACKAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata>
    <meta name="cover" content="front"/>
  </metadata>
  <manifest>
    <item id="art" href="images/art.png" media-type="image/png" properties="cover-image"/>
    <item id="front" href="images/front%20page.png" media-type="image/png"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
</package>"#;

fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut data = Vec::new();
    PngEncoder::new(&mut data)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    data
}

fn write_epub(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// EPUB whose meta cover is green and whose `cover-image` item is blue.
fn sample_epub(dir: &Path) -> PathBuf {
    let path = dir.join("sample.epub");
    let front = png(600, 900, [0, 200, 0]);
    let art = png(40, 40, [0, 0, 200]);
    write_epub(
        &path,
        &[
            ("mimetype", b"application/epub+zip"),
            ("META-INF/container.xml", CONTAINER.as_bytes()),
            ("OEBPS/content.opf", PACKAGE.as_bytes()),
            ("OEBPS/images/front page.png", &front),
            ("OEBPS/images/art.png", &art),
        ],
    );
    path
}

struct CountingHandler {
    calls: AtomicUsize,
}

impl CountingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CoverHandler for CountingHandler {
    fn extract_cover(&self, path: &Path, bounds: CoverBounds) -> Result<Option<RgbImage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        EpubHandler.extract_cover(path, bounds)
    }
}

fn service(root: &Path) -> CoverService {
    CoverService::new(DiskCache::new(root.join("cache")))
}

#[test]
fn epub_meta_cover_wins_and_is_downsampled() {
    let dir = tempfile::tempdir().unwrap();
    let book = sample_epub(dir.path());

    let cover = service(dir.path())
        .get_or_extract_cover(&book, "epub", CoverBounds::new(300, 450))
        .unwrap();

    assert_eq!(cover.dimensions(), (300, 450));
    let Rgb([r, g, b]) = *cover.get_pixel(150, 225);
    assert!(g > 150 && r < 60 && b < 60, "expected green, got {:?}", (r, g, b));
}

#[test]
fn second_request_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let book = sample_epub(dir.path());
    let counter = CountingHandler::new();
    let covers = service(dir.path()).with_handler(BookFormat::Epub, counter.clone());

    let first = covers.get_or_extract_cover_default(&book, "epub").unwrap();
    assert_eq!(counter.calls(), 1);
    assert_eq!(covers.cache().entry_count(), 1);

    let second = covers.get_or_extract_cover_default(&book, "EPUB").unwrap();
    assert_eq!(counter.calls(), 1);
    assert_eq!(first.dimensions(), second.dimensions());

    let mtime = modified_millis(&std::fs::metadata(&book).unwrap());
    let absolute = std::path::absolute(&book).unwrap();
    assert!(covers.cache().entry_path(CacheKey::new(&absolute, mtime)).is_file());
}

#[test]
fn touching_the_book_extracts_again() {
    let dir = tempfile::tempdir().unwrap();
    let book = sample_epub(dir.path());
    let counter = CountingHandler::new();
    let covers = service(dir.path()).with_handler(BookFormat::Epub, counter.clone());

    assert!(covers.get_or_extract_cover_default(&book, "epub").is_some());

    let later = SystemTime::now() + Duration::from_secs(3600);
    File::options()
        .write(true)
        .open(&book)
        .unwrap()
        .set_modified(later)
        .unwrap();

    assert!(covers.get_or_extract_cover_default(&book, "epub").is_some());
    assert_eq!(counter.calls(), 2);
    assert_eq!(covers.cache().entry_count(), 2);
}

#[test]
fn heuristic_cover_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let book = dir.path().join("heuristic.epub");
    let package = r#"<package xmlns="http://www.idpf.org/2007/opf">
  <manifest>
    <item id="img1" href="Cover.PNG" media-type="image/png"/>
  </manifest>
</package>"#;
    let cover = png(20, 30, [200, 0, 0]);
    let container = CONTAINER.replace("OEBPS/content.opf", "content.opf");
    write_epub(
        &book,
        &[
            ("META-INF/container.xml", container.as_bytes()),
            ("content.opf", package.as_bytes()),
            ("Cover.PNG", &cover),
        ],
    );

    let image = service(dir.path())
        .get_or_extract_cover_default(&book, "epub")
        .unwrap();
    assert_eq!(image.dimensions(), (20, 30));
}

#[test]
fn broken_books_have_no_cover() {
    let dir = tempfile::tempdir().unwrap();
    let covers = service(dir.path());

    let empty = dir.path().join("empty.epub");
    std::fs::write(&empty, b"").unwrap();
    assert!(covers.get_or_extract_cover_default(&empty, "epub").is_none());

    let truncated = dir.path().join("truncated.epub");
    let full = std::fs::read(sample_epub(dir.path())).unwrap();
    std::fs::write(&truncated, &full[..full.len() / 2]).unwrap();
    assert!(covers.get_or_extract_cover_default(&truncated, "epub").is_none());

    let missing_entry = dir.path().join("missing.epub");
    write_epub(
        &missing_entry,
        &[
            ("META-INF/container.xml", CONTAINER.as_bytes()),
            ("OEBPS/content.opf", PACKAGE.as_bytes()),
        ],
    );
    assert!(covers.get_or_extract_cover_default(&missing_entry, "epub").is_none());

    let not_a_pdf = dir.path().join("fake.pdf");
    std::fs::write(&not_a_pdf, b"%PDF-1.4 nothing here").unwrap();
    assert!(covers.get_or_extract_cover_default(&not_a_pdf, "pdf").is_none());

    assert_eq!(covers.cache().entry_count(), 0);
}

#[test]
fn missing_file_and_unknown_type() {
    let dir = tempfile::tempdir().unwrap();
    let covers = service(dir.path());

    assert!(
        covers
            .get_or_extract_cover_default(&dir.path().join("nope.epub"), "epub")
            .is_none()
    );

    let book = sample_epub(dir.path());
    assert!(covers.get_or_extract_cover_default(&book, "mobi").is_none());
    assert!(covers.get_or_extract_cover_default(&book, "").is_none());
}

#[test]
fn pdf_first_page_through_service() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.pdf");
    let mut doc = document(600, 800, None, Some(red_jpeg(8, 8)));
    doc.save(&path).unwrap();

    let covers = service(dir.path());
    let cover = covers
        .get_or_extract_cover(&path, "pdf", CoverBounds::new(300, 450))
        .unwrap();

    assert_eq!(cover.dimensions(), (300, 400));
    assert_eq!(covers.cache().entry_count(), 1);
}

#[test]
fn text_only_pdf_never_caches_a_blank_page() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("novel.pdf");
    let mut doc = text_document();
    doc.save(&path).unwrap();

    let covers = service(dir.path());
    match covers.get_or_extract_cover(&path, "pdf", CoverBounds::new(300, 450)) {
        // Rasterized: the title and the filled rectangle must show.
        Some(cover) => {
            assert!(cover.pixels().any(|p| p != &Rgb([255, 255, 255])));
            assert_eq!(covers.cache().entry_count(), 1);
        }
        // Image-only fallback: nothing drawable, so nothing cached.
        None => assert_eq!(covers.cache().entry_count(), 0),
    }
}

#[tokio::test]
async fn shelf_pairs_books_with_covers() {
    let dir = tempfile::tempdir().unwrap();
    let book = sample_epub(dir.path());
    let book_path = book.to_string_lossy().to_string();

    let conn = recent::tests::metadata_db();
    let rows = [
        ("Sample", book_path.as_str(), Some("10/40"), 200, "epub"),
        ("Gone", "/nowhere/gone.pdf", None, 100, "pdf"),
        ("Older", "/nowhere/old.pdf", None, 50, "pdf"),
    ];
    for (title, path, progress, last_access, kind) in rows {
        recent::tests::insert(
            &conn,
            Some(title),
            Some(path),
            progress,
            Some(last_access),
            Some(kind),
        );
    }
    let store = MetadataStore::from_connection(conn);

    let covers = Arc::new(service(dir.path()));
    let shelf = recent::load_shelf(&store, covers, 2, CoverBounds::new(100, 150)).await;

    assert_eq!(shelf.len(), 2);
    assert_eq!(shelf[0].book.title, "Sample");
    assert_eq!(shelf[0].book.progress_percent, Some(25));
    assert_eq!(shelf[0].cover.as_ref().map(|c| c.dimensions()), Some((150, 225)));
    assert_eq!(shelf[1].book.title, "Gone");
    assert!(shelf[1].cover.is_none());
}

#[test]
fn config_file_drives_cover_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shelf-cover.toml");
    let root = dir.path().join("covers-root");
    std::fs::write(
        &path,
        format!(
            "[cache]\nroot = {:?}\njpeg_quality = 70\n\n\
             [covers]\nmax_width = 120\nmax_height = 180\n",
            root.to_string_lossy()
        ),
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.cache.root, root);
    assert_eq!(config.cache.jpeg_quality, 70);

    let cache = DiskCache::new(&config.cache.root).with_quality(config.cache.jpeg_quality);
    let covers = CoverService::new(cache);
    let book = sample_epub(dir.path());
    let cover = covers
        .get_or_extract_cover(&book, "epub", config.covers.bounds(None, None))
        .unwrap();

    assert_eq!(cover.dimensions(), (150, 225));
    assert!(root.join("covers").is_dir());
}
