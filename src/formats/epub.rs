//! EPUB cover locator.

use crate::error::{AppError, Result};
use crate::formats::sampling::decode_sampled;
use crate::formats::{CoverBounds, CoverHandler};
use image::RgbImage;
use roxmltree::{Document, ParsingOptions};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use zip::ZipArchive;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Handler for EPUB files.
pub struct EpubHandler;

/// One `item` element of the package manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpubManifestEntry {
    /// Item id (empty when the attribute is missing).
    pub id: String,
    /// Item href, relative to the package document.
    pub href: String,
    /// Declared media type.
    pub media_type: String,
    /// Whether `properties` contains `cover-image`.
    pub is_declared_cover_image: bool,
}

/// Everything a single pass over the package document collects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageScan {
    /// Manifest id named by `<meta name="cover" content="...">`.
    pub meta_cover_id: Option<String>,
    /// Manifest items in document order.
    pub items: Vec<EpubManifestEntry>,
    /// Href of the last item declaring `properties="cover-image"`.
    pub cover_image_href: Option<String>,
}

impl PackageScan {
    /// Scan a package document.
    pub fn parse(content: &str) -> Result<Self> {
        let doc = parse_xml(content)?;
        let mut scan = PackageScan::default();

        for node in doc.descendants().filter(|n| n.is_element()) {
            match node.tag_name().name() {
                "meta" if node.attribute("name") == Some("cover") => {
                    scan.meta_cover_id = node.attribute("content").map(String::from);
                }
                "item" => {
                    let properties = node.attribute("properties").unwrap_or_default();
                    let entry = EpubManifestEntry {
                        id: node.attribute("id").unwrap_or_default().to_string(),
                        href: node.attribute("href").unwrap_or_default().to_string(),
                        media_type: node.attribute("media-type").unwrap_or_default().to_string(),
                        is_declared_cover_image: properties.contains("cover-image"),
                    };

                    if entry.is_declared_cover_image {
                        scan.cover_image_href = Some(entry.href.clone());
                    }
                    scan.items.push(entry);
                }
                _ => {}
            }
        }

        Ok(scan)
    }

    /// Manifest keyed by id: first position wins, last definition wins.
    fn manifest(&self) -> Vec<&EpubManifestEntry> {
        let mut unique: Vec<&EpubManifestEntry> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            match unique.iter().position(|seen| seen.id == item.id) {
                Some(pos) => unique[pos] = item,
                None => unique.push(item),
            }
        }
        unique
    }

    /// Pick the cover href.
    ///
    /// Priority: the item named by the cover `meta`, then an item declaring
    /// `cover-image`, then the first image item whose id or href mentions
    /// "cover".
    pub fn resolve_cover_href(&self) -> Option<&str> {
        let manifest = self.manifest();

        if let Some(id) = self.meta_cover_id.as_deref()
            && let Some(item) = manifest.iter().copied().find(|item| item.id == id)
        {
            return Some(&item.href);
        }

        if let Some(href) = self.cover_image_href.as_deref() {
            return Some(href);
        }

        manifest
            .into_iter()
            .find(|item| {
                item.media_type.starts_with("image/")
                    && (item.id.to_lowercase().contains("cover")
                        || item.href.to_lowercase().contains("cover"))
            })
            .map(|item| item.href.as_str())
    }
}

/// Resolve a manifest href against the package document's directory.
pub fn resolve_entry_path(package_path: &str, href: &str) -> Result<String> {
    let href = href.split('#').next().unwrap_or_default();
    let decoded = urlencoding::decode(href)
        .map_err(|e| AppError::InvalidFormat(format!("Bad href {:?}: {}", href, e)))?;

    let (base, relative) = match decoded.strip_prefix('/') {
        Some(rooted) => ("", rooted),
        None => (
            package_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(""),
            decoded.as_ref(),
        ),
    };

    if relative.is_empty() {
        return Err(AppError::InvalidFormat(format!("Empty href: {:?}", href)));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(relative.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(AppError::InvalidFormat(format!(
                        "Href escapes archive root: {}",
                        href
                    )));
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(AppError::InvalidFormat(format!("Href names a directory: {:?}", href)));
    }

    Ok(segments.join("/"))
}

fn parse_xml(content: &str) -> Result<Document<'_>> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };

    Ok(Document::parse_with_options(
        content.trim_start_matches('\u{feff}'),
        options,
    )?)
}

impl EpubHandler {
    /// Find the package document path from container.xml.
    pub fn find_package_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
        let content = read_entry_string(archive, CONTAINER_PATH)?;
        let doc = parse_xml(&content)?;

        doc.descendants()
            .find(|n| n.has_tag_name("rootfile"))
            .and_then(|n| n.attribute("full-path"))
            .map(String::from)
            .ok_or_else(|| AppError::InvalidFormat("No rootfile in container.xml".into()))
    }

    /// Locate the archive entry holding the cover image.
    pub fn locate_cover<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Option<String>> {
        let package_path = Self::find_package_path(archive)?;
        let package = read_entry_string(archive, &package_path)?;
        let scan = PackageScan::parse(&package)?;

        let Some(href) = scan.resolve_cover_href() else {
            return Ok(None);
        };

        resolve_entry_path(&package_path, href).map(Some)
    }

    /// Locate and decode the cover from an open archive.
    pub fn cover_from_archive<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        bounds: CoverBounds,
    ) -> Result<Option<RgbImage>> {
        let Some(entry) = Self::locate_cover(archive)? else {
            return Ok(None);
        };

        let mut data = Vec::new();
        archive.by_name(&entry)?.read_to_end(&mut data)?;

        decode_sampled(&data, bounds).map(Some)
    }
}

fn read_entry_string<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let mut content = String::new();
    archive.by_name(name)?.read_to_string(&mut content)?;
    Ok(content)
}

impl CoverHandler for EpubHandler {
    fn extract_cover(&self, path: &Path, bounds: CoverBounds) -> Result<Option<RgbImage>> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        Self::cover_from_archive(&mut archive, bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED_OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Mixed</dc:title>
    <meta name="cover" content="front"/>
  </metadata>
  <manifest>
    <item id="front" href="images/front.jpg" media-type="image/jpeg"/>
    <item id="art" href="images/art.png" media-type="image/png" properties="cover-image"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
</package>"#;

    #[test]
    fn scan_collects_meta_items_and_property() {
        let scan = PackageScan::parse(MIXED_OPF).unwrap();
        assert_eq!(scan.meta_cover_id.as_deref(), Some("front"));
        assert_eq!(scan.items.len(), 3);
        assert_eq!(scan.cover_image_href.as_deref(), Some("images/art.png"));
        assert!(scan.items[1].is_declared_cover_image);
        assert!(!scan.items[0].is_declared_cover_image);
    }

    #[test]
    fn meta_cover_beats_cover_image_property() {
        let scan = PackageScan::parse(MIXED_OPF).unwrap();
        assert_eq!(scan.resolve_cover_href(), Some("images/front.jpg"));
    }

    #[test]
    fn dangling_meta_falls_back_to_property() {
        let scan = PackageScan {
            meta_cover_id: Some("missing".into()),
            items: vec![EpubManifestEntry {
                id: "art".into(),
                href: "art.png".into(),
                media_type: "image/png".into(),
                is_declared_cover_image: true,
            }],
            cover_image_href: Some("art.png".into()),
        };
        assert_eq!(scan.resolve_cover_href(), Some("art.png"));
    }

    #[test]
    fn heuristic_match_on_id() {
        let opf = r#"<package><manifest>
            <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
            <item id="Cover-Thumb" href="img/t.jpg" media-type="image/jpeg"/>
            <item id="cover-page" href="cover.xhtml" media-type="application/xhtml+xml"/>
        </manifest></package>"#;
        let scan = PackageScan::parse(opf).unwrap();
        assert_eq!(scan.resolve_cover_href(), Some("img/t.jpg"));
    }

    #[test]
    fn heuristic_match_on_href() {
        let opf = r#"<package><manifest>
            <item id="img1" href="img/plain.jpg" media-type="image/jpeg"/>
            <item id="img2" href="img/MyCover.png" media-type="image/png"/>
        </manifest></package>"#;
        let scan = PackageScan::parse(opf).unwrap();
        assert_eq!(scan.resolve_cover_href(), Some("img/MyCover.png"));
    }

    #[test]
    fn no_cover_anywhere() {
        let opf = r#"<package><manifest>
            <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
            <item id="img1" href="img/figure.jpg" media-type="image/jpeg"/>
        </manifest></package>"#;
        let scan = PackageScan::parse(opf).unwrap();
        assert_eq!(scan.resolve_cover_href(), None);
    }

    #[test]
    fn duplicate_ids_keep_last_definition() {
        let opf = r#"<package><metadata><meta name="cover" content="c"/></metadata><manifest>
            <item id="c" href="old.jpg" media-type="image/jpeg"/>
            <item id="c" href="new.jpg" media-type="image/jpeg"/>
        </manifest></package>"#;
        let scan = PackageScan::parse(opf).unwrap();
        assert_eq!(scan.resolve_cover_href(), Some("new.jpg"));
    }

    #[test]
    fn malformed_package_is_an_error() {
        assert!(PackageScan::parse("<package><manifest>").is_err());
    }

    #[test]
    fn entry_path_resolution() {
        assert_eq!(
            resolve_entry_path("OEBPS/content.opf", "images/c.jpg").unwrap(),
            "OEBPS/images/c.jpg"
        );
        assert_eq!(resolve_entry_path("content.opf", "c.jpg").unwrap(), "c.jpg");
        assert_eq!(
            resolve_entry_path("OEBPS/Text/content.opf", "../Images/c.jpg").unwrap(),
            "OEBPS/Images/c.jpg"
        );
        assert_eq!(
            resolve_entry_path("OEBPS/content.opf", "./my%20cover.jpg").unwrap(),
            "OEBPS/my cover.jpg"
        );
        assert_eq!(resolve_entry_path("OEBPS/content.opf", "/root.jpg").unwrap(), "root.jpg");
    }

    #[test]
    fn entry_path_escaping_root_is_malformed() {
        assert!(resolve_entry_path("content.opf", "../c.jpg").is_err());
        assert!(resolve_entry_path("OEBPS/content.opf", "").is_err());
    }
}
