mod epub;
mod outcome;
pub(crate) mod pdf;
pub mod sampling;

pub use epub::{EpubHandler, EpubManifestEntry, PackageScan, resolve_entry_path};
pub use outcome::CoverOutcome;
pub use pdf::{PdfHandler, fit_page};

use crate::error::Result;
use crate::library::cache::{DiskCache, modified_millis};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Default cover width in pixels.
pub const DEFAULT_MAX_WIDTH: u32 = 300;

/// Default cover height in pixels.
pub const DEFAULT_MAX_HEIGHT: u32 = 450;

/// Book formats a cover can be extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    /// EPUB format (Electronic Publication).
    Epub,
    /// PDF format (Portable Document Format).
    Pdf,
    /// Anything else; never has a cover.
    Other,
}

impl BookFormat {
    /// Map the type string reported by the reader app.
    pub fn from_declared(declared: &str) -> Self {
        match declared.trim().to_lowercase().as_str() {
            "epub" => BookFormat::Epub,
            "pdf" => BookFormat::Pdf,
            _ => BookFormat::Other,
        }
    }

    /// Try to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "epub" => Some(BookFormat::Epub),
            "pdf" => Some(BookFormat::Pdf),
            _ => None,
        }
    }

    /// Lowercase name, as used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Pdf => "pdf",
            BookFormat::Other => "other",
        }
    }
}

/// Bounding box a cover must fit in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverBounds {
    /// Maximum width in pixels.
    pub max_width: u32,
    /// Maximum height in pixels.
    pub max_height: u32,
}

impl CoverBounds {
    /// Create bounds; zero dimensions are raised to one pixel.
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width: max_width.max(1),
            max_height: max_height.max(1),
        }
    }
}

impl Default for CoverBounds {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WIDTH, DEFAULT_MAX_HEIGHT)
    }
}

/// Trait for format-specific cover extractors.
pub trait CoverHandler: Send + Sync {
    /// Extract a cover bounded by `bounds`, or `None` when the book has none.
    fn extract_cover(&self, path: &Path, bounds: CoverBounds) -> Result<Option<RgbImage>>;
}

/// Get the appropriate handler for a book format.
pub fn get_handler(format: BookFormat) -> Arc<dyn CoverHandler> {
    match format {
        BookFormat::Epub => Arc::new(EpubHandler),
        BookFormat::Pdf => Arc::new(PdfHandler),
        BookFormat::Other => Arc::new(MinimalHandler),
    }
}

/// Handler for formats without cover art.
struct MinimalHandler;

impl CoverHandler for MinimalHandler {
    fn extract_cover(&self, _path: &Path, _bounds: CoverBounds) -> Result<Option<RgbImage>> {
        Ok(None)
    }
}

/// Cover lookup backed by the on-disk cache.
///
/// Every call is synchronous and does blocking file and decode work, so
/// callers on an interactive thread should dispatch it to a worker
/// (see [`crate::library::recent::attach_covers`]).
pub struct CoverService {
    cache: DiskCache,
    handlers: HashMap<BookFormat, Arc<dyn CoverHandler>>,
}

impl CoverService {
    /// Create a service with the built-in EPUB and PDF handlers.
    pub fn new(cache: DiskCache) -> Self {
        let handlers = [BookFormat::Epub, BookFormat::Pdf, BookFormat::Other]
            .into_iter()
            .map(|format| (format, get_handler(format)))
            .collect();

        Self { cache, handlers }
    }

    /// Replace the handler used for `format`.
    pub fn with_handler(mut self, format: BookFormat, handler: Arc<dyn CoverHandler>) -> Self {
        self.handlers.insert(format, handler);
        self
    }

    /// The cache this service reads and populates.
    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Run the extractor for `format` without touching the cache.
    pub fn extract(&self, path: &Path, format: BookFormat, bounds: CoverBounds) -> CoverOutcome {
        let Some(handler) = self.handlers.get(&format) else {
            return CoverOutcome::NotFound;
        };

        CoverOutcome::from_result(handler.extract_cover(path, bounds))
    }

    /// Return the cover for a book, extracting and caching it on a miss.
    ///
    /// Never fails: a missing file, an unknown type, or any extraction error
    /// all come back as `None`.
    pub fn get_or_extract_cover(
        &self,
        path: &Path,
        declared_type: &str,
        bounds: CoverBounds,
    ) -> Option<RgbImage> {
        let Ok(metadata) = std::fs::metadata(path) else {
            tracing::debug!(path = %path.display(), "Book file missing, no cover");
            return None;
        };

        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mtime = modified_millis(&metadata);

        if let Some(cached) = self.cache.lookup(&absolute, mtime) {
            return Some(cached);
        }

        let format = BookFormat::from_declared(declared_type);
        match self.extract(&absolute, format, bounds) {
            CoverOutcome::Found(image) => {
                self.cache.store(&absolute, mtime, &image);
                Some(image)
            }
            CoverOutcome::NotFound => {
                tracing::debug!(
                    path = %absolute.display(),
                    format = format.as_str(),
                    "No cover in book"
                );
                None
            }
            CoverOutcome::Failed(e) => {
                tracing::debug!(path = %absolute.display(), error = %e, "Cover extraction failed");
                None
            }
        }
    }

    /// [`Self::get_or_extract_cover`] with the default 300x450 bounds.
    pub fn get_or_extract_cover_default(
        &self,
        path: &Path,
        declared_type: &str,
    ) -> Option<RgbImage> {
        self.get_or_extract_cover(path, declared_type, CoverBounds::default())
    }
}
