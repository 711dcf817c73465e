//! On-disk cover cache.
//!
//! Covers are stored as `<root>/covers/<hash>.jpg`, where the hash is taken
//! over the book's absolute path and modification time. Touching the book
//! therefore produces a new key; stale entries are left for whoever clears
//! the cache directory.

use crate::error::Result;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use std::fs::{self, Metadata};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;

/// Subdirectory of the cache root holding covers.
pub const COVERS_DIR: &str = "covers";

/// Default JPEG quality for cached covers.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Modification time in milliseconds since the Unix epoch, 0 when unknown.
pub fn modified_millis(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// 32-bit polynomial string hash (`h = 31 * h + unit` over UTF-16 units).
fn string_hash(s: &str) -> u32 {
    s.encode_utf16()
        .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(u32::from(unit)))
}

/// Cache file name derived from a book's path and modification time.
///
/// The hash space is 32 bits; two books colliding simply share a slot and
/// the later store wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u32);

impl CacheKey {
    /// Derive the key for `path` last modified at `mtime_millis`.
    pub fn new(path: &Path, mtime_millis: i64) -> Self {
        let key = format!("{}:{}", path.to_string_lossy(), mtime_millis);
        CacheKey(string_hash(&key))
    }

    /// Hex token used as the file stem.
    pub fn token(&self) -> String {
        format!("{:x}", self.0)
    }

    /// File name inside the covers directory.
    pub fn file_name(&self) -> String {
        format!("{}.jpg", self.token())
    }
}

/// Best-effort cover cache in a single flat directory.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    quality: u8,
}

impl DiskCache {
    /// Cache under `<cache_root>/covers`. The directory is created on first store.
    pub fn new(cache_root: impl AsRef<Path>) -> Self {
        Self {
            dir: cache_root.as_ref().join(COVERS_DIR),
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Override the JPEG quality (clamped to 1..=100).
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Directory holding the cached covers.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the cache file for a key.
    pub fn entry_path(&self, key: CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Cached cover for `path` at `mtime`, if present and decodable.
    pub fn lookup(&self, path: &Path, mtime: i64) -> Option<RgbImage> {
        let entry = self.entry_path(CacheKey::new(path, mtime));
        if !entry.is_file() {
            return None;
        }

        match image::open(&entry) {
            Ok(img) => {
                tracing::trace!(entry = %entry.display(), "Cover cache hit");
                Some(img.into_rgb8())
            }
            Err(e) => {
                tracing::debug!(
                    entry = %entry.display(),
                    error = %e,
                    "Unreadable cache entry, treating as miss"
                );
                None
            }
        }
    }

    /// Encode and write a cover, returning the written path.
    pub fn try_store(&self, path: &Path, mtime: i64, image: &RgbImage) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let entry = self.entry_path(CacheKey::new(path, mtime));

        let mut staged = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(staged.as_file_mut());
            JpegEncoder::new_with_quality(&mut writer, self.quality).encode_image(image)?;
            writer.flush()?;
        }
        // Readers see either the previous entry or the complete new one.
        staged.persist(&entry).map_err(|e| e.error)?;

        Ok(entry)
    }

    /// Write a cover, ignoring failures.
    pub fn store(&self, path: &Path, mtime: i64, image: &RgbImage) {
        if let Err(e) = self.try_store(path, mtime, image) {
            tracing::debug!(path = %path.display(), error = %e, "Failed to cache cover");
        }
    }

    /// Number of cached covers.
    pub fn entry_count(&self) -> usize {
        self.cached_files().map(|files| files.len()).unwrap_or(0)
    }

    /// Delete every cached cover, returning how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let files = self.cached_files()?;
        for file in &files {
            fs::remove_file(file)?;
        }
        Ok(files.len())
    }

    fn cached_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "jpg") {
                files.push(path);
            }
        }
        Ok(files)
    }
}
