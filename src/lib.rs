//! shelf-cover: book cover extraction and caching for a reading-focused launcher.
//!
//! Given a book file and its declared type, this crate produces a bounded
//! RGB thumbnail of its cover and keeps it in a disk cache keyed on the
//! file's path and modification time.
//!
//! # Features
//!
//! - EPUB covers located through the OPF package (meta, properties, heuristics)
//! - PDF first-page rendering through pdfium, with an image-only fallback
//! - Memory-bounded decoding through power-of-two subsampling
//! - Best-effort JPEG disk cache
//! - Recent-reading shelf, app list preferences and a cached weather summary

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration and CLI.
pub mod config;
/// Error types.
pub mod error;
/// Book format handlers.
pub mod formats;
/// Launcher data: cover cache, reading history, preferences, apps, weather.
pub mod library;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use error::{AppError, Result};
pub use formats::{BookFormat, CoverBounds, CoverOutcome, CoverService};
pub use library::cache::DiskCache;
