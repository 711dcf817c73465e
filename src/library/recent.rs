//! Recently read books and the home shelf.
//!
//! Reading history comes from the reader app's metadata database, a SQLite
//! file with a `Metadata` table. This module only reads it.

use crate::error::Result;
use crate::formats::{CoverBounds, CoverService};
use chrono::{DateTime, Utc};
use image::RgbImage;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Default number of books on the shelf.
pub const DEFAULT_RECENT_LIMIT: usize = 2;

/// A book from the reading history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentBook {
    /// Book title.
    pub title: String,
    /// Absolute path to the book file.
    pub file_path: String,
    /// Type string as stored by the reader ("epub", "pdf", ...).
    pub file_type: String,
    /// Reading progress in percent, when known.
    pub progress_percent: Option<u32>,
    /// Last access, milliseconds since the Unix epoch.
    pub last_access: i64,
}

impl RecentBook {
    /// Last access as a UTC timestamp.
    pub fn last_access_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.last_access)
    }
}

/// Parse a `"current/total"` progress string into a percentage.
pub fn parse_progress(raw: Option<&str>) -> Option<u32> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    let (current, total) = raw.split_once('/')?;
    if total.contains('/') {
        return None;
    }

    let current: i64 = current.trim().parse().ok()?;
    let total: i64 = total.trim().parse().ok()?;
    // A negative position shows no progress instead of a negative percentage.
    if total <= 0 || current < 0 {
        return None;
    }

    u32::try_from(current * 100 / total).ok()
}

/// Read-only view of the reader app's metadata database.
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Open the database at `path` without write access.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Most recently opened books, newest first.
    ///
    /// Rows without a file path are skipped and do not count towards `limit`.
    pub fn recent_books(&self, limit: usize) -> Result<Vec<RecentBook>> {
        let mut stmt = self.conn.prepare(
            "SELECT title, nativeAbsolutePath, progress, lastAccess, type
             FROM Metadata
             WHERE lastAccess IS NOT NULL
             ORDER BY lastAccess DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let path: Option<String> = row.get(1)?;
            let progress: Option<String> = row.get(2)?;
            Ok(path.map(|file_path| RecentBook {
                title: row
                    .get::<_, Option<String>>(0)
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "Unknown".to_string()),
                file_path,
                file_type: row
                    .get::<_, Option<String>>(4)
                    .ok()
                    .flatten()
                    .unwrap_or_default(),
                progress_percent: parse_progress(progress.as_deref()),
                last_access: row.get::<_, Option<i64>>(3).ok().flatten().unwrap_or(0),
            }))
        })?;

        let mut books = Vec::with_capacity(limit);
        for row in rows {
            if books.len() >= limit {
                break;
            }
            if let Some(book) = row? {
                books.push(book);
            }
        }

        Ok(books)
    }
}

/// A shelf slot: the book and its cover, if one could be produced.
#[derive(Debug, Clone)]
pub struct ShelfEntry {
    /// The book.
    pub book: RecentBook,
    /// Extracted or cached cover.
    pub cover: Option<RgbImage>,
}

/// Recent books, or an empty list when the history cannot be read.
pub fn recent_or_empty(store: &MetadataStore, limit: usize) -> Vec<RecentBook> {
    match store.recent_books(limit) {
        Ok(books) => books,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read reading history");
            Vec::new()
        }
    }
}

/// Fetch covers for `books` on blocking workers, keeping the input order.
pub async fn attach_covers(
    books: Vec<RecentBook>,
    covers: Arc<CoverService>,
    bounds: CoverBounds,
) -> Vec<ShelfEntry> {
    let tasks: Vec<_> = books
        .into_iter()
        .map(|book| {
            let covers = Arc::clone(&covers);
            tokio::task::spawn_blocking(move || {
                let cover = covers.get_or_extract_cover(
                    Path::new(&book.file_path),
                    &book.file_type,
                    bounds,
                );
                ShelfEntry { book, cover }
            })
        })
        .collect();

    let mut shelf = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(entry) => shelf.push(entry),
            Err(e) => tracing::warn!(error = %e, "Cover worker failed"),
        }
    }

    shelf
}

/// Build the home shelf from the reading history.
pub async fn load_shelf(
    store: &MetadataStore,
    covers: Arc<CoverService>,
    limit: usize,
    bounds: CoverBounds,
) -> Vec<ShelfEntry> {
    let books = recent_or_empty(store, limit);
    tracing::debug!(count = books.len(), "Loading shelf");
    attach_covers(books, covers, bounds).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn metadata_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Metadata (
                 title TEXT,
                 nativeAbsolutePath TEXT,
                 progress TEXT,
                 lastAccess INTEGER,
                 type TEXT
             );",
        )
        .unwrap();
        conn
    }

    pub(crate) fn insert(
        conn: &Connection,
        title: Option<&str>,
        path: Option<&str>,
        progress: Option<&str>,
        last_access: Option<i64>,
        kind: Option<&str>,
    ) {
        conn.execute(
            "INSERT INTO Metadata (title, nativeAbsolutePath, progress, lastAccess, type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![title, path, progress, last_access, kind],
        )
        .unwrap();
    }

    #[test]
    fn progress_parsing() {
        assert_eq!(parse_progress(Some("45/100")), Some(45));
        assert_eq!(parse_progress(Some(" 1 / 3 ")), Some(33));
        assert_eq!(parse_progress(Some("300/300")), Some(100));
        assert_eq!(parse_progress(Some("5/0")), None);
        assert_eq!(parse_progress(Some("5/-2")), None);
        assert_eq!(parse_progress(Some("-1/10")), None);
        assert_eq!(parse_progress(Some("1/2/3")), None);
        assert_eq!(parse_progress(Some("half")), None);
        assert_eq!(parse_progress(Some("  ")), None);
        assert_eq!(parse_progress(None), None);
    }

    #[test]
    fn negative_position_shows_no_progress() {
        assert_eq!(parse_progress(Some("-1/10")), None);
        assert_eq!(parse_progress(Some("-250/10")), None);
        assert_eq!(parse_progress(Some("-0/10")), Some(0));
    }

    #[test]
    fn recent_books_newest_first() {
        let conn = metadata_db();
        insert(&conn, Some("Old"), Some("/b/old.epub"), Some("1/2"), Some(100), Some("epub"));
        insert(&conn, Some("New"), Some("/b/new.pdf"), None, Some(300), Some("pdf"));
        insert(&conn, Some("Mid"), Some("/b/mid.epub"), Some("3/4"), Some(200), Some("epub"));
        insert(&conn, Some("Never"), Some("/b/never.epub"), None, None, Some("epub"));

        let store = MetadataStore::from_connection(conn);
        let books = store.recent_books(10).unwrap();
        let titles: Vec<_> = books.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, ["New", "Mid", "Old"]);
        assert_eq!(books[1].progress_percent, Some(75));
        assert_eq!(books[0].progress_percent, None);
        assert_eq!(books[0].last_access_time().unwrap().timestamp_millis(), 300);
    }

    #[test]
    fn rows_without_path_are_skipped_before_limit() {
        let conn = metadata_db();
        insert(&conn, Some("Ghost"), None, None, Some(500), Some("epub"));
        insert(&conn, None, Some("/b/a.epub"), None, Some(400), None);
        insert(&conn, Some("B"), Some("/b/b.pdf"), None, Some(300), Some("pdf"));
        insert(&conn, Some("C"), Some("/b/c.pdf"), None, Some(200), Some("pdf"));

        let store = MetadataStore::from_connection(conn);
        let books = store.recent_books(DEFAULT_RECENT_LIMIT).unwrap();
        assert_eq!(books.len(), 2);
        assert_eq!(books[0].title, "Unknown");
        assert_eq!(books[0].file_type, "");
        assert_eq!(books[1].title, "B");
    }

    #[test]
    fn missing_table_reads_as_empty_shelf() {
        let store = MetadataStore::from_connection(Connection::open_in_memory().unwrap());
        assert!(store.recent_books(2).is_err());
        assert!(recent_or_empty(&store, 2).is_empty());
    }
}
