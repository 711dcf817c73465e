/// Launcher application list.
pub mod apps;
/// On-disk cover cache.
pub mod cache;
/// Persisted launcher preferences.
pub mod prefs;
/// Recently read books and the home shelf.
pub mod recent;
/// Cached weather summary.
pub mod weather;
