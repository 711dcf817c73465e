//! Launcher application list.
//!
//! Enumerating installed applications is the platform's job; this module
//! takes what the platform reports and applies the user's hide/rename
//! choices.

use crate::library::prefs::Preferences;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// An application the platform reports as launchable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchableApp {
    /// Package name.
    pub package_name: String,
    /// Label provided by the application.
    pub label: String,
    /// Explicit activity to launch, when the package has no default entry point.
    #[serde(default)]
    pub activity_name: Option<String>,
}

/// One row of the launcher's app list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    /// Package name.
    pub package_name: String,
    /// Label provided by the application.
    pub system_name: String,
    /// Label chosen by the user.
    pub custom_name: Option<String>,
    /// Whether the user hid this app.
    pub is_hidden: bool,
    /// Activity to launch (empty for the package default).
    pub activity_name: String,
}

impl AppEntry {
    /// Label shown in the list.
    pub fn display_name(&self) -> &str {
        self.custom_name.as_deref().unwrap_or(&self.system_name)
    }

    /// Case-insensitive sort key.
    pub fn sort_key(&self) -> String {
        self.display_name().to_lowercase()
    }
}

impl Ord for AppEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key()
            .cmp(&other.sort_key())
            .then_with(|| self.package_name.cmp(&other.package_name))
    }
}

impl PartialOrd for AppEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merge platform apps with preferences into a sorted list.
///
/// The first report of a package wins; later duplicates are ignored.
pub fn build_app_list(apps: &[LaunchableApp], prefs: &Preferences) -> Vec<AppEntry> {
    let mut seen = HashSet::new();
    let mut entries: Vec<AppEntry> = apps
        .iter()
        .filter(|app| seen.insert(app.package_name.as_str()))
        .map(|app| AppEntry {
            package_name: app.package_name.clone(),
            system_name: app.label.clone(),
            custom_name: prefs.renamed_apps.get(&app.package_name).cloned(),
            is_hidden: prefs.hidden_apps.contains(&app.package_name),
            activity_name: app.activity_name.clone().unwrap_or_default(),
        })
        .collect();

    entries.sort();
    entries
}

/// Entries shown on the home screen.
pub fn visible_apps(entries: &[AppEntry]) -> Vec<&AppEntry> {
    entries.iter().filter(|e| !e.is_hidden).collect()
}

/// Entries the user has hidden.
pub fn hidden_apps(entries: &[AppEntry]) -> Vec<&AppEntry> {
    entries.iter().filter(|e| e.is_hidden).collect()
}
