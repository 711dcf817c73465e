//! Persisted launcher preferences.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Last weather reading kept between launches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedWeather {
    /// Temperature in degrees Fahrenheit.
    pub temperature: f32,
    /// WMO weather code.
    pub code: i32,
    /// Fetch time, milliseconds since the Unix epoch.
    pub fetched_at: i64,
}

/// A geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f32,
    /// Longitude in degrees.
    pub longitude: f32,
}

/// Launcher preferences persisted as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Whether the launcher has not completed its first run yet.
    #[serde(default = "default_first_run")]
    pub first_run: bool,

    /// Packages hidden from the app list.
    #[serde(default)]
    pub hidden_apps: BTreeSet<String>,

    /// Custom labels by package name.
    #[serde(default)]
    pub renamed_apps: BTreeMap<String, String>,

    /// Last weather reading.
    #[serde(default)]
    pub weather: Option<CachedWeather>,

    /// Last known location.
    #[serde(default)]
    pub location: Option<Location>,
}

fn default_first_run() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            first_run: default_first_run(),
            hidden_apps: BTreeSet::new(),
            renamed_apps: BTreeMap::new(),
            weather: None,
            location: None,
        }
    }
}

impl Preferences {
    /// Hide a package from the app list.
    pub fn hide_app(&mut self, package: &str) {
        self.hidden_apps.insert(package.to_string());
    }

    /// Show a previously hidden package.
    pub fn unhide_app(&mut self, package: &str) {
        self.hidden_apps.remove(package);
    }

    /// Give a package a custom label.
    pub fn rename_app(&mut self, package: &str, name: &str) {
        self.renamed_apps.insert(package.to_string(), name.to_string());
    }

    /// Drop a package's custom label.
    pub fn reset_app_name(&mut self, package: &str) {
        self.renamed_apps.remove(package);
    }

    /// Mark the first run as done.
    pub fn complete_first_run(&mut self) {
        self.first_run = false;
    }
}

/// File-backed preference storage.
#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
}

impl PreferencesStore {
    /// Store backed by the TOML file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load preferences; a missing or unreadable file yields defaults.
    pub fn load(&self) -> Preferences {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Preferences::default(),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Cannot read preferences, using defaults"
                );
                return Preferences::default();
            }
        };

        toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Invalid preferences file, using defaults"
            );
            Preferences::default()
        })
    }

    /// Write preferences, creating parent directories if needed.
    pub fn save(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(prefs)
            .map_err(|e| AppError::Config(format!("Failed to serialize preferences: {}", e)))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Load, modify, and save in one step.
    pub fn update<F>(&self, change: F) -> Result<Preferences>
    where
        F: FnOnce(&mut Preferences),
    {
        let mut prefs = self.load();
        change(&mut prefs);
        self.save(&prefs)?;
        Ok(prefs)
    }
}
