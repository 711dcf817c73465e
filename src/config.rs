use crate::formats::{CoverBounds, DEFAULT_MAX_HEIGHT, DEFAULT_MAX_WIDTH};
use crate::library::cache::DEFAULT_JPEG_QUALITY;
use crate::library::prefs::Location;
use crate::library::recent::DEFAULT_RECENT_LIMIT;
use crate::library::weather::DEFAULT_LOCATION;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Book cover extraction and caching for a reading-focused launcher.
#[derive(Parser, Debug, Clone)]
#[command(name = "shelf-cover")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "SHELF_COVER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Write a default config file.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },

    /// Extract (or fetch from cache) the cover of one book.
    Cover {
        /// Path to the book file.
        path: PathBuf,

        /// Declared type ("epub", "pdf"); guessed from the extension when omitted.
        #[arg(short = 't', long = "type")]
        kind: Option<String>,

        /// Maximum cover width in pixels.
        #[arg(long)]
        max_width: Option<u32>,

        /// Maximum cover height in pixels.
        #[arg(long)]
        max_height: Option<u32>,

        /// Write the cover to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the recently read books with their covers.
    Shelf {
        /// Reader metadata database.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Number of books to show.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Save each cover into this directory.
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },

    /// Cover cache maintenance.
    Cache {
        /// Cache subcommand action.
        #[command(subcommand)]
        action: CacheCommand,
    },

    /// Launcher app list management.
    Apps {
        /// Apps subcommand action.
        #[command(subcommand)]
        action: AppsCommand,
    },

    /// Show the current weather summary.
    Weather {
        /// Latitude of the current position.
        #[arg(long, requires = "lon", allow_negative_numbers = true)]
        lat: Option<f32>,

        /// Longitude of the current position.
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lon: Option<f32>,

        /// Fetch even if the cached reading is fresh.
        #[arg(long)]
        refresh: bool,
    },
}

/// Cache subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// Delete every cached cover.
    Clear,

    /// Show cache location and size.
    Stats,
}

/// App list subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum AppsCommand {
    /// List apps from a JSON inventory of launchable apps.
    List {
        /// JSON file with `package_name`, `label`, optional `activity_name`.
        inventory: PathBuf,

        /// Include hidden apps.
        #[arg(long)]
        all: bool,
    },

    /// Hide an app.
    Hide {
        /// Package name.
        package: String,
    },

    /// Show a hidden app again.
    Show {
        /// Package name.
        package: String,
    },

    /// Give an app a custom label.
    Rename {
        /// Package name.
        package: String,
        /// New label.
        name: String,
    },

    /// Restore an app's original label.
    Reset {
        /// Package name.
        package: String,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Cover size configuration.
    #[serde(default)]
    pub covers: CoversConfig,

    /// Reading history configuration.
    #[serde(default)]
    pub library: LibraryConfig,

    /// Preferences configuration.
    #[serde(default)]
    pub preferences: PreferencesConfig,

    /// Weather configuration.
    #[serde(default)]
    pub weather: WeatherConfig,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root; covers live in its `covers/` subdirectory.
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,

    /// JPEG quality of cached covers.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .map(|p| p.join("shelf-cover"))
        .unwrap_or_else(|| PathBuf::from("data/cache"))
}

fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

/// Cover size configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoversConfig {
    /// Maximum cover width in pixels.
    #[serde(default = "default_max_width")]
    pub max_width: u32,

    /// Maximum cover height in pixels.
    #[serde(default = "default_max_height")]
    pub max_height: u32,
}

impl Default for CoversConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            max_height: default_max_height(),
        }
    }
}

impl CoversConfig {
    /// Bounds with optional per-call overrides.
    pub fn bounds(&self, max_width: Option<u32>, max_height: Option<u32>) -> CoverBounds {
        CoverBounds::new(
            max_width.unwrap_or(self.max_width),
            max_height.unwrap_or(self.max_height),
        )
    }
}

fn default_max_width() -> u32 {
    DEFAULT_MAX_WIDTH
}

fn default_max_height() -> u32 {
    DEFAULT_MAX_HEIGHT
}

/// Reading history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Reader app metadata database.
    #[serde(default = "default_metadata_db")]
    pub metadata_db: PathBuf,

    /// Books shown on the shelf.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            metadata_db: default_metadata_db(),
            recent_limit: default_recent_limit(),
        }
    }
}

fn default_metadata_db() -> PathBuf {
    PathBuf::from("data/metadata.db")
}

fn default_recent_limit() -> usize {
    DEFAULT_RECENT_LIMIT
}

/// Preferences configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferencesConfig {
    /// Preferences file.
    #[serde(default = "default_preferences_path")]
    pub path: PathBuf,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            path: default_preferences_path(),
        }
    }
}

fn default_preferences_path() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("shelf-cover").join("preferences.toml"))
        .unwrap_or_else(|| PathBuf::from("data/preferences.toml"))
}

/// Weather configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Fallback latitude.
    #[serde(default = "default_latitude")]
    pub latitude: f32,

    /// Fallback longitude.
    #[serde(default = "default_longitude")]
    pub longitude: f32,

    /// Minutes before a reading is refreshed.
    #[serde(default = "default_stale_minutes")]
    pub stale_minutes: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            latitude: default_latitude(),
            longitude: default_longitude(),
            stale_minutes: default_stale_minutes(),
        }
    }
}

impl WeatherConfig {
    /// Fallback location.
    pub fn location(&self) -> Location {
        Location {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Staleness threshold.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_minutes * 60)
    }
}

fn default_latitude() -> f32 {
    DEFAULT_LOCATION.latitude
}

fn default_longitude() -> f32 {
    DEFAULT_LOCATION.longitude
}

fn default_stale_minutes() -> u64 {
    120
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("shelf-cover.toml"),
            dirs::config_dir()
                .map(|p| p.join("shelf-cover").join("config.toml"))
                .unwrap_or_default(),
        ];

        candidates.into_iter().find(|p| p.is_file())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# shelf-cover configuration

[cache]
# root = "/var/cache/shelf-cover"
jpeg_quality = 80

[covers]
max_width = 300
max_height = 450

[library]
# Reader app metadata database (read only)
metadata_db = "data/metadata.db"
recent_limit = 2

[preferences]
# path = "/var/lib/shelf-cover/preferences.toml"

[weather]
# Used until a location is reported
latitude = 36.17
longitude = -115.14
stale_minutes = 120
"#
        .to_string()
    }
}
