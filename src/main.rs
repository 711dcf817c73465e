//! shelf-cover command line entry point.

use anyhow::Context;
use clap::Parser;
use shelf_cover::{
    BookFormat, CoverService, DiskCache,
    config::{AppsCommand, CacheCommand, Cli, Command, Config},
    library::{
        apps::{self, LaunchableApp},
        prefs::{Location, PreferencesStore},
        recent::{self, MetadataStore},
        weather::WeatherService,
    },
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelf_cover=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        tracing::debug!(path = %path.display(), "Loading config");
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Command::Init { force } => cmd_init(force),
        Command::Cover {
            path,
            kind,
            max_width,
            max_height,
            output,
        } => cmd_cover(&config, &path, kind, max_width, max_height, output).await,
        Command::Shelf {
            db,
            limit,
            export_dir,
        } => cmd_shelf(&config, db, limit, export_dir).await,
        Command::Cache { action } => cmd_cache(action, &config),
        Command::Apps { action } => cmd_apps(action, &config),
        Command::Weather { lat, lon, refresh } => cmd_weather(&config, lat, lon, refresh).await,
    }
}

fn cover_service(config: &Config) -> CoverService {
    let cache = DiskCache::new(&config.cache.root).with_quality(config.cache.jpeg_quality);
    CoverService::new(cache)
}

/// Write the default config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("shelf-cover.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    std::fs::create_dir_all(&config.cache.root)?;
    println!("Cache directory: {}", config.cache.root.display());

    println!("\nEdit shelf-cover.toml to point [library] metadata_db at your reader's database.");
    println!("Then run: shelf-cover shelf");

    Ok(())
}

/// Extract one cover.
async fn cmd_cover(
    config: &Config,
    path: &Path,
    kind: Option<String>,
    max_width: Option<u32>,
    max_height: Option<u32>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let declared = kind.unwrap_or_else(|| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(BookFormat::from_extension)
            .unwrap_or(BookFormat::Other)
            .as_str()
            .to_string()
    });
    let bounds = config.covers.bounds(max_width, max_height);
    let service = cover_service(config);
    let book = path.to_path_buf();

    let cover = tokio::task::spawn_blocking(move || {
        service.get_or_extract_cover(&book, &declared, bounds)
    })
    .await?;

    let Some(cover) = cover else {
        anyhow::bail!("No cover found for {}", path.display());
    };

    println!("{}x{} {}", cover.width(), cover.height(), path.display());

    if let Some(output) = output {
        cover
            .save(&output)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        tracing::info!(output = %output.display(), "Cover written");
    }

    Ok(())
}

/// Show the recent-reading shelf.
async fn cmd_shelf(
    config: &Config,
    db: Option<PathBuf>,
    limit: Option<usize>,
    export_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let db = db.unwrap_or_else(|| config.library.metadata_db.clone());
    let limit = limit.unwrap_or(config.library.recent_limit);
    let bounds = config.covers.bounds(None, None);

    let store = MetadataStore::open(&db)
        .with_context(|| format!("Cannot open metadata database {}", db.display()))?;
    let covers = Arc::new(cover_service(config));

    let shelf = recent::load_shelf(&store, covers, limit, bounds).await;
    if shelf.is_empty() {
        println!("No recent books.");
        return Ok(());
    }

    if let Some(ref dir) = export_dir {
        std::fs::create_dir_all(dir)?;
    }

    println!("{:<40} {:<6} {:<9} {:<17} COVER", "TITLE", "TYPE", "PROGRESS", "LAST READ");
    println!("{}", "-".repeat(90));
    for (index, entry) in shelf.iter().enumerate() {
        let progress = entry
            .book
            .progress_percent
            .map(|p| format!("{}%", p))
            .unwrap_or_else(|| "-".to_string());
        let last_read = entry
            .book
            .last_access_time()
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let cover = match (&entry.cover, &export_dir) {
            (Some(image), Some(dir)) => {
                let target = dir.join(format!("{}.jpg", index + 1));
                image.save(&target)?;
                target.display().to_string()
            }
            (Some(image), None) => format!("{}x{}", image.width(), image.height()),
            (None, _) => "none".to_string(),
        };

        println!(
            "{:<40} {:<6} {:<9} {:<17} {}",
            entry.book.title, entry.book.file_type, progress, last_read, cover
        );
    }

    Ok(())
}

/// Cover cache maintenance.
fn cmd_cache(action: CacheCommand, config: &Config) -> anyhow::Result<()> {
    let cache = DiskCache::new(&config.cache.root);

    match action {
        CacheCommand::Clear => {
            let removed = cache.clear()?;
            tracing::info!(removed, dir = %cache.dir().display(), "Cover cache cleared");
            println!("Removed {} cached covers", removed);
        }

        CacheCommand::Stats => {
            println!("Directory: {}", cache.dir().display());
            println!("Entries:   {}", cache.entry_count());
        }
    }

    Ok(())
}

/// App list management.
fn cmd_apps(action: AppsCommand, config: &Config) -> anyhow::Result<()> {
    let store = PreferencesStore::new(&config.preferences.path);

    match action {
        AppsCommand::List { inventory, all } => {
            let content = std::fs::read_to_string(&inventory)
                .with_context(|| format!("Cannot read {}", inventory.display()))?;
            let launchable: Vec<LaunchableApp> = serde_json::from_str(&content)
                .with_context(|| format!("Invalid app inventory {}", inventory.display()))?;

            let entries = apps::build_app_list(&launchable, &store.load());
            let shown: Vec<_> = if all {
                entries.iter().collect()
            } else {
                apps::visible_apps(&entries)
            };

            if shown.is_empty() {
                println!("No apps.");
            } else {
                println!("{:<30} {:<40} HIDDEN", "NAME", "PACKAGE");
                println!("{}", "-".repeat(80));
                for entry in shown {
                    println!(
                        "{:<30} {:<40} {}",
                        entry.display_name(),
                        entry.package_name,
                        if entry.is_hidden { "yes" } else { "no" }
                    );
                }
            }
        }

        AppsCommand::Hide { package } => {
            store.update(|p| p.hide_app(&package))?;
            println!("Hidden: {}", package);
        }

        AppsCommand::Show { package } => {
            store.update(|p| p.unhide_app(&package))?;
            println!("Visible: {}", package);
        }

        AppsCommand::Rename { package, name } => {
            store.update(|p| p.rename_app(&package, &name))?;
            println!("Renamed {} to {}", package, name);
        }

        AppsCommand::Reset { package } => {
            store.update(|p| p.reset_app_name(&package))?;
            println!("Reset name of {}", package);
        }
    }

    Ok(())
}

/// Show the weather summary, refreshing it when stale.
async fn cmd_weather(
    config: &Config,
    lat: Option<f32>,
    lon: Option<f32>,
    refresh: bool,
) -> anyhow::Result<()> {
    let weather = WeatherService::new(PreferencesStore::new(&config.preferences.path))
        .with_default_location(config.weather.location())
        .with_stale_after(config.weather.stale_after());

    let reported = lat
        .zip(lon)
        .map(|(latitude, longitude)| Location {
            latitude,
            longitude,
        });

    let now = chrono::Utc::now().timestamp_millis();
    let reading = if refresh || reported.is_some() || weather.is_stale(now) {
        tokio::task::spawn_blocking(move || weather.fetch(reported)).await?
    } else {
        weather.cached()
    };

    match reading {
        Some(data) => println!("{}", data.display_text()),
        None => println!("Weather unavailable"),
    }

    Ok(())
}
