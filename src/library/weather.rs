//! Cached weather summary for the launcher header.
//!
//! Readings come from the Open-Meteo forecast endpoint and are kept in the
//! preferences file so the header can show the last value immediately.

use crate::error::{AppError, Result};
use crate::library::prefs::{CachedWeather, Location, PreferencesStore};
use serde::Deserialize;
use std::time::Duration;

/// Forecast endpoint.
pub const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Readings older than this are refreshed.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2 * 60 * 60);

/// Connect and read timeout for the forecast request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Location used until the device reports one.
pub const DEFAULT_LOCATION: Location = Location {
    latitude: 36.17,
    longitude: -115.14,
};

/// Current temperature and condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherData {
    /// Temperature in degrees Fahrenheit.
    pub temperature: f32,
    /// WMO weather code.
    pub code: i32,
}

impl WeatherData {
    /// Short condition label for a WMO code.
    pub fn condition(&self) -> &'static str {
        match self.code {
            0 | 1 => "Clear",
            2 => "Cloudy",
            3 => "Overcast",
            45 | 48 => "Fog",
            51 | 53 | 55 | 56 | 57 => "Drizzle",
            61 | 63 | 65 | 66 | 67 => "Rain",
            71 | 73 | 75 | 77 | 85 | 86 => "Snow",
            80..=82 => "Showers",
            95 | 96 | 99 => "Storms",
            _ => "",
        }
    }

    /// Header text, e.g. `72°F Clear`.
    pub fn display_text(&self) -> String {
        format!("{}°F {}", self.temperature as i32, self.condition())
    }
}

#[derive(Deserialize)]
struct ForecastResponse {
    current: CurrentConditions,
}

#[derive(Deserialize)]
struct CurrentConditions {
    temperature_2m: f32,
    weather_code: i32,
}

/// Parse the `current` block of a forecast response.
pub fn parse_forecast(body: &str) -> Result<WeatherData> {
    let response: ForecastResponse = serde_json::from_str(body)
        .map_err(|e| AppError::Http(format!("Invalid forecast response: {}", e)))?;

    Ok(WeatherData {
        temperature: response.current.temperature_2m,
        code: response.current.weather_code,
    })
}

/// Forecast request URL for a position.
pub fn forecast_url(latitude: f32, longitude: f32) -> String {
    format!(
        "{}?latitude={}&longitude={}&current=temperature_2m,weather_code\
         &temperature_unit=fahrenheit&timezone=auto",
        FORECAST_URL, latitude, longitude
    )
}

/// Weather reading and caching on top of the preferences file.
#[derive(Debug, Clone)]
pub struct WeatherService {
    store: PreferencesStore,
    default_location: Location,
    stale_after: Duration,
}

impl WeatherService {
    /// Service storing readings in `store`.
    pub fn new(store: PreferencesStore) -> Self {
        Self {
            store,
            default_location: DEFAULT_LOCATION,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Override the fallback location.
    pub fn with_default_location(mut self, location: Location) -> Self {
        self.default_location = location;
        self
    }

    /// Override the staleness threshold.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Last stored reading.
    pub fn cached(&self) -> Option<WeatherData> {
        self.store.load().weather.map(|w| WeatherData {
            temperature: w.temperature,
            code: w.code,
        })
    }

    /// Whether the stored reading is missing or too old at `now_ms`.
    pub fn is_stale(&self, now_ms: i64) -> bool {
        match self.store.load().weather {
            Some(w) if w.fetched_at > 0 => {
                now_ms.saturating_sub(w.fetched_at) > self.stale_after.as_millis() as i64
            }
            _ => true,
        }
    }

    /// Position to query: the reported one (remembered), else the stored one, else the default.
    pub fn location(&self, reported: Option<Location>) -> Location {
        if let Some(location) = reported {
            if let Err(e) = self.store.update(|p| p.location = Some(location)) {
                tracing::debug!(error = %e, "Failed to remember location");
            }
            return location;
        }

        match self.store.load().location {
            Some(l) if l.latitude != 0.0 || l.longitude != 0.0 => l,
            _ => self.default_location,
        }
    }

    /// Store a fresh reading taken at `now_ms`.
    pub fn record(&self, data: WeatherData, now_ms: i64) -> Result<()> {
        self.store.update(|p| {
            p.weather = Some(CachedWeather {
                temperature: data.temperature,
                code: data.code,
                fetched_at: now_ms,
            })
        })?;
        Ok(())
    }

    /// Fetch current conditions, falling back to the cached reading on failure.
    ///
    /// Blocks on network I/O.
    pub fn fetch(&self, reported: Option<Location>) -> Option<WeatherData> {
        let location = self.location(reported);

        match request_forecast(location) {
            Ok(data) => {
                let now = chrono::Utc::now().timestamp_millis();
                if let Err(e) = self.record(data, now) {
                    tracing::warn!(error = %e, "Failed to store weather reading");
                }
                tracing::info!(temperature = data.temperature, code = data.code, "Weather updated");
                Some(data)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Weather fetch failed, using cached reading");
                self.cached()
            }
        }
    }
}

fn request_forecast(location: Location) -> Result<WeatherData> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(FETCH_TIMEOUT))
        .build()
        .into();

    let body = agent
        .get(&forecast_url(location.latitude, location.longitude))
        .call()
        .map_err(|e| AppError::Http(e.to_string()))?
        .body_mut()
        .read_to_string()
        .map_err(|e| AppError::Http(e.to_string()))?;

    parse_forecast(&body)
}
