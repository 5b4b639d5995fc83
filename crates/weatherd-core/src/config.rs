use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_GEOCODE_BASE_URL: &str = "https://geocoding-api.open-meteo.com";
pub const DEFAULT_FORECAST_BASE_URL: &str = "https://api.open-meteo.com";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a summary of all errors joined with "; "
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Weather lookup and cache settings
    #[serde(default)]
    pub weather: WeatherConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// How long a fetched forecast stays valid, in seconds
    pub cache_ttl_secs: u64,

    /// How long city search suggestions stay valid, in seconds
    pub search_cache_ttl_secs: u64,

    /// Base URL of the geocoding provider
    pub geocode_base_url: String,

    /// Base URL of the forecast provider
    pub forecast_base_url: String,

    /// Per-request timeout for provider calls, in seconds
    pub request_timeout_secs: u64,

    /// Fail instead of falling back to the first hourly slot when the current
    /// time has no exact hourly match
    pub strict_hour_match: bool,

    /// Interval for sweeping expired entries, in seconds (0 disables the sweep)
    pub sweep_interval_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            search_cache_ttl_secs: 300,
            geocode_base_url: DEFAULT_GEOCODE_BASE_URL.to_string(),
            forecast_base_url: DEFAULT_FORECAST_BASE_URL.to_string(),
            request_timeout_secs: 10,
            strict_hour_match: false,
            sweep_interval_secs: 0,
        }
    }
}

impl WeatherConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn search_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.search_cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `None` when the periodic sweep is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location when `path`
    /// is `None`. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            tracing::debug!("No config file at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Validate and log warnings, failing on any error.
    pub fn ensure_valid(&self) -> Result<ValidationResult> {
        let validation = self.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(validation)
    }

    /// Apply environment overrides. Values that fail to parse are logged and
    /// ignored so the previous layer stays in effect.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let weather = &mut self.weather;
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CACHE_TTL") {
            apply_duration("CACHE_TTL", &v, &mut weather.cache_ttl_secs);
        }
        if let Some(v) = get("SEARCH_CACHE_TTL") {
            apply_duration("SEARCH_CACHE_TTL", &v, &mut weather.search_cache_ttl_secs);
        }
        if let Some(v) = get("REQUEST_TIMEOUT") {
            apply_duration("REQUEST_TIMEOUT", &v, &mut weather.request_timeout_secs);
        }
        if let Some(v) = get("SWEEP_INTERVAL") {
            apply_duration("SWEEP_INTERVAL", &v, &mut weather.sweep_interval_secs);
        }
        if let Some(v) = get("GEOCODE_BASE") {
            weather.geocode_base_url = v;
        }
        if let Some(v) = get("WEATHER_BASE") {
            weather.forecast_base_url = v;
        }
        if let Some(v) = get("STRICT_HOUR_MATCH") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => weather.strict_hour_match = true,
                "0" | "false" | "no" | "off" => weather.strict_hour_match = false,
                other => tracing::warn!("invalid STRICT_HOUR_MATCH {:?}, ignoring", other),
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        validate_url(&self.weather.geocode_base_url, "weather.geocode_base_url", &mut result);
        validate_url(&self.weather.forecast_base_url, "weather.forecast_base_url", &mut result);

        if self.weather.cache_ttl_secs == 0 {
            result.add_warning(
                "weather.cache_ttl_secs",
                "Caching effectively disabled (0 seconds)",
            );
        } else if self.weather.cache_ttl_secs > 86_400 {
            result.add_warning(
                "weather.cache_ttl_secs",
                "Forecasts cached for more than 24 hours",
            );
        }

        if self.weather.request_timeout_secs == 0 {
            result.add_error(
                "weather.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        } else if self.weather.request_timeout_secs > 60 {
            result.add_warning(
                "weather.request_timeout_secs",
                "Request timeout is unusually long (>60s)",
            );
        }

        result
    }

    /// Get the default path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("weatherd");

        Ok(config_dir.join("config.toml"))
    }
}

fn apply_duration(field: &str, value: &str, target: &mut u64) {
    match parse_duration_secs(field, value) {
        Ok(secs) => *target = secs,
        Err(e) => tracing::warn!("{}, keeping {}s", e, target),
    }
}

/// Parse `300`, `30s`, `5m` or `1h` into whole seconds.
pub fn parse_duration_secs(field: &str, value: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    };

    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return Err(invalid()),
    };

    amount.checked_mul(multiplier).ok_or_else(invalid)
}

fn validate_url(url_str: &str, field_name: &str, result: &mut ValidationResult) {
    match Url::parse(url_str) {
        Ok(url) => {
            if url.scheme() != "http" && url.scheme() != "https" {
                result.add_error(
                    field_name,
                    format!("URL must use http or https scheme, got: {}", url.scheme()),
                );
            }

            if url.host().is_none() {
                result.add_error(field_name, "URL must have a host");
            }
        }
        Err(e) => {
            result.add_error(field_name, format!("Invalid URL: {}", e));
        }
    }
}
