use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Weather condition categories mapped from WMO codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
}

impl WeatherCondition {
    /// Convert WMO weather code to WeatherCondition
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::Clear,
            1..=2 => Self::PartlyCloudy,
            3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            56 | 57 => Self::Sleet, // Freezing drizzle
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            66 | 67 => Self::Sleet, // Freezing rain
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Clear,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::HeavyRain => "Heavy Rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Thunderstorm => "Thunderstorm",
        }
    }
}

/// First geocoding candidate for a free-text place name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub country: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

/// City search suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitySuggestion {
    pub name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
}

/// Normalized weather snapshot for one city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherDetails {
    pub city: String,
    pub temperature: f64,
    pub feels_like: f64,
    /// Relative humidity, percent
    pub humidity: u8,
    pub wind_speed: f64,
    /// Rounded compass degrees, e.g. "225°"
    pub wind_dir: String,
    /// Kilometers
    pub visibility: f64,
    /// Surface pressure, hPa
    pub pressure: u32,
    pub uv_index: u8,
    pub sunrise: NaiveDateTime,
    pub sunset: NaiveDateTime,
    /// Percent
    pub cloud_cover: u8,
    /// Fraction in `0.0..=1.0`
    pub precip_prob: f64,
    pub rain: f64,
    pub snow: f64,
    pub condition: WeatherCondition,
    pub updated_at: DateTime<Utc>,
}

impl WeatherDetails {
    /// Copy of this snapshot stamped with a new `updated_at`.
    pub fn refreshed(&self, at: DateTime<Utc>) -> Self {
        Self {
            updated_at: at,
            ..self.clone()
        }
    }
}

/// Provider call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStep {
    Geocode,
    Forecast,
}

impl std::fmt::Display for FetchStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStep::Geocode => write!(f, "geocode"),
            FetchStep::Forecast => write!(f, "forecast"),
        }
    }
}

/// Weather lookup errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WeatherError {
    /// No geocoding candidate, or nothing cached on the read-only path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport, status or decoding failure at one of the provider calls.
    #[error("{step} request failed: {message}")]
    Fetch { step: FetchStep, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl WeatherError {
    pub fn fetch(step: FetchStep, message: impl Into<String>) -> Self {
        Self::Fetch {
            step,
            message: message.into(),
        }
    }

    /// HTTP status an outer API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Fetch { .. } => 500,
            Self::InvalidInput(_) => 400,
        }
    }

    /// Whether a caller-side retry might succeed. Lookups are never retried here.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "Location not found. Check and try again.",
            Self::Fetch { .. } => "Weather service error. Please try again.",
            Self::InvalidInput(_) => "Invalid request. Check the city name.",
        }
    }
}

/// Reject blank city names before they reach the service.
pub fn validate_city(city: &str) -> Result<&str, WeatherError> {
    let trimmed = city.trim();
    if trimmed.is_empty() {
        return Err(WeatherError::InvalidInput("city is required".into()));
    }
    Ok(trimmed)
}

/// Search queries need at least two characters.
pub fn validate_search_query(query: &str) -> Result<&str, WeatherError> {
    let trimmed = query.trim();
    if trimmed.chars().count() < 2 {
        return Err(WeatherError::InvalidInput(
            "query must be at least 2 characters".into(),
        ));
    }
    Ok(trimmed)
}
