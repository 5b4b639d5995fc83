//! Two-stage weather lookup against Open-Meteo: geocode, then forecast.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::geocode::GeocodeClient;
use crate::types::{
    CitySuggestion, FetchStep, Location, WeatherCondition, WeatherDetails, WeatherError,
};

const HOURLY_FIELDS: &str = "temperature_2m,apparent_temperature,relative_humidity_2m,\
precipitation_probability,rain,snowfall,cloudcover,uv_index,visibility,surface_pressure,\
windspeed_10m,winddirection_10m";

/// Source of fresh weather data. The service only talks to this seam.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Resolve `city` and fetch its current conditions.
    async fn fetch_details(&self, city: &str) -> Result<WeatherDetails, WeatherError>;

    /// City suggestions for a partial name.
    async fn search_cities(&self, query: &str) -> Result<Vec<CitySuggestion>, WeatherError>;
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub geocode_base_url: String,
    pub forecast_base_url: String,
    pub timeout: Duration,
    /// Fail when the current time has no exact hourly slot instead of using slot 0.
    pub strict_hour_match: bool,
}

#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Client,
    geocoder: GeocodeClient,
    forecast_base_url: String,
    strict_hour_match: bool,
}

impl WeatherProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(settings.timeout).build()?;

        Ok(Self {
            geocoder: GeocodeClient::new(client.clone(), &settings.geocode_base_url),
            client,
            forecast_base_url: settings.forecast_base_url.trim_end_matches('/').to_string(),
            strict_hour_match: settings.strict_hour_match,
        })
    }

    /// Fetch the forecast for an already geocoded location.
    #[instrument(skip(self, location), fields(city = %location.name), level = "debug")]
    pub async fn fetch_forecast(&self, location: &Location) -> Result<WeatherDetails, WeatherError> {
        let url = format!("{}/v1/forecast", self.forecast_base_url);
        let latitude = format!("{:.4}", location.latitude);
        let longitude = format!("{:.4}", location.longitude);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", latitude.as_str()),
                ("longitude", longitude.as_str()),
                ("current_weather", "true"),
                ("hourly", HOURLY_FIELDS),
                ("daily", "sunrise,sunset"),
                ("timezone", "auto"),
            ])
            .send()
            .await
            .map_err(|e| WeatherError::fetch(FetchStep::Forecast, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::fetch(
                FetchStep::Forecast,
                format!("unexpected status {}", status),
            ));
        }

        let raw: ForecastResponse = response.json().await.map_err(|e| {
            WeatherError::fetch(FetchStep::Forecast, format!("invalid response: {}", e))
        })?;

        normalize(location, &raw, self.strict_hour_match, Utc::now())
    }
}

#[async_trait]
impl WeatherSource for WeatherProvider {
    async fn fetch_details(&self, city: &str) -> Result<WeatherDetails, WeatherError> {
        let location = self.geocoder.locate(city).await?;
        tracing::debug!(
            "Geocoded {} to {} ({}, {})",
            city,
            location.name,
            location.latitude,
            location.longitude
        );
        self.fetch_forecast(&location).await
    }

    async fn search_cities(&self, query: &str) -> Result<Vec<CitySuggestion>, WeatherError> {
        self.geocoder.search(query).await
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current_weather: CurrentWeather,
    hourly: Hourly,
    daily: Daily,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    windspeed: f64,
    winddirection: f64,
    #[serde(default)]
    weathercode: i32,
    time: String,
}

/// Hourly series. Open-Meteo reports gaps as `null`, which read as 0.
#[derive(Debug, Deserialize)]
struct Hourly {
    time: Vec<String>,
    apparent_temperature: Vec<Option<f64>>,
    relative_humidity_2m: Vec<Option<f64>>,
    precipitation_probability: Vec<Option<f64>>,
    rain: Vec<Option<f64>>,
    snowfall: Vec<Option<f64>>,
    cloudcover: Vec<Option<f64>>,
    uv_index: Vec<Option<f64>>,
    visibility: Vec<Option<f64>>,
    surface_pressure: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct Daily {
    sunrise: Vec<String>,
    sunset: Vec<String>,
}

/// Index of the hourly slot whose timestamp equals `current` exactly.
///
/// Without a match the first slot is used, unless `strict` is set.
fn hour_index(times: &[String], current: &str, strict: bool) -> Result<usize, WeatherError> {
    match times.iter().position(|t| t == current) {
        Some(idx) => Ok(idx),
        None if strict => Err(WeatherError::fetch(
            FetchStep::Forecast,
            format!("no hourly entry for current time {}", current),
        )),
        None => {
            tracing::warn!(
                "No hourly entry matches current time {}, falling back to the first slot",
                current
            );
            Ok(0)
        }
    }
}

fn series_value(series: &[Option<f64>], idx: usize, name: &str) -> Result<f64, WeatherError> {
    series
        .get(idx)
        .map(|v| v.unwrap_or(0.0))
        .ok_or_else(|| {
            WeatherError::fetch(
                FetchStep::Forecast,
                format!("hourly {} has no entry at index {}", name, idx),
            )
        })
}

fn first_day_time(values: &[String], name: &str) -> Result<NaiveDateTime, WeatherError> {
    let raw = values.first().ok_or_else(|| {
        WeatherError::fetch(FetchStep::Forecast, format!("daily {} is empty", name))
    })?;
    parse_local_time(raw).ok_or_else(|| {
        WeatherError::fetch(
            FetchStep::Forecast,
            format!("daily {} has unparseable time {:?}", name, raw),
        )
    })
}

/// Open-Meteo returns local times without an offset ("2024-01-01T06:45").
fn parse_local_time(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

/// Rounded compass degrees, e.g. 225.4 -> "225°".
pub fn format_wind_direction(degrees: f64) -> String {
    format!("{:.0}°", degrees.round())
}

fn normalize(
    location: &Location,
    raw: &ForecastResponse,
    strict: bool,
    now: DateTime<Utc>,
) -> Result<WeatherDetails, WeatherError> {
    let hourly = &raw.hourly;
    let idx = hour_index(&hourly.time, &raw.current_weather.time, strict)?;

    Ok(WeatherDetails {
        city: location.name.clone(),
        temperature: raw.current_weather.temperature,
        feels_like: series_value(&hourly.apparent_temperature, idx, "apparent_temperature")?,
        humidity: series_value(&hourly.relative_humidity_2m, idx, "relative_humidity_2m")? as u8,
        wind_speed: raw.current_weather.windspeed,
        wind_dir: format_wind_direction(raw.current_weather.winddirection),
        visibility: series_value(&hourly.visibility, idx, "visibility")? / 1000.0,
        pressure: series_value(&hourly.surface_pressure, idx, "surface_pressure")? as u32,
        uv_index: series_value(&hourly.uv_index, idx, "uv_index")? as u8,
        sunrise: first_day_time(&raw.daily.sunrise, "sunrise")?,
        sunset: first_day_time(&raw.daily.sunset, "sunset")?,
        cloud_cover: series_value(&hourly.cloudcover, idx, "cloudcover")? as u8,
        precip_prob: series_value(&hourly.precipitation_probability, idx, "precipitation_probability")?
            / 100.0,
        rain: series_value(&hourly.rain, idx, "rain")?,
        snow: series_value(&hourly.snowfall, idx, "snowfall")?,
        condition: WeatherCondition::from_wmo_code(raw.current_weather.weathercode),
        updated_at: now,
    })
}
