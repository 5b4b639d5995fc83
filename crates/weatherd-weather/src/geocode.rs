//! Forward geocoding: free-text place names to coordinates.
//! Uses the Open-Meteo geocoding API - free, no API key required.

use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::types::{CitySuggestion, FetchStep, Location, WeatherError};

pub const SEARCH_LIMIT: usize = 5;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    name: String,
    #[serde(default)]
    country: Option<String>,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Clone)]
pub struct GeocodeClient {
    client: Client,
    base_url: String,
}

impl GeocodeClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve `name` to its best match.
    #[instrument(skip(self), level = "debug")]
    pub async fn locate(&self, name: &str) -> Result<Location, WeatherError> {
        let first = self
            .query(name, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::NotFound(format!("city not found: {}", name)))?;

        Ok(Location {
            name: first.name,
            country: first.country,
            latitude: first.latitude,
            longitude: first.longitude,
        })
    }

    /// Up to `SEARCH_LIMIT` suggestions for a partial city name.
    #[instrument(skip(self), level = "debug")]
    pub async fn search(&self, query: &str) -> Result<Vec<CitySuggestion>, WeatherError> {
        let results = self.query(query, SEARCH_LIMIT).await?;
        if results.is_empty() {
            return Err(WeatherError::NotFound(format!("no results found for {}", query)));
        }

        Ok(results
            .into_iter()
            .map(|r| CitySuggestion {
                name: r.name,
                country: r.country.unwrap_or_default(),
                lat: r.latitude,
                lon: r.longitude,
            })
            .collect())
    }

    async fn query(&self, name: &str, count: usize) -> Result<Vec<GeocodeResult>, WeatherError> {
        let url = format!("{}/v1/search", self.base_url);
        let count = count.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("name", name),
                ("count", count.as_str()),
                ("language", "en"),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| WeatherError::fetch(FetchStep::Geocode, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Geocode returned status {}", status);
            return Err(WeatherError::fetch(
                FetchStep::Geocode,
                format!("unexpected status {}", status),
            ));
        }

        let body: GeocodeResponse = response.json().await.map_err(|e| {
            WeatherError::fetch(FetchStep::Geocode, format!("invalid response: {}", e))
        })?;

        Ok(body.results)
    }
}
