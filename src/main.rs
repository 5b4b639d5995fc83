use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use weatherd_core::config::parse_duration_secs;
use weatherd_core::{Config, ConfigError};
use weatherd_weather::{
    spawn_sweeper, validate_city, validate_search_query, CacheStore, DateFilter,
    ProviderSettings, ServiceSettings, WeatherProvider, WeatherService,
};

/// Cached weather lookups backed by Open-Meteo.
#[derive(Debug, Parser)]
#[command(name = "weatherd", version)]
struct Cli {
    /// Path to a TOML config file (defaults to <config dir>/weatherd/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Forecast cache TTL, e.g. 300, 30s, 5m, 1h (overrides CACHE_TTL)
    #[arg(long, value_parser = duration_arg)]
    cache_ttl: Option<u64>,

    /// Search cache TTL (overrides SEARCH_CACHE_TTL)
    #[arg(long, value_parser = duration_arg)]
    search_cache_ttl: Option<u64>,

    /// HTTP request timeout (overrides REQUEST_TIMEOUT)
    #[arg(long, value_parser = duration_arg)]
    request_timeout: Option<u64>,

    /// Expired entry sweep interval, 0 disables (overrides SWEEP_INTERVAL)
    #[arg(long, value_parser = duration_arg)]
    sweep_interval: Option<u64>,

    /// Geocoding base URL (overrides GEOCODE_BASE)
    #[arg(long)]
    geocode_base: Option<String>,

    /// Forecast base URL (overrides WEATHER_BASE)
    #[arg(long)]
    weather_base: Option<String>,

    /// Fail when the current hour has no exact hourly slot
    #[arg(long)]
    strict_hour_match: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Look up weather details for one or more cities
    Details {
        #[arg(required = true)]
        cities: Vec<String>,

        /// Look each city up this many times; repeats are served from the cache
        #[arg(long, default_value_t = 1)]
        repeat: u32,

        /// Only list cached entries updated on this day of the month
        #[arg(long)]
        day: Option<u32>,

        #[arg(long)]
        month: Option<u32>,

        #[arg(long)]
        year: Option<i32>,
    },
    /// Suggest cities matching a partial name
    Search { query: String },
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        let weather = &mut config.weather;
        if let Some(ttl) = self.cache_ttl {
            weather.cache_ttl_secs = ttl;
        }
        if let Some(ttl) = self.search_cache_ttl {
            weather.search_cache_ttl_secs = ttl;
        }
        if let Some(timeout) = self.request_timeout {
            weather.request_timeout_secs = timeout;
        }
        if let Some(every) = self.sweep_interval {
            weather.sweep_interval_secs = every;
        }
        if let Some(url) = &self.geocode_base {
            weather.geocode_base_url = url.clone();
        }
        if let Some(url) = &self.weather_base {
            weather.forecast_base_url = url.clone();
        }
        if self.strict_hour_match {
            weather.strict_hour_match = true;
        }
    }
}

fn duration_arg(value: &str) -> Result<u64, ConfigError> {
    parse_duration_secs("duration", value)
}

#[tokio::main]
async fn main() -> Result<()> {
    weatherd_core::init()?;

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());
    cli.apply_overrides(&mut config);

    config.ensure_valid()?;

    let weather = &config.weather;
    tracing::info!(
        "Config: cache_ttl={:?} geocode={} forecast={} strict_hour_match={}",
        weather.cache_ttl(),
        weather.geocode_base_url,
        weather.forecast_base_url,
        weather.strict_hour_match
    );

    let provider = WeatherProvider::new(ProviderSettings {
        geocode_base_url: weather.geocode_base_url.clone(),
        forecast_base_url: weather.forecast_base_url.clone(),
        timeout: weather.request_timeout(),
        strict_hour_match: weather.strict_hour_match,
    })
    .context("Failed to build HTTP client")?;

    let service = WeatherService::new(
        Arc::new(provider),
        Arc::new(CacheStore::new()),
        ServiceSettings {
            cache_ttl: weather.cache_ttl(),
            search_cache_ttl: weather.search_cache_ttl(),
        },
    );

    let sweepers = match weather.sweep_interval() {
        Some(every) => vec![
            spawn_sweeper(service.cache().clone(), every),
            spawn_sweeper(service.searches().clone(), every),
        ],
        None => Vec::new(),
    };

    let result = run(&service, cli.command).await;

    for handle in sweepers {
        handle.abort();
    }
    result
}

async fn run(service: &WeatherService, command: Command) -> Result<()> {
    match command {
        Command::Details {
            cities,
            repeat,
            day,
            month,
            year,
        } => {
            let mut details = Vec::new();
            for _ in 0..repeat.max(1) {
                for city in &cities {
                    let city = validate_city(city)?;
                    match service.get_details(city).await {
                        Ok(d) => details.push(d),
                        Err(e) => {
                            tracing::error!("{} (HTTP {}): {}", city, e.status_code(), e);
                            eprintln!("{}: {}", city, e.user_message());
                        }
                    }
                }
            }

            let filter = DateFilter { day, month, year };
            let report = serde_json::json!({
                "details": details,
                "cached": service.list_cached_filtered(&filter),
                "history": service.list_all_history(),
                "stats": service.stats(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Search { query } => {
            let query = validate_search_query(&query)?;
            let suggestions = service.search_cities(query).await?;
            println!("{}", serde_json::to_string_pretty(&suggestions)?);
        }
    }

    Ok(())
}
