//! Weather lookups for weatherd
//!
//! Geocodes city names and fetches current conditions from Open-Meteo, keeping
//! results in a TTL cache with a per-city history.

pub mod cache;
pub mod clock;
pub mod geocode;
pub mod provider;
pub mod service;
pub mod types;

pub use cache::{spawn_sweeper, CacheRecord, CacheStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use geocode::GeocodeClient;
pub use provider::{ProviderSettings, WeatherProvider, WeatherSource};
pub use service::{CacheStats, DateFilter, ServiceSettings, WeatherService};
pub use types::*;
