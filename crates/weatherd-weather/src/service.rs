//! Cache-then-fetch orchestration.
//!
//! Each call that misses the cache performs its own fetch; concurrent misses for
//! the same city are not coalesced and the last write wins. The store lock is
//! never held across a provider call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use crate::cache::CacheStore;
use crate::provider::WeatherSource;
use crate::types::{CitySuggestion, WeatherDetails, WeatherError};

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    /// Validity window for fetched forecasts
    pub cache_ttl: Duration,
    /// Validity window for city search suggestions
    pub search_cache_ttl: Duration,
}

/// Calendar components an entry's `updated_at` must match. `None` matches anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateFilter {
    pub day: Option<u32>,
    pub month: Option<u32>,
    pub year: Option<i32>,
}

impl DateFilter {
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.day.map_or(true, |d| at.day() == d)
            && self.month.map_or(true, |m| at.month() == m)
            && self.year.map_or(true, |y| at.year() == y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Non-expired forecast entries
    pub entries: usize,
}

pub struct WeatherService {
    source: Arc<dyn WeatherSource>,
    cache: Arc<CacheStore<WeatherDetails>>,
    searches: Arc<CacheStore<Vec<CitySuggestion>>>,
    settings: ServiceSettings,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl WeatherService {
    pub fn new(
        source: Arc<dyn WeatherSource>,
        cache: Arc<CacheStore<WeatherDetails>>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            source,
            searches: Arc::new(CacheStore::with_clock(cache.clock())),
            cache,
            settings,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The forecast store, shared so a sweeper can be attached to it.
    pub fn cache(&self) -> &Arc<CacheStore<WeatherDetails>> {
        &self.cache
    }

    /// The city search store. It keeps no history.
    pub fn searches(&self) -> &Arc<CacheStore<Vec<CitySuggestion>>> {
        &self.searches
    }

    /// Cached details for `city`, fetching them on a miss.
    ///
    /// A hit records a snapshot with a fresh `updated_at` in the history and
    /// returns the cached value unchanged; it does not extend the TTL. Fetched
    /// details are stamped with the store's clock. A failed fetch leaves the
    /// cache untouched.
    pub async fn get_details(&self, city: &str) -> Result<WeatherDetails, WeatherError> {
        if let Some(cached) = self.cache.get(city) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache hit for {}", city);
            self.cache
                .append_history(city, cached.refreshed(self.cache.now()));
            return Ok(cached);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Cache miss for {}, fetching", city);

        let details = self
            .source
            .fetch_details(city)
            .await
            .map_err(|e| {
                tracing::warn!("Weather lookup for {} failed: {}", city, e);
                e
            })?
            .refreshed(self.cache.now());

        self.cache
            .set(city, details.clone(), self.settings.cache_ttl);
        tracing::info!("Cached weather for {} ({:?})", city, self.settings.cache_ttl);
        Ok(details)
    }

    /// Cache-only read; never fetches.
    pub fn get_cached(&self, city: &str) -> Result<WeatherDetails, WeatherError> {
        self.cache
            .get(city)
            .ok_or_else(|| WeatherError::NotFound(format!("no cached result for {}", city)))
    }

    pub fn list_cached(&self) -> HashMap<String, WeatherDetails> {
        self.cache.list()
    }

    /// Non-expired entries whose `updated_at` matches `filter`.
    pub fn list_cached_filtered(&self, filter: &DateFilter) -> HashMap<String, WeatherDetails> {
        self.cache
            .list()
            .into_iter()
            .filter(|(_, details)| filter.matches(details.updated_at))
            .collect()
    }

    pub fn list_history(&self, city: &str) -> Vec<WeatherDetails> {
        self.cache.list_history(city)
    }

    pub fn list_all_history(&self) -> HashMap<String, Vec<WeatherDetails>> {
        self.cache.list_all_history()
    }

    /// City suggestions, cached per query.
    pub async fn search_cities(&self, query: &str) -> Result<Vec<CitySuggestion>, WeatherError> {
        if let Some(cached) = self.searches.get(query) {
            return Ok(cached);
        }

        let suggestions = self.source.search_cities(query).await?;
        self.searches
            .insert(query, suggestions.clone(), self.settings.search_cache_ttl);
        Ok(suggestions)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.live_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::spawn_sweeper;
    use crate::clock::{Clock, ManualClock};
    use crate::types::{FetchStep, WeatherCondition};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::atomic::AtomicUsize;

    /// Counts calls and answers from a fixed outcome.
    struct FakeSource {
        fetches: AtomicUsize,
        searches: AtomicUsize,
        outcome: Result<(), WeatherError>,
    }

    impl FakeSource {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                searches: AtomicUsize::new(0),
                outcome: Ok(()),
            })
        }

        fn failing(err: WeatherError) -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                searches: AtomicUsize::new(0),
                outcome: Err(err),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WeatherSource for FakeSource {
        async fn fetch_details(&self, city: &str) -> Result<WeatherDetails, WeatherError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.outcome.clone().map(|_| sample(city))
        }

        async fn search_cities(&self, query: &str) -> Result<Vec<CitySuggestion>, WeatherError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone().map(|_| {
                vec![CitySuggestion {
                    name: format!("{}ville", query),
                    country: "Nowhere".to_string(),
                    lat: 1.0,
                    lon: 2.0,
                }]
            })
        }
    }

    fn sample(city: &str) -> WeatherDetails {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        WeatherDetails {
            city: city.to_string(),
            temperature: 24.5,
            feels_like: 26.1,
            humidity: 81,
            wind_speed: 11.2,
            wind_dir: "225°".to_string(),
            visibility: 24.14,
            pressure: 1012,
            uv_index: 3,
            sunrise: day.and_hms_opt(6, 34, 0).unwrap(),
            sunset: day.and_hms_opt(17, 28, 0).unwrap(),
            cloud_cover: 75,
            precip_prob: 0.42,
            rain: 1.2,
            snow: 0.0,
            condition: WeatherCondition::Rain,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap(),
        }
    }

    const TTL: Duration = Duration::from_secs(300);

    fn service_with(source: Arc<FakeSource>) -> (WeatherService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap(),
        ));
        let cache = Arc::new(CacheStore::with_clock(clock.clone()));
        let service = WeatherService::new(
            source,
            cache,
            ServiceSettings {
                cache_ttl: TTL,
                search_cache_ttl: TTL,
            },
        );
        (service, clock)
    }

    #[tokio::test]
    async fn test_cold_key_fetches_once_then_hits() {
        let source = FakeSource::ok();
        let (service, _) = service_with(source.clone());

        let first = service.get_details("Hanoi").await.unwrap();
        assert_eq!(source.fetches(), 1);

        let second = service.get_details("Hanoi").await.unwrap();
        assert_eq!(source.fetches(), 1);
        assert_eq!(first, second);

        assert_eq!(
            service.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
    }

    #[tokio::test]
    async fn test_hit_appends_refreshed_snapshot_without_extending_ttl() {
        let source = FakeSource::ok();
        let (service, clock) = service_with(source.clone());

        let fetched = service.get_details("Hanoi").await.unwrap();
        clock.advance(chrono::Duration::seconds(200));
        let hit = service.get_details("Hanoi").await.unwrap();
        assert_eq!(hit.updated_at, fetched.updated_at);

        let history = service.list_history("Hanoi");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].updated_at, clock.now());
        assert_eq!(history[1].temperature, fetched.temperature);

        // 200s + 200s exceeds the 300s TTL set at fetch time.
        clock.advance(chrono::Duration::seconds(200));
        service.get_details("Hanoi").await.unwrap();
        assert_eq!(source.fetches(), 2);
        assert_eq!(service.list_history("Hanoi").len(), 3);
    }

    #[tokio::test]
    async fn test_history_counts_sets_and_hits() {
        let source = FakeSource::ok();
        let (service, _) = service_with(source.clone());

        let mut last_len = 0;
        for _ in 0..5 {
            service.get_details("Hanoi").await.unwrap();
            let len = service.list_history("Hanoi").len();
            assert!(len > last_len);
            last_len = len;
        }
        assert_eq!(last_len, 5);
        assert_eq!(service.list_all_history()["Hanoi"].len(), 5);
    }

    #[tokio::test]
    async fn test_not_found_leaves_cache_empty() {
        let source = FakeSource::failing(WeatherError::NotFound("city not found: Zzzzqq".into()));
        let (service, _) = service_with(source.clone());

        let result = service.get_details("Zzzzqq").await;
        assert!(matches!(result, Err(WeatherError::NotFound(_))));
        assert!(service.list_cached().is_empty());
        assert!(service.list_history("Zzzzqq").is_empty());
        assert!(matches!(
            service.get_cached("Zzzzqq"),
            Err(WeatherError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_error_propagates_untouched() {
        let err = WeatherError::fetch(FetchStep::Forecast, "unexpected status 502");
        let source = FakeSource::failing(err.clone());
        let (service, _) = service_with(source.clone());

        assert_eq!(service.get_details("Hanoi").await, Err(err));
        assert!(service.list_cached().is_empty());

        // No automatic retry: one call per request.
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_get_cached_never_fetches() {
        let source = FakeSource::ok();
        let (service, clock) = service_with(source.clone());

        assert!(service.get_cached("Hanoi").is_err());
        assert_eq!(source.fetches(), 0);

        service.get_details("Hanoi").await.unwrap();
        assert_eq!(service.get_cached("Hanoi").unwrap().city, "Hanoi");

        clock.advance(chrono::Duration::seconds(301));
        assert!(service.get_cached("Hanoi").is_err());
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_list_cached_filtered_by_date() {
        let source = FakeSource::ok();
        let (service, _) = service_with(source);
        service.get_details("Hanoi").await.unwrap();

        let jan_first = DateFilter {
            day: Some(1),
            month: Some(1),
            year: Some(2024),
        };
        assert_eq!(service.list_cached_filtered(&jan_first).len(), 1);
        assert_eq!(service.list_cached_filtered(&DateFilter::default()).len(), 1);

        let other_day = DateFilter {
            day: Some(2),
            ..DateFilter::default()
        };
        assert!(service.list_cached_filtered(&other_day).is_empty());
    }

    #[tokio::test]
    async fn test_search_results_are_cached() {
        let source = FakeSource::ok();
        let (service, clock) = service_with(source.clone());

        let first = service.search_cities("Par").await.unwrap();
        let second = service.search_cities("Par").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.searches.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::seconds(301));
        service.search_cities("Par").await.unwrap();
        assert_eq!(source.searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_search_store_keeps_no_history() {
        let source = FakeSource::ok();
        let (service, clock) = service_with(source.clone());

        for _ in 0..50 {
            service.search_cities("Par").await.unwrap();
            clock.advance(chrono::Duration::seconds(301));
        }

        assert_eq!(source.searches.load(Ordering::SeqCst), 50);
        assert!(service.searches().list_history("Par").is_empty());
        assert!(service.searches().list_all_history().is_empty());
        assert!(service.list_all_history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_search_store() {
        let source = FakeSource::ok();
        let (service, clock) = service_with(source);
        service.search_cities("Par").await.unwrap();
        clock.advance(chrono::Duration::seconds(301));

        let handle = spawn_sweeper(service.searches().clone(), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert_eq!(service.searches().purge_expired(), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn test_fetched_details_use_store_clock() {
        let source = FakeSource::ok();
        let (service, clock) = service_with(source);
        clock.set(Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap());

        let fetched = service.get_details("Hanoi").await.unwrap();
        assert_eq!(fetched.updated_at, clock.now());
        assert_eq!(service.get_cached("Hanoi").unwrap().updated_at, clock.now());
        assert_eq!(service.list_history("Hanoi")[0].updated_at, clock.now());

        let jan_second = DateFilter {
            day: Some(2),
            ..DateFilter::default()
        };
        assert_eq!(service.list_cached_filtered(&jan_second).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_converge() {
        let source = FakeSource::ok();
        let (service, _) = service_with(source.clone());
        let service = Arc::new(service);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let service = service.clone();
                let city = if i % 2 == 0 { "Hanoi" } else { "Paris" };
                tokio::spawn(async move { service.get_details(city).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        let fetches = source.fetches();
        assert!((2..=16).contains(&fetches), "fetches: {}", fetches);
        assert_eq!(service.list_cached().len(), 2);

        let stats = service.stats();
        assert_eq!(stats.hits + stats.misses, 16);
        assert_eq!(stats.misses as usize, fetches);
    }
}
