//! Region weather with a TTL cache
//!
//! Lookups are keyed on the region code. A failed lookup never fails the
//! node: it degrades to [`WeatherSnapshot::unknown`] carrying the error, and
//! degraded snapshots are not cached.

use crate::cache::TtlCache;
use crate::credentials::CredentialPool;
use crate::geo::pooled_call;
use crate::provider::{GeoProvider, LiveWeather};
use crate::retry::RetryPolicy;
use crate::metrics;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default lifetime of a cached snapshot.
pub const DEFAULT_WEATHER_TTL: Duration = Duration::from_secs(10 * 60);

/// Wind level used when the description is missing or unrecognised.
pub const DEFAULT_WIND_LEVEL: u8 = 2;

/// Weather at a node, as fed to scoring and echoed in responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshot {
    /// Free-text condition; serialised as `"unknown"` when absent.
    #[serde(rename = "weather", serialize_with = "condition_or_unknown")]
    pub condition: Option<String>,
    #[serde(rename = "temperature")]
    pub temperature_c: Option<f64>,
    #[serde(rename = "humidity")]
    pub humidity_pct: Option<f64>,
    /// Wind level 1..=6.
    #[serde(rename = "windSpeed")]
    pub wind_level: Option<u8>,
    #[serde(rename = "weatherError", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn condition_or_unknown<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(value.as_deref().unwrap_or("unknown"))
}

impl WeatherSnapshot {
    /// Snapshot with no readings, recording why.
    pub fn unknown(error: impl Into<String>) -> Self {
        Self {
            condition: None,
            temperature_c: None,
            humidity_pct: None,
            wind_level: None,
            error: Some(error.into()),
        }
    }

    /// `true` for a degraded snapshot.
    pub fn is_unknown(&self) -> bool {
        self.error.is_some()
    }

    fn from_live(live: LiveWeather) -> Self {
        Self {
            wind_level: Some(wind_level(live.wind_power.as_deref())),
            condition: live.condition,
            temperature_c: live.temperature_c,
            humidity_pct: live.humidity_pct,
            error: None,
        }
    }
}

/// Map a wind-power description (`"≤3"`, `"4-5"`, `"12"`, …) to a level
/// 1..=6 using the first number it contains.
///
/// ```text
/// ≤3 → 1   4-5 → 2   6-7 → 3   8-9 → 4   10-11 → 5   ≥12 → 6
/// ```
///
/// Missing or unparseable descriptions map to [`DEFAULT_WIND_LEVEL`].
pub fn wind_level(description: Option<&str>) -> u8 {
    let Some(text) = description else {
        return DEFAULT_WIND_LEVEL;
    };
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    match digits.parse::<u32>() {
        Ok(0..=3) => 1,
        Ok(4..=5) => 2,
        Ok(6..=7) => 3,
        Ok(8..=9) => 4,
        Ok(10..=11) => 5,
        Ok(_) => 6,
        Err(_) => DEFAULT_WIND_LEVEL,
    }
}

/// Weather lookups through the credential pool.
pub struct WeatherResolver {
    provider: Arc<dyn GeoProvider>,
    pool: CredentialPool,
    retry: RetryPolicy,
    cache: TtlCache<String, WeatherSnapshot>,
}

impl WeatherResolver {
    pub fn new(
        provider: Arc<dyn GeoProvider>,
        pool: CredentialPool,
        retry: RetryPolicy,
        ttl: Duration,
        max_entries: usize,
    ) -> Self {
        Self {
            provider,
            pool,
            retry,
            cache: TtlCache::new("weather", ttl, max_entries),
        }
    }

    /// Current weather for `region_code`. Never fails.
    pub async fn weather_for(&self, region_code: &str) -> WeatherSnapshot {
        let code = region_code.trim();
        if code.is_empty() {
            return WeatherSnapshot::unknown("missing region code");
        }
        if let Some(cached) = self.cache.get(&code.to_string()) {
            debug!(region_code = code, "weather cache hit");
            return cached;
        }

        let provider = &self.provider;
        let result = pooled_call(&self.pool, &self.retry, |credential| async move {
            provider.live_weather(&credential, code).await
        })
        .await;

        match result {
            Ok(live) => {
                let snapshot = WeatherSnapshot::from_live(live);
                self.cache.set(code.to_string(), snapshot.clone());
                snapshot
            }
            Err(e) => {
                warn!(region_code = code, error = %e, "weather lookup failed");
                metrics::inc_degraded("weather", e.kind());
                WeatherSnapshot::unknown(format!("weather lookup failed: {e}"))
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::provider::{AddressDetail, AddressInfo, ProviderError};
    use crate::Coordinates;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeWeather {
        calls: AtomicUsize,
        failures_left: Mutex<usize>,
        failure: ProviderError,
    }

    impl FakeWeather {
        fn healthy() -> Arc<Self> {
            Self::failing(0, ProviderError::RateLimited)
        }

        fn failing(times: usize, failure: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures_left: Mutex::new(times),
                failure,
            })
        }
    }

    #[async_trait]
    impl GeoProvider for FakeWeather {
        async fn reverse_geocode(
            &self,
            _: &Credential,
            _: Coordinates,
            _: AddressDetail,
        ) -> Result<AddressInfo, ProviderError> {
            Err(ProviderError::Unavailable("not scripted".into()))
        }

        async fn live_weather(
            &self,
            _: &Credential,
            region_code: &str,
        ) -> Result<LiveWeather, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(self.failure.clone());
                }
            }
            Ok(LiveWeather {
                condition: Some(format!("晴 {region_code}")),
                temperature_c: Some(21.0),
                humidity_pct: Some(40.0),
                wind_power: Some("4-5".into()),
            })
        }
    }

    fn resolver(provider: Arc<FakeWeather>, attempts: usize) -> WeatherResolver {
        let pool = CredentialPool::new(
            vec!["k1".into(), "k2".into(), "k3".into()],
            Duration::from_millis(1),
        )
        .unwrap();
        WeatherResolver::new(
            provider,
            pool,
            RetryPolicy::fixed(attempts, Duration::ZERO),
            DEFAULT_WEATHER_TTL,
            0,
        )
    }

    #[test]
    fn test_wind_level_bands() {
        let cases = [
            (Some("≤3"), 1),
            (Some("3"), 1),
            (Some("4-5"), 2),
            (Some("6-7"), 3),
            (Some("8-9"), 4),
            (Some("10-11"), 5),
            (Some("12"), 6),
            (Some("≥17"), 6),
            (Some("calm"), DEFAULT_WIND_LEVEL),
            (Some(""), DEFAULT_WIND_LEVEL),
            (None, DEFAULT_WIND_LEVEL),
        ];
        for (input, expected) in cases {
            assert_eq!(wind_level(input), expected, "{input:?}");
        }
    }

    #[test]
    fn test_unknown_snapshot_serialises_placeholder() {
        let json = serde_json::to_value(WeatherSnapshot::unknown("boom")).unwrap();
        assert_eq!(json["weather"], "unknown");
        assert_eq!(json["weatherError"], "boom");
        assert!(json["temperature"].is_null());
    }

    #[tokio::test]
    async fn test_successful_lookup_is_cached() {
        let provider = FakeWeather::healthy();
        let weather = resolver(provider.clone(), 3);

        let first = weather.weather_for("420102").await;
        let second = weather.weather_for("420102").await;

        assert_eq!(first, second);
        assert_eq!(first.wind_level, Some(2));
        assert!(!first.is_unknown());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let provider = FakeWeather::healthy();
        let weather = resolver(provider.clone(), 3);

        weather.weather_for("420102").await;
        tokio::time::advance(DEFAULT_WEATHER_TTL + Duration::from_secs(1)).await;
        weather.weather_for("420102").await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let provider = FakeWeather::failing(2, ProviderError::RateLimited);
        let weather = resolver(provider.clone(), 5);
        let snapshot = weather.weather_for("110101").await;
        assert!(!snapshot.is_unknown());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_degrades_and_is_not_cached() {
        let provider = FakeWeather::failing(1, ProviderError::Unavailable("no lives".into()));
        let weather = resolver(provider.clone(), 5);

        let degraded = weather.weather_for("999999").await;
        assert!(degraded.is_unknown());
        assert_eq!(degraded.condition, None);

        // Next call reaches the provider again and succeeds.
        let healthy = weather.weather_for("999999").await;
        assert!(!healthy.is_unknown());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_region_code_skips_provider() {
        let provider = FakeWeather::healthy();
        let weather = resolver(provider.clone(), 3);
        assert!(weather.weather_for("  ").await.is_unknown());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
