//! Geocoding on top of the credential pool
//!
//! Every primary-provider call goes through [`pooled_call`]: acquire a
//! credential, call, penalize the credential on a rate-limit signal, and
//! retry transient failures under the configured [`RetryPolicy`].
//!
//! Reverse geocodes are de-duplicated per rounded coordinate and detail
//! level with an [`InFlightCache`]; successful place names are held in a
//! [`TtlCache`].

use crate::cache::{InFlightCache, TtlCache};
use crate::credentials::{Credential, CredentialPool};
use crate::provider::{AddressDetail, AddressInfo, GeoProvider, ProviderError};
use crate::retry::{retry_if, RetryPolicy};
use crate::{metrics, CoordKey, Coordinates};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label used when no address component is known.
pub const UNKNOWN_PLACE: &str = "unknown";

/// Granularity of a six-digit region code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionLevel {
    /// `NN0000`
    Province,
    /// `NNNN00`
    City,
    /// Anything else, including malformed codes.
    Fine,
}

impl RegionLevel {
    /// Classify `code`. The province pattern is checked first, so `110000`
    /// is a province, not a city.
    pub fn classify(code: &str) -> Self {
        let bytes = code.as_bytes();
        if bytes.len() != 6 || !bytes.iter().all(u8::is_ascii_digit) {
            return Self::Fine;
        }
        if &bytes[2..] == b"0000" {
            Self::Province
        } else if &bytes[4..] == b"00" {
            Self::City
        } else {
            Self::Fine
        }
    }

    /// `true` for province- and city-level codes.
    pub fn is_coarse(self) -> bool {
        matches!(self, Self::Province | Self::City)
    }
}

/// Human-readable location of a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceName {
    /// Never empty; [`UNKNOWN_PLACE`] when nothing could be resolved.
    pub name: String,
    pub error: Option<String>,
}

impl PlaceName {
    fn from_address(address: &AddressInfo) -> Self {
        let name: String = [
            &address.province,
            &address.city,
            &address.district,
            &address.township,
            &address.street,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .collect();

        Self {
            name: if name.is_empty() {
                UNKNOWN_PLACE.to_string()
            } else {
                name
            },
            error: None,
        }
    }

    fn unknown(error: impl Into<String>) -> Self {
        Self {
            name: UNKNOWN_PLACE.to_string(),
            error: Some(error.into()),
        }
    }
}

/// Run one primary-provider call under the pool and retry policy.
///
/// `call` receives a freshly acquired credential per attempt. A
/// [`ProviderError::RateLimited`] result penalizes that credential before
/// the next attempt; only retryable errors are retried.
pub(crate) async fn pooled_call<T, F, Fut>(
    pool: &CredentialPool,
    retry: &RetryPolicy,
    call: F,
) -> Result<T, ProviderError>
where
    F: Fn(Credential) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let call = &call;
    retry_if(
        retry,
        move || async move {
            let credential = pool.acquire().await;
            let result = call(credential.clone()).await;
            if matches!(result, Err(ProviderError::RateLimited)) {
                pool.penalize(&credential);
            }
            result
        },
        ProviderError::is_retryable,
    )
    .await
}

/// Reverse geocoding, place names and region-code downgrading.
pub struct GeoResolver {
    provider: Arc<dyn GeoProvider>,
    pool: CredentialPool,
    retry: RetryPolicy,
    regeo: InFlightCache<(CoordKey, AddressDetail), Result<AddressInfo, ProviderError>>,
    places: TtlCache<CoordKey, PlaceName>,
}

impl GeoResolver {
    /// - `place_ttl`: lifetime of a cached place name
    /// - `max_entries`: capacity of both the reverse-geocode and the
    ///   place-name cache (`0` = unbounded)
    pub fn new(
        provider: Arc<dyn GeoProvider>,
        pool: CredentialPool,
        retry: RetryPolicy,
        place_ttl: Duration,
        max_entries: usize,
    ) -> Self {
        Self {
            provider,
            pool,
            retry,
            regeo: InFlightCache::bounded("regeo", max_entries),
            places: TtlCache::new("place", place_ttl, max_entries),
        }
    }

    /// Reverse-geocode `at`, keyed on the coordinate rounded to three
    /// decimals. Concurrent callers for the same key and detail share one
    /// provider round-trip; a failed lookup is evicted so the next caller
    /// tries again.
    ///
    /// # Errors
    ///
    /// The last [`ProviderError`] once retries are exhausted, or the first
    /// non-retryable one.
    pub async fn reverse_geocode(
        &self,
        at: Coordinates,
        detail: AddressDetail,
    ) -> Result<AddressInfo, ProviderError> {
        let key = at.key();
        let provider = Arc::clone(&self.provider);
        let pool = self.pool.clone();
        let retry = self.retry.clone();
        // All callers sharing a key see the rounded coordinate.
        let rounded = key.coordinates();

        self.regeo
            .get_or_try_compute((key, detail), move || async move {
                pooled_call(&pool, &retry, move |credential| {
                    let provider = Arc::clone(&provider);
                    async move {
                        provider
                            .reverse_geocode(&credential, rounded, detail)
                            .await
                    }
                })
                .await
            })
            .await
    }

    /// Most specific place name for `at`: province, city, district,
    /// township and street concatenated, skipping missing parts.
    ///
    /// Never fails; an unresolvable point yields [`UNKNOWN_PLACE`] with the
    /// error recorded.
    pub async fn resolve_place_name(&self, at: Coordinates) -> PlaceName {
        let key = at.key();
        if let Some(cached) = self.places.get(&key) {
            return cached;
        }

        match self.reverse_geocode(at, AddressDetail::Basic).await {
            Ok(address) => {
                let place = PlaceName::from_address(&address);
                self.places.set(key, place.clone());
                place
            }
            Err(e) => {
                warn!(at = %key, error = %e, "place name lookup failed");
                metrics::inc_degraded("place", e.kind());
                PlaceName::unknown(format!("reverse geocode failed: {e}"))
            }
        }
    }

    /// Replace a province- or city-level `region_code` with the fine code
    /// of `at` (falling back to the provider's city code).
    ///
    /// Fine codes are returned unchanged without a lookup. When the lookup
    /// fails or returns no code, the original code passes through.
    pub async fn downgrade_if_coarse(&self, region_code: &str, at: Coordinates) -> String {
        let level = RegionLevel::classify(region_code);
        if !level.is_coarse() {
            return region_code.to_string();
        }

        match self.reverse_geocode(at, AddressDetail::Basic).await {
            Ok(address) => {
                let finer = address
                    .adcode
                    .or(address.citycode)
                    .filter(|c| !c.trim().is_empty());
                match finer {
                    Some(code) => {
                        debug!(from = region_code, to = %code, ?level, "region code downgraded");
                        code
                    }
                    None => {
                        metrics::inc_degraded("downgrade", "no_code");
                        region_code.to_string()
                    }
                }
            }
            Err(e) => {
                warn!(region_code, error = %e, "region downgrade failed, keeping coarse code");
                metrics::inc_degraded("downgrade", e.kind());
                region_code.to_string()
            }
        }
    }

    /// Drop the reverse-geocode and place-name caches.
    pub fn clear_caches(&self) {
        self.regeo.clear();
        self.places.clear();
        info!("geo caches cleared");
    }
}
