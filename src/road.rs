//! Road class and signal presence near a node
//!
//! Two sources race under one deadline each:
//!
//! ```text
//!             ┌─ open map data (road_near + signal_near) ─┐
//! resolve ────┤                                           ├─→ first informative result
//!             └─ primary Full reverse-geocode ────────────┘
//! ```
//!
//! A source that fails or misses its deadline resolves to
//! [`RoadInfo::FALLBACK`]. Both vocabularies are normalised to [`RoadClass`].

use crate::cache::InFlightCache;
use crate::geo::GeoResolver;
use crate::provider::{AddressDetail, RoadDataProvider};
use crate::{metrics, CoordKey, Coordinates};
use futures::future::{select, BoxFuture, Either, FutureExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default per-source deadline.
pub const DEFAULT_ROAD_DEADLINE: Duration = Duration::from_secs(3);
/// Default search radius for open map data, in metres.
pub const DEFAULT_ROAD_RADIUS_M: f64 = 20.0;

/// Normalised road class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RoadClass {
    Expressway,
    #[serde(rename = "Main Road")]
    MainRoad,
    #[serde(rename = "Local Road")]
    LocalRoad,
    #[serde(rename = "Service Road")]
    ServiceRoad,
}

impl RoadClass {
    /// Classify an OpenStreetMap `highway` tag.
    pub fn from_osm_highway(tag: &str) -> Option<Self> {
        match tag.trim() {
            "motorway" | "trunk" | "motorway_link" | "trunk_link" => Some(Self::Expressway),
            "primary" | "secondary" | "tertiary" | "primary_link" | "secondary_link"
            | "tertiary_link" => Some(Self::MainRoad),
            "residential" | "unclassified" | "living_street" => Some(Self::LocalRoad),
            "service" => Some(Self::ServiceRoad),
            _ => None,
        }
    }

    /// Classify a road level as reported by the primary provider.
    pub fn from_amap_level(level: &str) -> Option<Self> {
        match level.trim() {
            "高速路" | "城市高速路" | "快速路" | "国道" => Some(Self::Expressway),
            "主干路" | "次干路" | "省道" => Some(Self::MainRoad),
            "支路" | "县道" | "乡村道路" => Some(Self::LocalRoad),
            "其他道路" => Some(Self::ServiceRoad),
            _ => None,
        }
    }
}

/// Road attributes of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadInfo {
    pub road_type: Option<RoadClass>,
    pub has_signal: bool,
}

impl RoadInfo {
    /// Result of a source that failed or timed out.
    pub const FALLBACK: Self = Self {
        road_type: None,
        has_signal: false,
    };

    /// `true` if the source told us anything.
    pub fn is_informative(&self) -> bool {
        self.road_type.is_some() || self.has_signal
    }
}

impl Default for RoadInfo {
    fn default() -> Self {
        Self::FALLBACK
    }
}

/// Both sources failed, timed out or had nothing to say. Not cached.
#[derive(Debug, Clone, Copy)]
struct Uninformative;

/// Races both road sources per rounded coordinate.
pub struct RoadInfoResolver {
    geo: Arc<GeoResolver>,
    road_data: Arc<dyn RoadDataProvider>,
    radius_m: f64,
    deadline: Duration,
    cache: InFlightCache<CoordKey, Result<RoadInfo, Uninformative>>,
}

impl RoadInfoResolver {
    pub fn new(
        geo: Arc<GeoResolver>,
        road_data: Arc<dyn RoadDataProvider>,
        radius_m: f64,
        deadline: Duration,
        max_entries: usize,
    ) -> Self {
        Self {
            geo,
            road_data,
            radius_m,
            deadline,
            cache: InFlightCache::bounded("road", max_entries),
        }
    }

    /// Road info near `at`. Never fails; concurrent callers for the same
    /// rounded coordinate share one race. Only informative answers stay
    /// cached, so a timed-out race is retried by the next caller.
    pub async fn resolve(&self, at: Coordinates) -> RoadInfo {
        let key = at.key();
        let geo = Arc::clone(&self.geo);
        let road_data = Arc::clone(&self.road_data);
        let radius_m = self.radius_m;
        let deadline = self.deadline;

        self.cache
            .get_or_try_compute(key, move || async move {
                let started = Instant::now();
                let at = key.coordinates();
                let open_map =
                    within_deadline("open_map", deadline, from_open_map(road_data, at, radius_m))
                        .boxed();
                let primary = within_deadline("primary", deadline, from_primary(geo, at)).boxed();
                let info = first_informative(open_map, primary).await;
                debug!(at = %key, ?info, "road info resolved");
                metrics::record_stage_latency("road", started.elapsed());
                if info.is_informative() {
                    Ok(info)
                } else {
                    Err(Uninformative)
                }
            })
            .await
            .unwrap_or(RoadInfo::FALLBACK)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Take whichever source completes first; if that answer is the fallback,
/// wait for the other one.
async fn first_informative(a: BoxFuture<'static, RoadInfo>, b: BoxFuture<'static, RoadInfo>) -> RoadInfo {
    match select(a, b).await {
        Either::Left((info, other)) | Either::Right((info, other)) => {
            if info.is_informative() {
                info
            } else {
                other.await
            }
        }
    }
}

async fn within_deadline<F>(source: &'static str, deadline: Duration, lookup: F) -> RoadInfo
where
    F: Future<Output = RoadInfo>,
{
    match tokio::time::timeout(deadline, lookup).await {
        Ok(info) => info,
        Err(_) => {
            debug!(source, deadline_ms = deadline.as_millis() as u64, "road source timed out");
            metrics::inc_degraded("road", "deadline");
            RoadInfo::FALLBACK
        }
    }
}

async fn from_open_map(
    road_data: Arc<dyn RoadDataProvider>,
    at: Coordinates,
    radius_m: f64,
) -> RoadInfo {
    let (road, signal) = tokio::join!(
        road_data.road_near(at, radius_m),
        road_data.signal_near(at, radius_m)
    );
    let road_type = match road {
        Ok(tag) => tag.as_deref().and_then(RoadClass::from_osm_highway),
        Err(e) => {
            warn!(error = %e, "open map road lookup failed");
            metrics::inc_degraded("road_open_map", e.kind());
            None
        }
    };
    let has_signal = signal.unwrap_or_else(|e| {
        warn!(error = %e, "open map signal lookup failed");
        metrics::inc_degraded("road_open_map", e.kind());
        false
    });
    RoadInfo {
        road_type,
        has_signal,
    }
}

async fn from_primary(geo: Arc<GeoResolver>, at: Coordinates) -> RoadInfo {
    match geo.reverse_geocode(at, AddressDetail::Full).await {
        Ok(address) => RoadInfo {
            road_type: address
                .nearest_road_level
                .as_deref()
                .and_then(RoadClass::from_amap_level),
            has_signal: address.nearest_intersection_signal,
        },
        Err(e) => {
            warn!(error = %e, "primary road lookup failed");
            metrics::inc_degraded("road_primary", e.kind());
            RoadInfo::FALLBACK
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, CredentialPool};
    use crate::provider::{AddressInfo, GeoProvider, LiveWeather, ProviderError};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    struct FakeOpenMap {
        highway: Option<&'static str>,
        signal: bool,
        delay_ms: AtomicU64,
        calls: AtomicUsize,
    }

    impl FakeOpenMap {
        fn delay(&self) -> Duration {
            Duration::from_millis(self.delay_ms.load(Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl RoadDataProvider for FakeOpenMap {
        async fn road_near(&self, _: Coordinates, _: f64) -> Result<Option<String>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay()).await;
            Ok(self.highway.map(str::to_string))
        }

        async fn signal_near(&self, _: Coordinates, _: f64) -> Result<bool, ProviderError> {
            tokio::time::sleep(self.delay()).await;
            Ok(self.signal)
        }
    }

    struct FakePrimary {
        level: Option<&'static str>,
        signal: bool,
        delay: Duration,
    }

    #[async_trait]
    impl GeoProvider for FakePrimary {
        async fn reverse_geocode(
            &self,
            _: &Credential,
            _: Coordinates,
            _: AddressDetail,
        ) -> Result<AddressInfo, ProviderError> {
            tokio::time::sleep(self.delay).await;
            match self.level {
                Some(level) => Ok(AddressInfo {
                    nearest_road_level: Some(level.into()),
                    nearest_intersection_signal: self.signal,
                    ..AddressInfo::default()
                }),
                None => Err(ProviderError::Unavailable("no roads".into())),
            }
        }

        async fn live_weather(&self, _: &Credential, _: &str) -> Result<LiveWeather, ProviderError> {
            Err(ProviderError::Unavailable("not scripted".into()))
        }
    }

    fn open_map(highway: Option<&'static str>, signal: bool, delay_ms: u64) -> Arc<FakeOpenMap> {
        Arc::new(FakeOpenMap {
            highway,
            signal,
            delay_ms: AtomicU64::new(delay_ms),
            calls: AtomicUsize::new(0),
        })
    }

    fn resolver(primary: FakePrimary, open_map: Arc<FakeOpenMap>) -> RoadInfoResolver {
        let pool = CredentialPool::new(vec!["k".into()], Duration::ZERO).unwrap();
        let geo = GeoResolver::new(
            Arc::new(primary),
            pool,
            RetryPolicy::fixed(1, Duration::ZERO),
            Duration::from_secs(60),
            0,
        );
        RoadInfoResolver::new(
            Arc::new(geo),
            open_map,
            DEFAULT_ROAD_RADIUS_M,
            DEFAULT_ROAD_DEADLINE,
            100,
        )
    }

    const AT: Coordinates = Coordinates {
        lat: 30.5928,
        lng: 114.3052,
    };

    #[test]
    fn test_vocabularies_normalise_to_same_classes() {
        assert_eq!(RoadClass::from_osm_highway("motorway"), Some(RoadClass::Expressway));
        assert_eq!(RoadClass::from_osm_highway("tertiary"), Some(RoadClass::MainRoad));
        assert_eq!(RoadClass::from_osm_highway("living_street"), Some(RoadClass::LocalRoad));
        assert_eq!(RoadClass::from_osm_highway("footway"), None);
        assert_eq!(RoadClass::from_amap_level("快速路"), Some(RoadClass::Expressway));
        assert_eq!(RoadClass::from_amap_level("次干路"), Some(RoadClass::MainRoad));
        assert_eq!(RoadClass::from_amap_level("其他道路"), Some(RoadClass::ServiceRoad));
        assert_eq!(RoadClass::from_amap_level("motorway"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_faster_informative_source_wins() {
        let road = resolver(
            FakePrimary { level: Some("主干路"), signal: true, delay: Duration::from_millis(500) },
            open_map(Some("motorway"), false, 100),
        );
        let info = road.resolve(AT).await;
        assert_eq!(info.road_type, Some(RoadClass::Expressway));
        assert!(!info.has_signal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninformative_first_result_waits_for_other() {
        let road = resolver(
            FakePrimary { level: Some("支路"), signal: true, delay: Duration::from_millis(800) },
            open_map(None, false, 10),
        );
        let info = road.resolve(AT).await;
        assert_eq!(info.road_type, Some(RoadClass::LocalRoad));
        assert!(info.has_signal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_sources_past_deadline_yield_fallback() {
        let road = resolver(
            FakePrimary { level: Some("主干路"), signal: true, delay: Duration::from_secs(10) },
            open_map(Some("primary"), true, 10_000),
        );
        let started = tokio::time::Instant::now();
        let info = road.resolve(AT).await;
        assert_eq!(info, RoadInfo::FALLBACK);
        assert!(started.elapsed() <= DEFAULT_ROAD_DEADLINE + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_error_falls_back_to_open_map() {
        let road = resolver(
            FakePrimary { level: None, signal: false, delay: Duration::ZERO },
            open_map(Some("service"), false, 200),
        );
        assert_eq!(road.resolve(AT).await.road_type, Some(RoadClass::ServiceRoad));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_cell_is_resolved_once() {
        let open_map = open_map(Some("residential"), false, 50);
        let road = resolver(
            FakePrimary { level: None, signal: false, delay: Duration::ZERO },
            Arc::clone(&open_map),
        );
        let nearby = Coordinates::new(30.59281, 114.30521);
        let (a, b) = tokio::join!(road.resolve(AT), road.resolve(nearby));
        assert_eq!(a, b);
        assert_eq!(open_map.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_race_is_not_cached() {
        let open_map = open_map(Some("residential"), false, 10_000);
        let road = resolver(
            FakePrimary { level: None, signal: false, delay: Duration::ZERO },
            Arc::clone(&open_map),
        );

        assert_eq!(road.resolve(AT).await, RoadInfo::FALLBACK);
        assert_eq!(open_map.calls.load(Ordering::SeqCst), 1);

        // Upstream recovers; the next lookup must ask again.
        open_map.delay_ms.store(10, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(3600)).await;
        let info = road.resolve(AT).await;
        assert_eq!(info.road_type, Some(RoadClass::LocalRoad));
        assert_eq!(open_map.calls.load(Ordering::SeqCst), 2);

        // Informative answers stay cached.
        road.resolve(AT).await;
        assert_eq!(open_map.calls.load(Ordering::SeqCst), 2);
    }
}
