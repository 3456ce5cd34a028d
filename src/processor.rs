//! # Route Processor
//!
//! ## Responsibility
//! Turn a route-planning request into per-node reports and per-route risk
//! summaries. Each node runs its own pipeline; nodes and routes all run
//! concurrently:
//!
//! ```text
//! node ─→ (region downgrade ∥ road race ∥ geometry)
//!      ─→ (weather ∥ place name)
//!      ─→ risk (request-scoped cache keyed by region code + departure)
//! route ─→ max / avg / high-risk points / suggestion
//! ```
//!
//! ## Guarantees
//! - Every node carries a risk value; failures degrade to `0.0` with the
//!   reason recorded on the node.
//! - No node or route failure aborts the batch.
//! - Output order matches input order for routes and nodes.
//! - The risk cache lives exactly as long as one top-level call.

use crate::cache::InFlightCache;
use crate::config::{validation, CachePolicy, PipelineConfig};
use crate::credentials::CredentialPool;
use crate::geo::{GeoResolver, PlaceName, UNKNOWN_PLACE};
use crate::geometry::{self, Alignment, Curvature};
use crate::provider::{
    lenient_f64, lenient_string, AmapProvider, GeoProvider, HttpPredictionEndpoint,
    OverpassProvider, PredictionEndpoint, RoadDataProvider,
};
use crate::road::{RoadClass, RoadInfo, RoadInfoResolver};
use crate::scoring::{RiskResult, RiskScorer, RoadAttributes, ScoringError};
use crate::summary::{BandThresholds, RiskBand, RouteRiskLevel, VehicleType};
use crate::weather::{WeatherResolver, WeatherSnapshot};
use crate::{metrics, Coordinates, RiskError};
use futures::future::join_all;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};

const MISSING_COORDINATES: &str = "node is missing coordinates";

type RiskKey = (String, Option<String>);
type RiskCache = InFlightCache<RiskKey, Result<RiskResult, ScoringError>>;

// ── Request ──────────────────────────────────────────────────────────────

/// Top-level request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutePlanRequest {
    pub paths: Vec<PathInput>,
}

/// One candidate route. Nodes are `origin`, `waypoints…`, `destination`.
///
/// Decoding never fails on node content: a node that cannot be read
/// becomes a node without coordinates and is reported as such.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathInput {
    #[serde(default, deserialize_with = "lenient_node")]
    pub origin: Option<NodeInput>,
    #[serde(default, deserialize_with = "lenient_nodes")]
    pub waypoints: Vec<NodeInput>,
    #[serde(default, deserialize_with = "lenient_node")]
    pub destination: Option<NodeInput>,
    /// Departure time; `None` means now.
    #[serde(default, deserialize_with = "lenient_string")]
    pub depart_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vehicle_type: Option<String>,
}

impl PathInput {
    fn nodes(&self) -> impl Iterator<Item = &NodeInput> {
        self.origin
            .iter()
            .chain(&self.waypoints)
            .chain(self.destination.iter())
    }

    /// Decode one entry of `paths`. Anything that is not an object is an
    /// empty route.
    fn from_json(index: usize, value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(route = index, error = %e, "unreadable path, treating as empty");
            Self::default()
        })
    }
}

/// A route node as sent by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeInput {
    /// Six-digit region code; numbers are accepted.
    #[serde(default, deserialize_with = "region_code")]
    pub adcode: String,
    /// Numbers or numeric strings.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lng: Option<f64>,
    /// Adjacent points on the route, used for curvature. Unreadable
    /// entries are skipped.
    #[serde(default, deserialize_with = "lenient_neighbors")]
    pub neighbors: Vec<Coordinates>,
}

impl NodeInput {
    fn coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => {
                Some(Coordinates::new(lat, lng))
            }
            _ => None,
        }
    }

    fn from_json(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

fn region_code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_u64() {
            Some(code) => code.to_string(),
            None => n.to_string(),
        },
        _ => String::new(),
    })
}

fn lenient_node<'de, D>(deserializer: D) -> Result<Option<NodeInput>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        other => Some(NodeInput::from_json(other)),
    })
}

fn lenient_nodes<'de, D>(deserializer: D) -> Result<Vec<NodeInput>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().map(NodeInput::from_json).collect(),
        _ => Vec::new(),
    })
}

fn lenient_neighbors<'de, D>(deserializer: D) -> Result<Vec<Coordinates>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<Coordinates>(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

// ── Response ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlanResponse {
    pub request_id: String,
    pub routes: Vec<RouteReport>,
    pub route_risks: Vec<RouteRisk>,
}

/// Per-route node detail.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteReport {
    pub risk_level: RouteRiskLevel,
    pub nodes: Vec<NodeReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    /// Region code after downgrading.
    pub adcode: String,
    pub name: String,
    #[serde(flatten)]
    pub weather: WeatherSnapshot,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub risk: f64,
    pub crash_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_error: Option<String>,
    pub road_type: Option<RoadClass>,
    pub has_signal: bool,
    pub curvature: Option<f64>,
    pub alignment: Alignment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskPoint {
    pub adcode: String,
    pub lng: Option<f64>,
    pub lat: Option<f64>,
    pub risk: f64,
    pub crash_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HighRiskPoint {
    #[serde(flatten)]
    pub point: RiskPoint,
    pub band: RiskBand,
    pub description: &'static str,
    pub suggestion: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub start: String,
    pub end: String,
    pub max_risk: f64,
    pub avg_risk: f64,
    pub vehicle_type: VehicleType,
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRisk {
    pub points: Vec<RiskPoint>,
    pub high_risk_points: Vec<HighRiskPoint>,
    pub summary: RouteSummary,
}

// ── Processor ────────────────────────────────────────────────────────────

/// Owns every resolver and the scorer; shared across requests.
pub struct RouteProcessor {
    geo: Arc<GeoResolver>,
    weather: WeatherResolver,
    road: RoadInfoResolver,
    scorer: Arc<RiskScorer>,
    cache_policy: CachePolicy,
    high_risk_threshold: f64,
    bands: BandThresholds,
    advice_bands: BandThresholds,
}

impl RouteProcessor {
    /// Build a processor over the given collaborators.
    ///
    /// # Errors
    ///
    /// [`RiskError::ConfigError`] if `config` fails validation.
    pub fn new(
        config: &PipelineConfig,
        geo_provider: Arc<dyn GeoProvider>,
        road_data: Arc<dyn RoadDataProvider>,
        endpoint: Arc<dyn PredictionEndpoint>,
    ) -> Result<Self, RiskError> {
        validation::validate(config).map_err(|errors| {
            RiskError::ConfigError(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;

        let p = &config.provider;
        let pool = CredentialPool::with_timing(
            p.credentials.clone(),
            Duration::from_millis(p.min_interval_ms),
            Duration::from_millis(p.cool_down_ms),
            Duration::from_millis(p.poll_interval_ms),
        )?;
        let retry = p.retry_policy();

        let geo = Arc::new(GeoResolver::new(
            Arc::clone(&geo_provider),
            pool.clone(),
            retry.clone(),
            Duration::from_secs(config.cache.place_ttl_s),
            config.cache.max_entries,
        ));
        let weather = WeatherResolver::new(
            geo_provider,
            pool,
            retry,
            Duration::from_secs(config.cache.weather_ttl_s),
            config.cache.max_entries,
        );
        let road = RoadInfoResolver::new(
            Arc::clone(&geo),
            road_data,
            config.road_data.radius_m,
            Duration::from_millis(config.road_data.deadline_ms),
            config.cache.max_entries,
        );
        let scorer = Arc::new(RiskScorer::new(endpoint, config.scoring.scorer_settings())?);

        info!(
            credentials = p.credentials.len(),
            cache_policy = ?config.cache.policy,
            "route processor ready"
        );

        Ok(Self {
            geo,
            weather,
            road,
            scorer,
            cache_policy: config.cache.policy,
            high_risk_threshold: config.scoring.high_risk_threshold,
            bands: config.scoring.bands,
            advice_bands: config.scoring.advice_bands,
        })
    }

    /// Build a processor with the HTTP providers named in `config`.
    ///
    /// # Errors
    ///
    /// [`RiskError::ConfigError`] if `config` fails validation.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, RiskError> {
        let geo_provider = AmapProvider::new(config.provider.base_url.clone())
            .with_timeout(Duration::from_millis(config.provider.request_timeout_ms));
        let road_data = OverpassProvider::new(config.road_data.base_url.clone())
            .with_timeout(Duration::from_millis(config.road_data.deadline_ms));
        let endpoint = HttpPredictionEndpoint::new(config.prediction.url.clone())
            .with_timeout(Duration::from_millis(config.prediction.timeout_ms));
        Self::new(
            config,
            Arc::new(geo_provider),
            Arc::new(road_data),
            Arc::new(endpoint),
        )
    }

    /// JSON entry point.
    ///
    /// # Errors
    ///
    /// [`RiskError::InvalidRequest`] if the body has no `paths` array.
    /// Unreadable paths and nodes degrade inside the response instead.
    pub async fn process_request_json(
        &self,
        body: Value,
    ) -> Result<RoutePlanResponse, RiskError> {
        if !body.get("paths").is_some_and(Value::is_array) {
            return Err(RiskError::InvalidRequest(
                "request body is missing the paths array".into(),
            ));
        }
        let paths: Vec<PathInput> = match body {
            Value::Object(mut fields) => match fields.remove("paths") {
                Some(Value::Array(items)) => items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| PathInput::from_json(index, item))
                    .collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(self.process_routes(&paths).await)
    }

    /// Assess every path concurrently.
    pub async fn process_routes(&self, paths: &[PathInput]) -> RoutePlanResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let _reset = CacheReset::begin(self);
        let risk_cache: RiskCache = InFlightCache::new("risk");

        info!(request_id = %request_id, routes = paths.len(), "route planning started");

        let results = join_all(paths.iter().enumerate().map(|(index, path)| {
            self.process_route(path, &risk_cache)
                .instrument(info_span!("route_risk.route", request_id = %request_id, route = index))
        }))
        .await;

        let (routes, route_risks): (Vec<_>, Vec<_>) = results.into_iter().unzip();
        metrics::record_stage_latency("request", started.elapsed());
        info!(
            request_id = %request_id,
            routes = routes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "route planning finished"
        );

        RoutePlanResponse {
            request_id,
            routes,
            route_risks,
        }
    }

    /// Drop the shared geocode, place, weather and road caches.
    pub fn clear_shared_caches(&self) {
        self.geo.clear_caches();
        self.weather.clear_cache();
        self.road.clear_cache();
    }

    async fn process_route(&self, path: &PathInput, risk_cache: &RiskCache) -> (RouteReport, RouteRisk) {
        let started = Instant::now();
        let depart = path.depart_time.as_deref();
        let vehicle = VehicleType::parse(path.vehicle_type.as_deref());

        let nodes = join_all(path.nodes().map(|node| self.process_node(node, depart, risk_cache))).await;

        let count = nodes.len();
        let max_risk = nodes.iter().map(|n| n.risk).fold(0.0_f64, f64::max);
        let avg_risk = if count == 0 {
            0.0
        } else {
            nodes.iter().map(|n| n.risk).sum::<f64>() / count as f64
        };

        let points: Vec<RiskPoint> = nodes
            .iter()
            .map(|n| RiskPoint {
                adcode: n.adcode.clone(),
                lng: n.lng,
                lat: n.lat,
                risk: n.risk,
                crash_type: n.crash_type.clone(),
            })
            .collect();
        let high_risk_points = points
            .iter()
            .filter(|p| p.risk >= self.high_risk_threshold)
            .map(|p| {
                let band = self.bands.band(p.risk);
                HighRiskPoint {
                    point: p.clone(),
                    band,
                    description: band.description(),
                    suggestion: self.advice_bands.band(p.risk).suggestion(),
                }
            })
            .collect::<Vec<_>>();

        let summary = RouteSummary {
            start: nodes.first().map(|n| n.name.clone()).unwrap_or_default(),
            end: nodes.last().map(|n| n.name.clone()).unwrap_or_default(),
            max_risk,
            avg_risk,
            vehicle_type: vehicle,
            suggestion: self.bands.overall_suggestion(avg_risk, max_risk, vehicle),
        };
        let risk_level = self.bands.route_level(avg_risk);

        info!(
            nodes = count,
            max_risk,
            avg_risk,
            high_risk = high_risk_points.len(),
            ?risk_level,
            "route assessed"
        );
        metrics::record_stage_latency("route", started.elapsed());

        (
            RouteReport { risk_level, nodes },
            RouteRisk {
                points,
                high_risk_points,
                summary,
            },
        )
    }

    async fn process_node(
        &self,
        node: &NodeInput,
        depart: Option<&str>,
        risk_cache: &RiskCache,
    ) -> NodeReport {
        let Some(at) = node.coordinates() else {
            warn!(adcode = %node.adcode, "skipping node without coordinates");
            metrics::inc_degraded("node", "missing_coordinates");
            return NodeReport {
                adcode: node.adcode.clone(),
                name: UNKNOWN_PLACE.to_string(),
                weather: WeatherSnapshot::unknown(MISSING_COORDINATES),
                lat: node.lat,
                lng: node.lng,
                risk: 0.0,
                crash_type: None,
                city_error: Some(MISSING_COORDINATES.into()),
                risk_error: Some(MISSING_COORDINATES.into()),
                road_type: None,
                has_signal: false,
                curvature: None,
                alignment: Alignment::StraightAndLevel,
            };
        };

        let (code, road) = tokio::join!(
            self.geo.downgrade_if_coarse(&node.adcode, at),
            self.road.resolve(at)
        );
        let curvature = geometry::curvature(at, &node.neighbors);

        let (weather, place) = tokio::join!(
            self.weather.weather_for(&code),
            self.geo.resolve_place_name(at)
        );

        let attributes = RoadAttributes {
            road_class: road.road_type,
            has_signal: road.has_signal,
            alignment: curvature.alignment,
        };
        let scored = self
            .score(risk_cache, &code, depart, &weather, attributes)
            .await;

        build_report(code, at, place, weather, road, curvature, scored)
    }

    /// Risk for `(code, depart)`, computed once per request. The first node
    /// to ask supplies the weather and road attributes.
    async fn score(
        &self,
        risk_cache: &RiskCache,
        code: &str,
        depart: Option<&str>,
        weather: &WeatherSnapshot,
        attributes: RoadAttributes,
    ) -> Result<RiskResult, ScoringError> {
        let key = (code.to_string(), depart.map(str::to_string));
        let scorer = Arc::clone(&self.scorer);
        let code = code.to_string();
        let depart = key.1.clone();
        let weather = weather.clone();

        risk_cache
            .get_or_try_compute(key, move || async move {
                scorer
                    .predict(&code, depart.as_deref(), &weather, &attributes)
                    .await
            })
            .await
    }
}

fn build_report(
    adcode: String,
    at: Coordinates,
    place: PlaceName,
    weather: WeatherSnapshot,
    road: RoadInfo,
    curvature: Curvature,
    scored: Result<RiskResult, ScoringError>,
) -> NodeReport {
    let (risk, crash_type, risk_error) = match scored {
        Ok(result) => (result.probability, Some(result.crash_type), None),
        Err(e) => {
            warn!(adcode = %adcode, error = %e, "node risk unavailable, using 0.0");
            metrics::inc_degraded("risk", "scoring_failed");
            (0.0, None, Some(e.to_string()))
        }
    };
    NodeReport {
        adcode,
        name: place.name,
        weather,
        lat: Some(at.lat),
        lng: Some(at.lng),
        risk,
        crash_type,
        city_error: place.error,
        risk_error,
        road_type: road.road_type,
        has_signal: road.has_signal,
        curvature: curvature.angle_degrees,
        alignment: curvature.alignment,
    }
}

/// Clears the shared caches on creation and drop under
/// [`CachePolicy::PerRequest`], so a cancelled call still leaves them empty.
struct CacheReset<'a> {
    processor: &'a RouteProcessor,
}

impl<'a> CacheReset<'a> {
    fn begin(processor: &'a RouteProcessor) -> Self {
        if processor.cache_policy == CachePolicy::PerRequest {
            processor.clear_shared_caches();
        }
        Self { processor }
    }
}

impl Drop for CacheReset<'_> {
    fn drop(&mut self) {
        if self.processor.cache_policy == CachePolicy::PerRequest {
            self.processor.clear_shared_caches();
        }
    }
}
