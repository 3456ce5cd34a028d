//! Prometheus metrics for the risk pipeline.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_provider_call`, `inc_cache_event`, …) are no-ops if `init_metrics`
//! was never called, so library users that do not care about metrics pay
//! nothing and the pipeline always runs.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `route_risk_provider_calls_total` | Counter | `provider`, `outcome` |
//! | `route_risk_cache_events_total` | Counter | `cache`, `event` |
//! | `route_risk_degraded_total` | Counter | `stage`, `reason` |
//! | `route_risk_stage_duration_seconds` | Histogram | `stage` |

use crate::RiskError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All pipeline metrics, stored together in one [`OnceLock`].
pub struct Metrics {
    /// Registry that owns every descriptor below.
    pub registry: Registry,
    /// Outbound provider calls by provider and outcome.
    pub provider_calls: CounterVec,
    /// Cache hits, misses, expiries, evictions and in-flight joins.
    pub cache_events: CounterVec,
    /// Lookups that fell back to an "unknown"/default value.
    pub degraded: CounterVec,
    /// Latency per pipeline stage.
    pub stage_duration: HistogramVec,
}

impl Metrics {
    /// Build a bundle whose metric names start with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`RiskError::Other`] if a descriptor is invalid or clashes
    /// with one already registered.
    fn build(prefix: &str) -> Result<Self, RiskError> {
        let registry = Registry::new();

        let provider_calls = counter(
            &registry,
            &format!("{prefix}_provider_calls_total"),
            "Outbound provider calls by outcome",
            &["provider", "outcome"],
        )?;
        let cache_events = counter(
            &registry,
            &format!("{prefix}_cache_events_total"),
            "Cache events by cache name",
            &["cache", "event"],
        )?;
        let degraded = counter(
            &registry,
            &format!("{prefix}_degraded_total"),
            "Lookups that degraded to a fallback value",
            &["stage", "reason"],
        )?;

        let stage_duration = HistogramVec::new(
            HistogramOpts::new(
                format!("{prefix}_stage_duration_seconds"),
                "Processing duration per stage",
            ),
            &["stage"],
        )
        .map_err(|e| RiskError::Other(format!("metrics init failed: {e}")))?;
        registry
            .register(Box::new(stage_duration.clone()))
            .map_err(|e| RiskError::Other(format!("metrics registration failed: {e}")))?;

        Ok(Self {
            registry,
            provider_calls,
            cache_events,
            degraded,
            stage_duration,
        })
    }
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<CounterVec, RiskError> {
    let c = CounterVec::new(Opts::new(name, help), labels)
        .map_err(|e| RiskError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(c.clone()))
        .map_err(|e| RiskError::Other(format!("metrics registration failed: {e}")))?;
    Ok(c)
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all metrics in a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`RiskError::Other`] if metric construction or registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), RiskError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let bundle = Metrics::build("route_risk")?;
    // A racing initialiser produces identical descriptors; first one wins.
    let _ = METRICS.set(bundle);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one outbound provider call.
///
/// `outcome` is `"ok"` or the [`ProviderError`](crate::ProviderError) kind.
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_provider_call(provider: &str, outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .provider_calls
            .get_metric_with_label_values(&[provider, outcome])
        {
            c.inc();
        }
    }
}

/// Count one cache event (`hit`, `miss`, `expired`, `evicted`, `started`,
/// `shared`).
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_cache_event(cache: &str, event: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.cache_events.get_metric_with_label_values(&[cache, event]) {
            c.inc();
        }
    }
}

/// Count a lookup that degraded to its fallback value.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_degraded(stage: &str, reason: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.degraded.get_metric_with_label_values(&[stage, reason]) {
            c.inc();
        }
    }
}

/// Record the latency of one pipeline stage.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_stage_latency(stage: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.stage_duration.get_metric_with_label_values(&[stage]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Gather all registered metrics as raw metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Snapshot of the counters, keyed `"label_a:label_b"`.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Keyed `"provider:outcome"`.
    pub provider_calls: HashMap<String, u64>,
    /// Keyed `"cache:event"`.
    pub cache_events: HashMap<String, u64>,
    /// Keyed `"stage:reason"`.
    pub degraded: HashMap<String, u64>,
}

/// Return a structured summary of the current counter values.
///
/// Returns an empty [`MetricsSummary`] if metrics have not been initialised.
pub fn get_metrics_summary() -> MetricsSummary {
    let Some(m) = metrics() else {
        return MetricsSummary::default();
    };
    MetricsSummary {
        provider_calls: flatten(&m.provider_calls, "provider", "outcome"),
        cache_events: flatten(&m.cache_events, "cache", "event"),
        degraded: flatten(&m.degraded, "stage", "reason"),
    }
}

fn flatten(vec: &CounterVec, first: &str, second: &str) -> HashMap<String, u64> {
    let mut out = HashMap::new();
    for family in vec.collect() {
        for metric in family.get_metric() {
            let label = |name: &str| {
                metric
                    .get_label()
                    .iter()
                    .find(|l| l.get_name() == name)
                    .map_or("unknown", |l| l.get_value())
                    .to_string()
            };
            let key = format!("{}:{}", label(first), label(second));
            out.insert(key, metric.get_counter().get_value() as u64);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global OnceLock cannot be reset between tests, so tests asserting
    // exact values build an isolated bundle.
    fn make_test_metrics() -> Metrics {
        Metrics::build("t").expect("isolated metrics must build")
    }

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok(), "second call must be a no-op");
    }

    #[test]
    fn test_helpers_before_init_do_not_panic() {
        inc_provider_call("amap", "ok");
        inc_cache_event("weather", "hit");
        inc_degraded("road", "deadline");
        record_stage_latency("score", Duration::from_millis(3));
    }

    #[test]
    fn test_provider_call_counter_increments_per_label_pair() {
        let m = make_test_metrics();
        for _ in 0..3 {
            m.provider_calls
                .get_metric_with_label_values(&["amap", "rate_limited"])
                .expect("label ok")
                .inc();
        }
        let summary = flatten(&m.provider_calls, "provider", "outcome");
        assert_eq!(summary.get("amap:rate_limited"), Some(&3));
    }

    #[test]
    fn test_cache_events_keyed_by_cache_and_event() {
        let m = make_test_metrics();
        m.cache_events
            .get_metric_with_label_values(&["regeo", "shared"])
            .expect("label ok")
            .inc();
        m.cache_events
            .get_metric_with_label_values(&["weather", "miss"])
            .expect("label ok")
            .inc();
        let summary = flatten(&m.cache_events, "cache", "event");
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.get("regeo:shared"), Some(&1));
    }

    #[test]
    fn test_stage_latency_histogram_records_observation() {
        let m = make_test_metrics();
        m.stage_duration
            .get_metric_with_label_values(&["geometry"])
            .expect("label ok")
            .observe(0.002);
        let families = m.registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "t_stage_duration_seconds")
            .expect("histogram family must be present");
        assert_eq!(family.get_metric()[0].get_histogram().get_sample_count(), 1);
    }

    #[test]
    fn test_gather_non_empty_after_observation() {
        let _ = init_metrics();
        inc_degraded("weather", "gather-test");
        assert!(!gather().is_empty());
        let text = gather_metrics();
        assert!(text.contains("route_risk_degraded_total"));
    }

    #[test]
    fn test_summary_does_not_panic() {
        let summary = get_metrics_summary();
        let _ = summary.provider_calls.len() + summary.cache_events.len();
    }
}
