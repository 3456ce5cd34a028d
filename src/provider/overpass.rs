//! Overpass-style open map data interpreter.

use super::{ProviderError, RoadDataProvider};
use crate::{metrics, Coordinates};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Default public interpreter.
pub const DEFAULT_BASE_URL: &str = "https://overpass-api.de";

/// Client for an Overpass interpreter at `{base}/api/interpreter`.
pub struct OverpassProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OverpassProvider {
    /// Create a provider rooted at `base_url` with a 10 s request timeout.
    ///
    /// The road resolver applies its own, shorter deadline on top.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn query(&self, ql: String) -> Result<Vec<Element>, ProviderError> {
        let result = self.interpret(ql).await;
        metrics::inc_provider_call(
            "overpass",
            match &result {
                Ok(_) => "ok",
                Err(e) => e.kind(),
            },
        );
        result
    }

    async fn interpret(&self, ql: String) -> Result<Vec<Element>, ProviderError> {
        debug!(query = %ql, "overpass query");
        let response = self
            .client
            .get(format!("{}/api/interpreter", self.base_url))
            .query(&[("data", ql.as_str())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::Transport(format!("HTTP {status}")));
        }

        let body: OverpassResponse = response.json().await.map_err(ProviderError::from_reqwest)?;
        Ok(body.elements)
    }
}

fn around(radius_m: f64, at: Coordinates) -> String {
    format!("around:{},{},{}", radius_m, at.lat, at.lng)
}

#[async_trait]
impl RoadDataProvider for OverpassProvider {
    async fn road_near(
        &self,
        at: Coordinates,
        radius_m: f64,
    ) -> Result<Option<String>, ProviderError> {
        let elements = self
            .query(format!("[out:json];way({})[highway];out;", around(radius_m, at)))
            .await?;
        Ok(elements
            .into_iter()
            .find_map(|e| e.tags.get("highway").cloned()))
    }

    async fn signal_near(&self, at: Coordinates, radius_m: f64) -> Result<bool, ProviderError> {
        let elements = self
            .query(format!(
                "[out:json];node({})[highway=traffic_signals];out;",
                around(radius_m, at)
            ))
            .await?;
        Ok(!elements.is_empty())
    }
}

#[derive(Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<Element>,
}

#[derive(Deserialize)]
struct Element {
    #[serde(default)]
    tags: HashMap<String, String>,
}
