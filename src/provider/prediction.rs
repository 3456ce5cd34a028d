//! HTTP client for the accident-probability model.

use super::{Prediction, PredictionEndpoint, ProviderError};
use crate::metrics;
use crate::scoring::FeatureVector;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Default local model service.
pub const DEFAULT_URL: &str = "http://localhost:3001/api/predict";

/// POSTs the feature vector as JSON and reads the probability back.
///
/// Accepts both the nested `{probability: {accident_prob, crash_type}}`
/// shape and the flat `{accidentProbability, crashType}` shape.
pub struct HttpPredictionEndpoint {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpPredictionEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post(&self, features: &FeatureVector) -> Result<Prediction, ProviderError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(features)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transport(format!("HTTP {status}: {text}")));
        }

        let body: PredictionResponse =
            response.json().await.map_err(ProviderError::from_reqwest)?;
        let prediction = body.into_prediction();
        if !prediction.accident_prob.is_finite() {
            return Err(ProviderError::Malformed(format!(
                "non-finite probability {}",
                prediction.accident_prob
            )));
        }
        Ok(prediction)
    }
}

#[async_trait]
impl PredictionEndpoint for HttpPredictionEndpoint {
    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, ProviderError> {
        let result = self.post(features).await;
        metrics::inc_provider_call(
            "prediction",
            match &result {
                Ok(_) => "ok",
                Err(e) => e.kind(),
            },
        );
        result
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PredictionResponse {
    Nested {
        probability: NestedProbability,
    },
    Flat {
        #[serde(rename = "accidentProbability")]
        accident_probability: f64,
        #[serde(rename = "crashType", default)]
        crash_type: Option<String>,
    },
}

#[derive(Deserialize)]
struct NestedProbability {
    accident_prob: f64,
    #[serde(default)]
    crash_type: Option<String>,
}

impl PredictionResponse {
    fn into_prediction(self) -> Prediction {
        let (accident_prob, crash_type) = match self {
            Self::Nested { probability } => (probability.accident_prob, probability.crash_type),
            Self::Flat {
                accident_probability,
                crash_type,
            } => (accident_probability, crash_type),
        };
        Prediction {
            accident_prob,
            crash_type: crash_type.unwrap_or_else(|| "UNKNOWN".to_string()),
        }
    }
}
