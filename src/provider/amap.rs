//! AMap-style REST provider for reverse geocoding and live weather.
//!
//! Responses always come back as HTTP 200; success is `status == "1"` and
//! the quota signal is `infocode == "10021"`.

use super::{
    lenient_f64, lenient_string, AddressDetail, AddressInfo, GeoProvider, LiveWeather,
    ProviderError,
};
use crate::credentials::Credential;
use crate::{metrics, Coordinates};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Provider info code meaning "per-key QPS exceeded".
pub const RATE_LIMIT_INFOCODE: &str = "10021";

/// Default public endpoint.
pub const DEFAULT_BASE_URL: &str = "https://restapi.amap.com/v3";

/// HTTP client for the primary provider.
///
/// ## Example
///
/// ```no_run
/// use route_risk_orchestrator::provider::AmapProvider;
/// use std::time::Duration;
///
/// let provider = AmapProvider::new("https://restapi.amap.com/v3")
///     .with_timeout(Duration::from_secs(5));
/// ```
pub struct AmapProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AmapProvider {
    /// Create a provider rooted at `base_url` with a 10 s request timeout.
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

    async fn get<T: DeserializeOwned>(
        &self,
        op: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let result = self.call(op, path, query).await;
        metrics::inc_provider_call(
            "amap",
            match &result {
                Ok(_) => "ok",
                Err(e) => e.kind(),
            },
        );
        result
    }

    async fn call<T: DeserializeOwned>(
        &self,
        op: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let body = self.fetch(path, query).await?;

        let envelope: Envelope = serde_json::from_value(body.clone())
            .map_err(|e| ProviderError::Malformed(format!("{op}: {e}")))?;
        if envelope.status.as_deref() != Some("1") {
            if envelope.infocode.as_deref() == Some(RATE_LIMIT_INFOCODE) {
                return Err(ProviderError::RateLimited);
            }
            return Err(ProviderError::Unavailable(format!(
                "{op}: status={}, info={}",
                envelope.status.unwrap_or_default(),
                envelope.info.unwrap_or_default()
            )));
        }

        serde_json::from_value(body).map_err(|e| ProviderError::Malformed(format!("{op}: {e}")))
    }

    async fn fetch(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<serde_json::Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transport(format!("HTTP {status}: {text}")));
        }

        response.json().await.map_err(ProviderError::from_reqwest)
    }
}

#[async_trait]
impl GeoProvider for AmapProvider {
    async fn reverse_geocode(
        &self,
        credential: &Credential,
        at: Coordinates,
        detail: AddressDetail,
    ) -> Result<AddressInfo, ProviderError> {
        let location = format!("{},{}", at.lng, at.lat);
        let extensions = match detail {
            AddressDetail::Basic => "base",
            AddressDetail::Full => "all",
        };
        debug!(location = %location, extensions, "amap regeo");

        let body: RegeoResponse = self
            .get(
                "regeo",
                "/geocode/regeo",
                &[
                    ("key", credential.expose()),
                    ("location", location.as_str()),
                    ("output", "json"),
                    ("extensions", extensions),
                ],
            )
            .await?;

        let regeo = body
            .regeocode
            .ok_or_else(|| ProviderError::Unavailable("regeo: no regeocode".into()))?;
        let component = regeo.address_component.unwrap_or_default();

        let nearest_road_level = regeo
            .roads
            .first()
            .and_then(|r| r.level.clone().or_else(|| r.name.clone()));
        let nearest_intersection_signal = regeo
            .roadinters
            .first()
            .is_some_and(|i| truthy(&i.has_traffic_light));

        Ok(AddressInfo {
            province: component.province,
            city: component.city,
            district: component.district,
            township: component.township,
            street: component.street_number.and_then(|s| s.street),
            adcode: component.adcode,
            citycode: component.citycode,
            nearest_road_level,
            nearest_intersection_signal,
        })
    }

    async fn live_weather(
        &self,
        credential: &Credential,
        region_code: &str,
    ) -> Result<LiveWeather, ProviderError> {
        debug!(region_code, "amap weather");
        let body: WeatherResponse = self
            .get(
                "weather",
                "/weather/weatherInfo",
                &[
                    ("key", credential.expose()),
                    ("city", region_code),
                    ("extensions", "base"),
                    ("output", "json"),
                ],
            )
            .await?;

        let live = body
            .lives
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Unavailable(format!("weather: no lives for {region_code}")))?;

        Ok(LiveWeather {
            condition: live.weather,
            temperature_c: live.temperature,
            humidity_pct: live.humidity,
            wind_power: live.windpower,
        })
    }
}

fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s == "true" || s == "1",
        serde_json::Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}

// ── Wire types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    #[serde(default, deserialize_with = "lenient_string")]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    info: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    infocode: Option<String>,
}

#[derive(Deserialize)]
struct RegeoResponse {
    regeocode: Option<Regeocode>,
}

#[derive(Deserialize)]
struct Regeocode {
    #[serde(rename = "addressComponent")]
    address_component: Option<AddressComponent>,
    #[serde(default, deserialize_with = "list_or_empty")]
    roads: Vec<Road>,
    #[serde(default, deserialize_with = "list_or_empty")]
    roadinters: Vec<RoadInter>,
}

#[derive(Deserialize, Default)]
struct AddressComponent {
    #[serde(default, deserialize_with = "lenient_string")]
    province: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    city: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    district: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    township: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    adcode: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    citycode: Option<String>,
    #[serde(rename = "streetNumber", default, deserialize_with = "object_or_empty")]
    street_number: Option<StreetNumber>,
}

#[derive(Deserialize)]
struct StreetNumber {
    #[serde(default, deserialize_with = "lenient_string")]
    street: Option<String>,
}

#[derive(Deserialize)]
struct Road {
    #[serde(default, deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    level: Option<String>,
}

#[derive(Deserialize)]
struct RoadInter {
    #[serde(default)]
    has_traffic_light: serde_json::Value,
}

#[derive(Deserialize)]
struct WeatherResponse {
    #[serde(default, deserialize_with = "list_or_empty")]
    lives: Vec<Live>,
}

#[derive(Deserialize)]
struct Live {
    #[serde(default, deserialize_with = "lenient_string")]
    weather: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    humidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    windpower: Option<String>,
}

fn list_or_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        Some(v @ serde_json::Value::Array(_)) => {
            serde_json::from_value(v).map_err(serde::de::Error::custom)
        }
        _ => Ok(Vec::new()),
    }
}

fn object_or_empty<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        Some(v @ serde_json::Value::Object(_)) => serde_json::from_value(v)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}
