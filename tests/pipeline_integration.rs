//! End-to-end tests: the HTTP providers against mock servers, wired through
//! `RouteProcessor::from_config`.

use route_risk_orchestrator::config::{loader, PipelineConfig};
use route_risk_orchestrator::{RiskError, RouteProcessor};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Mock upstreams ────────────────────────────────────────────────────

struct Upstreams {
    amap: MockServer,
    overpass: MockServer,
    model: MockServer,
}

fn regeo_body() -> Value {
    json!({
        "status": "1",
        "info": "OK",
        "infocode": "10000",
        "regeocode": {
            "addressComponent": {
                "province": "湖北省",
                "city": "武汉市",
                "citycode": "027",
                "district": "江汉区",
                "adcode": "420103",
                "township": "民族街道",
                "streetNumber": {"street": "中山大道", "number": "1"}
            },
            "roads": [{"name": "中山大道", "level": "主干路"}],
            "roadinters": []
        }
    })
}

fn weather_body(adcode: &str) -> Value {
    json!({
        "status": "1",
        "count": "1",
        "infocode": "10000",
        "lives": [{
            "adcode": adcode,
            "weather": "晴",
            "temperature": "22",
            "windpower": "≤3",
            "humidity": "50"
        }]
    })
}

async fn upstreams(model_status: u16) -> Upstreams {
    let amap = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geocode/regeo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(regeo_body()))
        .mount(&amap)
        .await;
    Mock::given(method("GET"))
        .and(path("/weather/weatherInfo"))
        .and(query_param("city", "999999"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "0",
            "info": "INVALID_PARAMS",
            "infocode": "20000"
        })))
        .with_priority(1)
        .mount(&amap)
        .await;
    Mock::given(method("GET"))
        .and(path("/weather/weatherInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(weather_body("420103")))
        .mount(&amap)
        .await;

    let overpass = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/interpreter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "elements": [{"type": "way", "id": 1, "tags": {"highway": "primary"}}]
        })))
        .mount(&overpass)
        .await;

    let model = MockServer::start().await;
    let response = if model_status == 200 {
        ResponseTemplate::new(200).set_body_json(json!({
            "probability": {"accident_prob": 0.25, "crash_type": "NO INJURY / DRIVE AWAY"}
        }))
    } else {
        ResponseTemplate::new(model_status)
    };
    Mock::given(method("POST"))
        .and(path("/api/predict"))
        .respond_with(response)
        .mount(&model)
        .await;

    Upstreams {
        amap,
        overpass,
        model,
    }
}

fn config_for(up: &Upstreams) -> PipelineConfig {
    let toml = format!(
        r#"
[provider]
base_url = "{amap}"
credentials = ["it-key-1", "it-key-2", "it-key-3"]
min_interval_ms = 0
retry_delay_ms = 0
max_attempts = 3

[road_data]
base_url = "{overpass}"
deadline_ms = 2000

[prediction]
url = "{model}/api/predict"

[scoring]
jitter_min = 1.0
jitter_max = 1.0
"#,
        amap = up.amap.uri(),
        overpass = up.overpass.uri(),
        model = up.model.uri(),
    );
    loader::load_with_override(&toml, "integration.toml", None).expect("test: config")
}

fn node(adcode: &str, lat: f64, lng: f64) -> Value {
    json!({ "adcode": adcode, "lat": lat, "lng": lng })
}

fn wuhan_path() -> Value {
    json!({
        "origin": node("420100", 30.58, 114.27),
        "waypoints": [node("420103", 30.59, 114.28)],
        "destination": node("420103", 30.60, 114.29),
        "departTime": "2024-06-01 08:00",
        "vehicleType": "货车"
    })
}

// ── Tests ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_request_over_http() {
    let up = upstreams(200).await;
    let processor = RouteProcessor::from_config(&config_for(&up)).expect("test: processor");

    let resp = processor
        .process_request_json(json!({ "paths": [wuhan_path()] }))
        .await
        .expect("test: request succeeds");
    let out = serde_json::to_value(&resp).expect("test: serialise");

    let nodes = out["routes"][0]["nodes"].as_array().expect("test: nodes");
    assert_eq!(nodes.len(), 3);
    // City-level origin code replaced by the reverse-geocoded district.
    assert_eq!(nodes[0]["adcode"], "420103");
    assert_eq!(nodes[0]["name"], "湖北省武汉市江汉区民族街道中山大道");
    assert_eq!(nodes[0]["weather"], "晴");
    assert_eq!(nodes[0]["roadType"], "Main Road");

    let summary = &out["routeRisks"][0]["summary"];
    assert_eq!(summary["start"], nodes[0]["name"]);
    assert_eq!(summary["vehicleType"], "truck");
    let max = summary["maxRisk"].as_f64().expect("test: maxRisk");
    let avg = summary["avgRisk"].as_f64().expect("test: avgRisk");
    assert!(max >= avg && avg > 0.0);
}

#[tokio::test]
async fn test_invalid_region_route_is_isolated() {
    let up = upstreams(200).await;
    let processor = RouteProcessor::from_config(&config_for(&up)).expect("test: processor");

    let alone = processor
        .process_request_json(json!({ "paths": [wuhan_path()] }))
        .await
        .expect("test: alone");

    let broken = json!({
        "origin": node("999999", 10.0, 10.0),
        "destination": node("999999", 10.1, 10.1)
    });
    let together = processor
        .process_request_json(json!({ "paths": [wuhan_path(), broken] }))
        .await
        .expect("test: together");

    assert_eq!(together.routes.len(), 2);
    assert_eq!(
        together.route_risks[0].summary,
        alone.route_risks[0].summary,
        "healthy route must not be affected by the broken one"
    );
    let broken_node = &together.routes[1].nodes[0];
    assert_eq!(broken_node.adcode, "999999");
    assert!(broken_node.weather.error.is_some());
    assert!(broken_node.risk >= 0.0);
}

#[tokio::test]
async fn test_model_outage_degrades_every_node_to_zero() {
    let up = upstreams(500).await;
    let processor = RouteProcessor::from_config(&config_for(&up)).expect("test: processor");

    let resp = processor
        .process_request_json(json!({ "paths": [wuhan_path()] }))
        .await
        .expect("test: batch still completes");

    for node in &resp.routes[0].nodes {
        assert_eq!(node.risk, 0.0);
        assert!(node.risk_error.is_some());
    }
    assert_eq!(resp.route_risks[0].summary.max_risk, 0.0);
    assert!(resp.route_risks[0].high_risk_points.is_empty());
}

#[tokio::test]
async fn test_missing_paths_is_rejected_before_any_call() {
    let up = upstreams(200).await;
    let processor = RouteProcessor::from_config(&config_for(&up)).expect("test: processor");

    let err = processor
        .process_request_json(json!({ "route": [] }))
        .await
        .unwrap_err();
    assert!(matches!(err, RiskError::InvalidRequest(_)));

    let received = up.amap.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_requests_carry_pooled_credentials() {
    let up = upstreams(200).await;
    let processor = RouteProcessor::from_config(&config_for(&up)).expect("test: processor");

    processor
        .process_request_json(json!({ "paths": [wuhan_path()] }))
        .await
        .expect("test: request");

    let received = up.amap.received_requests().await.unwrap_or_default();
    assert!(!received.is_empty());
    for request in received {
        let key = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "key")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        assert!(key.starts_with("it-key-"), "unexpected key {key:?}");
    }
}
