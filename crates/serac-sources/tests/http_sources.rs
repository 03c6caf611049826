// Source behaviour against a mock upstream

use std::time::Duration;

use serac_config_entries::ConfigurationEntry;
use serac_coordinator::{Fetcher, SourceFactory};
use serac_core::{resolve_department, FetchErrorKind, MassifId};
use serac_sources::{HttpSources, SourceSettings, API_KEY_HEADER};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BRA_TOKEN: &str = "bra-0f3c9e";
const ALERT_TOKEN: &str = "vigi-77aa01";

const BULLETIN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<BULLETINS_NEIGE_AVALANCHE MASSIF="MONT-BLANC" DATEBULLETIN="2026-02-03T16:00:00">
  <CARTOUCHERISQUE>
    <RISQUE RISQUE1="3" RISQUE2="2" RISQUEMAXI="3" RISQUEMAXIJ2="2" ALTITUDE="2200"/>
    <RESUME>Risque marqué au-dessus de 2200 m.</RESUME>
  </CARTOUCHERISQUE>
</BULLETINS_NEIGE_AVALANCHE>"#;

const OFF_SEASON: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<BULLETINS_NEIGE_AVALANCHE MASSIF="MONT-BLANC" DATEBULLETIN="2026-07-14T16:00:00">
</BULLETINS_NEIGE_AVALANCHE>"#;

async fn setup() -> (MockServer, HttpSources) {
    let server = MockServer::start().await;
    let settings = SourceSettings::with_base_url(&server.uri()).timeout(Duration::from_secs(5));
    let sources = HttpSources::new(settings).unwrap();
    (server, sources)
}

fn chamonix() -> ConfigurationEntry {
    ConfigurationEntry::new("Chamonix", 45.92, 6.87)
        .with_bulletin_token(BRA_TOKEN)
        .with_alert_token(ALERT_TOKEN)
}

fn mont_blanc() -> MassifId {
    MassifId::new(3).unwrap()
}

fn forecast_body() -> serde_json::Value {
    json!({
        "latitude": 45.92,
        "longitude": 6.87,
        "elevation": 1035.0,
        "current": {"temperature_2m": -3.5, "relative_humidity_2m": 81},
        "daily": {"time": ["2026-02-03", "2026-02-04", "2026-02-05"]}
    })
}

// ── Weather ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_forecast_with_air_quality() {
    let (server, sources) = setup().await;

    Mock::given(method("GET"))
        .and(path("/forecast"))
        .and(query_param("latitude", "45.92"))
        .and(query_param("forecast_days", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/air-quality"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"current": {"european_aqi": 18, "pm10": 6.1}})),
        )
        .mount(&server)
        .await;

    let fetcher = sources.weather(&chamonix()).unwrap();
    let payload = fetcher.fetch(&CancellationToken::new()).await.unwrap();

    assert_eq!(payload["current"]["temperature_2m"], -3.5);
    assert_eq!(payload["air_quality"]["european_aqi"], 18);
}

#[tokio::test]
async fn test_air_quality_failure_is_not_fatal() {
    let (server, sources) = setup().await;

    Mock::given(method("GET"))
        .and(path("/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/air-quality"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = sources.weather(&chamonix()).unwrap();
    let payload = fetcher.fetch(&CancellationToken::new()).await.unwrap();

    assert_eq!(payload["elevation"], 1035.0);
    assert!(payload.get("air_quality").is_none());
}

#[tokio::test]
async fn test_forecast_failures_are_classified() {
    let (server, sources) = setup().await;
    let fetcher = sources.weather(&chamonix()).unwrap();

    Mock::given(method("GET"))
        .and(path("/forecast"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let err = fetcher.fetch(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::TransientNetwork);

    Mock::given(method("GET"))
        .and(path("/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let err = fetcher.fetch(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::MalformedData);

    Mock::given(method("GET"))
        .and(path("/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": false})))
        .mount(&server)
        .await;
    let err = fetcher.fetch(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::MalformedData);
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let server = MockServer::start().await;
    let settings =
        SourceSettings::with_base_url(&server.uri()).timeout(Duration::from_millis(200));
    let sources = HttpSources::new(settings).unwrap();

    Mock::given(method("GET"))
        .and(path("/forecast"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(forecast_body())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let fetcher = sources.weather(&chamonix()).unwrap();
    let err = fetcher.fetch(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::TransientNetwork);
    assert_eq!(fetcher.timeout(), Duration::from_millis(400));
}

// ── Bulletins ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_bulletin_in_season() {
    let (server, sources) = setup().await;

    Mock::given(method("GET"))
        .and(path("/bra/massif/BRA"))
        .and(query_param("id-massif", "3"))
        .and(query_param("format", "xml"))
        .and(header(API_KEY_HEADER, BRA_TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_string(BULLETIN))
        .mount(&server)
        .await;

    let fetcher = sources.bulletin(&chamonix(), mont_blanc()).unwrap();
    let payload = fetcher.fetch(&CancellationToken::new()).await.unwrap();

    assert_eq!(payload["massif"], 3);
    assert_eq!(payload["massif_name"], "Mont-Blanc");
    assert!(payload["bulletin"].as_str().unwrap().contains("RISQUEMAXI=\"3\""));
}

#[tokio::test]
async fn test_bulletin_out_of_season() {
    let (server, sources) = setup().await;

    Mock::given(method("GET"))
        .and(path("/bra/massif/BRA"))
        .respond_with(ResponseTemplate::new(200).set_body_string(OFF_SEASON))
        .mount(&server)
        .await;

    let fetcher = sources.bulletin(&chamonix(), mont_blanc()).unwrap();
    let err = fetcher.fetch(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::NotFoundOrOutOfSeason);
}

#[tokio::test]
async fn test_bulletin_not_published() {
    let (server, sources) = setup().await;

    Mock::given(method("GET"))
        .and(path("/bra/massif/BRA"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let fetcher = sources.bulletin(&chamonix(), mont_blanc()).unwrap();
    let err = fetcher.fetch(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::NotFoundOrOutOfSeason);
}

#[tokio::test]
async fn test_bulletin_rejected_token() {
    let (server, sources) = setup().await;

    Mock::given(method("GET"))
        .and(path("/bra/massif/BRA"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_string(format!("invalid credentials {}", BRA_TOKEN)),
        )
        .mount(&server)
        .await;

    let fetcher = sources.bulletin(&chamonix(), mont_blanc()).unwrap();
    let err = fetcher.fetch(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::Authorization);
    assert!(!err.message.contains(BRA_TOKEN));
}

#[tokio::test]
async fn test_bulletin_that_is_not_xml() {
    let (server, sources) = setup().await;

    Mock::given(method("GET"))
        .and(path("/bra/massif/BRA"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"fault\": true}"))
        .mount(&server)
        .await;

    let fetcher = sources.bulletin(&chamonix(), mont_blanc()).unwrap();
    let err = fetcher.fetch(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::MalformedData);
}

// ── Vigilance ───────────────────────────────────────────────────────

fn vigilance_map() -> serde_json::Value {
    json!({
        "product": {
            "update_time": "2026-02-03T06:00:00Z",
            "periods": [{
                "echeance": "J",
                "timelaps": {"domain_ids": [
                    {"domain_id": "73", "max_color_id": 1, "phenomenon_items": []},
                    {"domain_id": "74", "max_color_id": 3, "phenomenon_items": [
                        {"phenomenon_id": "5", "phenomenon_max_color_id": 3}
                    ]}
                ]}
            }]
        }
    })
}

#[tokio::test]
async fn test_vigilance_for_department() {
    let (server, sources) = setup().await;

    Mock::given(method("GET"))
        .and(path("/vigilance/cartevigilance/encours"))
        .and(header(API_KEY_HEADER, ALERT_TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(vigilance_map()))
        .mount(&server)
        .await;

    let department = resolve_department(45.92, 6.87).unwrap();
    let fetcher = sources.alert(&chamonix(), department).unwrap();
    let payload = fetcher.fetch(&CancellationToken::new()).await.unwrap();

    assert_eq!(payload["department"], "74");
    assert_eq!(payload["department_name"], "Haute-Savoie");
    assert_eq!(payload["max_color_id"], 3);
    assert_eq!(payload["update_time"], "2026-02-03T06:00:00Z");
    assert_eq!(payload["phenomenon_items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_vigilance_missing_department() {
    let (server, sources) = setup().await;

    Mock::given(method("GET"))
        .and(path("/vigilance/cartevigilance/encours"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vigilance_map()))
        .mount(&server)
        .await;

    // Hautes-Alpes is not in the map above
    let department = resolve_department(44.66, 5.89).unwrap();
    let entry = ConfigurationEntry::new("Dévoluy", 44.66, 5.89).with_alert_token(ALERT_TOKEN);
    let fetcher = sources.alert(&entry, department).unwrap();
    let err = fetcher.fetch(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::NotFoundOrOutOfSeason);
}

#[tokio::test]
async fn test_vigilance_forbidden() {
    let (server, sources) = setup().await;

    Mock::given(method("GET"))
        .and(path("/vigilance/cartevigilance/encours"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let department = resolve_department(45.92, 6.87).unwrap();
    let fetcher = sources.alert(&chamonix(), department).unwrap();
    let err = fetcher.fetch(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::Authorization);
}
