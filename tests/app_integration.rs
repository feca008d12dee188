use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use stockwatch::core::price::PriceFetcher;
use stockwatch::providers::YahooFinanceProvider;
use stockwatch::server::{AppState, router};
use stockwatch::store::WatchlistStore;
use stockwatch::store::disk::JsonCodec;
use tempfile::TempDir;
use tower::ServiceExt;
use tracing::info;

mod test_utils {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub async fn create_mock_server(quotes: &[(&str, f64)]) -> MockServer {
        let mock_server = MockServer::start().await;

        for (symbol, price) in quotes {
            let body = format!(
                r#"{{"chart": {{"result": [{{"meta": {{"regularMarketPrice": {price}, "currency": "USD"}}}}]}}}}"#
            );
            Mock::given(method("GET"))
                .and(path(format!("/v8/finance/chart/{symbol}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&mock_server)
                .await;
        }

        mock_server
    }

    pub fn write_config(dir: &std::path::Path, data_path: &std::path::Path) -> std::path::PathBuf {
        let config_path = dir.join("config.yaml");
        let contents = format!(
            "data_path: \"{}\"\nprice_ttl_seconds: 30\nfast_json: false\n",
            data_path.display()
        );
        std::fs::write(&config_path, contents).unwrap();
        config_path
    }
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn open_state(root: &std::path::Path, base_url: &str) -> AppState {
    let store = Arc::new(WatchlistStore::open(root, JsonCodec::new(true)).unwrap());
    let fetcher: Arc<dyn PriceFetcher> = Arc::new(YahooFinanceProvider::new(base_url).unwrap());
    AppState::new(store, fetcher, Duration::from_secs(60), true)
}

#[test_log::test(tokio::test)]
async fn test_full_app_flow_with_yahoo_mock() {
    let mock_server = test_utils::create_mock_server(&[("AAPL", 150.0), ("MSFT", 420.5)]).await;
    let data_dir = TempDir::new().unwrap();
    let state = open_state(data_dir.path(), &mock_server.uri());
    let app = router(state.clone());

    let (status, created) = call(
        &app,
        "POST",
        "/api/stocks",
        Some(json!({"symbol": "aapl", "initial_price": 120, "date_spotted": "2024-01-03", "list_type": "A"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    info!(?created, "Created stock");
    let id = created["stock"]["id"].as_str().unwrap().to_string();

    // First read schedules a background refresh; poll until the worker fills it in
    let mut current = Value::Null;
    for _ in 0..200 {
        let (status, rows) = call(&app, "GET", "/api/stocks/prices?week=2024-01-07", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rows[0]["id"], id.as_str());
        current = rows[0]["current_price"].clone();
        if !current.is_null() {
            assert_eq!(rows[0]["percent_change"], 25.0);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(current, json!(150.0));

    // Snapshot of a symbol the cache has never seen fetches it inline
    call(
        &app,
        "POST",
        "/api/stocks",
        Some(json!({"symbol": "MSFT", "initial_price": "400", "date_spotted": "2024-01-04", "list_type": "PA"})),
    )
    .await;
    let (status, snapshot) = call(&app, "GET", "/api/stocks/msft/snapshot", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["current_price"], 420.5);
    assert_eq!(snapshot["list_type"], "PA");

    let (_, prices) = call(&app, "GET", "/api/prices?symbols=AAPL,MSFT", None).await;
    assert_eq!(prices["prices"]["AAPL"], 150.0);
    assert_eq!(prices["prices"]["MSFT"], 420.5);

    state.prices.stop().await;
}

#[test_log::test(tokio::test)]
async fn test_data_survives_restart_and_index_loss() {
    let mock_server = test_utils::create_mock_server(&[]).await;
    let data_dir = TempDir::new().unwrap();

    let ids: Vec<String> = {
        let app = router(open_state(data_dir.path(), &mock_server.uri()));
        let mut ids = Vec::new();
        for (symbol, spotted, list) in [
            ("AAPL", "2024-01-03", "A"),
            ("MSFT", "2024-01-10", "B"),
            ("IBM", "2024-01-11", "PB"),
        ] {
            let (status, body) = call(
                &app,
                "POST",
                "/api/stocks",
                Some(json!({"symbol": symbol, "initial_price": 10, "date_spotted": spotted, "list_type": list})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            ids.push(body["stock"]["id"].as_str().unwrap().to_string());
        }
        let (status, _) = call(&app, "DELETE", &format!("/api/stocks/{}", ids[0]), None).await;
        assert_eq!(status, StatusCode::OK);
        ids
    };

    fs::remove_file(data_dir.path().join("index.json")).unwrap();

    let store = WatchlistStore::open(data_dir.path(), JsonCodec::new(true)).unwrap();
    let index = store.snapshot();
    assert_eq!(index.by_id.len(), 2);
    assert!(!index.by_id.contains_key(&ids[0]));
    assert!(index.by_id.contains_key(&ids[1]));
    assert!(index.by_symbol.contains_key("IBM"));
    assert!(!index.by_symbol.contains_key("AAPL"));

    let week = stockwatch::core::week::parse_date("2024-01-14").unwrap();
    let grouped = store.read(&[week]).unwrap();
    assert_eq!(grouped[&stockwatch::core::ListType::B].len(), 1);
    assert_eq!(grouped[&stockwatch::core::ListType::PB].len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_rebuild_index_command() {
    let config_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();

    let week_dir = data_dir.path().join("2024-01-07");
    fs::create_dir_all(&week_dir).unwrap();
    fs::write(
        week_dir.join("A.json"),
        r#"[{"id": "nvda-1", "symbol": "nvda", "initial_price": "480.5", "date_spotted": "2024-01-02"}, "junk"]"#,
    )
    .unwrap();
    let config_path = test_utils::write_config(config_dir.path(), data_dir.path());

    let result = stockwatch::run_command(
        stockwatch::AppCommand::RebuildIndex,
        config_path.to_str(),
    )
    .await;
    assert!(result.is_ok(), "rebuild failed: {result:?}");

    let index: Value =
        serde_json::from_str(&fs::read_to_string(data_dir.path().join("index.json")).unwrap()).unwrap();
    assert_eq!(index["weeks"]["2024-01-07"]["lists"]["A"]["count"], 1);
    let entries = index["by_symbol"]["NVDA"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], "nvda-1");
    assert_eq!(entries[0]["week"], "2024-01-07");

    let result = stockwatch::run_command(stockwatch::AppCommand::Weeks, config_path.to_str()).await;
    assert!(result.is_ok());
}
