//! Watchlist API routes

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::core::price::{normalize_symbol, percent_change};
use crate::core::record::{ListType, StockRecord, parse_price};
use crate::core::week::parse_date;
use crate::store::{StoreError, WatchlistStore};

const MAX_QUERY_LEN: usize = 32;
const CACHE_CONTROL: &str = "public, max-age=15, stale-while-revalidate=60";

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/healthz", get(healthz))
        .route("/api/stocks", get(list_stocks).post(create_stock))
        .route("/api/stocks/search", get(search_stocks))
        .route("/api/stocks/prices", get(stock_prices))
        .route("/api/stocks/{id}", put(update_stock).delete(delete_stock))
        .route("/api/stocks/{id}/snapshot", get(stock_snapshot))
        .route("/api/weeks", get(list_weeks))
        .route("/api/prices", get(symbol_prices))
}

#[derive(Deserialize, Default)]
pub struct WeekQuery {
    pub week: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub list: Option<String>,
    pub week: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct SymbolsQuery {
    pub symbols: Option<String>,
}

#[derive(Serialize)]
struct SearchHit {
    id: String,
    symbol: String,
    list_type: ListType,
}

#[derive(Serialize)]
struct SearchResults {
    results: Vec<SearchHit>,
}

#[derive(Serialize)]
struct CreatedStock {
    stock: StockRecord,
    current_price: Option<f64>,
    percent_change: Option<f64>,
}

#[derive(Serialize)]
struct PriceRow {
    id: String,
    symbol: String,
    current_price: Option<f64>,
    percent_change: Option<f64>,
}

#[derive(Serialize)]
struct Snapshot {
    symbol: String,
    id: String,
    list_type: ListType,
    initial_price: Option<f64>,
    date_spotted: Option<NaiveDate>,
    date_added: Option<NaiveDate>,
    current_price: Option<f64>,
    percent_change: Option<f64>,
}

/// Prices keyed by symbol, serialized in request order.
struct OrderedPrices(Vec<(String, Option<f64>)>);

impl Serialize for OrderedPrices {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(symbol, price)| (symbol, price)))
    }
}

#[derive(Serialize)]
struct PricesBody {
    prices: OrderedPrices,
}

/// Runs a store operation off the async workers; bucket files are read and
/// written with blocking I/O.
async fn with_store<T, F>(store: &Arc<WatchlistStore>, op: F) -> ApiResult<T>
where
    F: FnOnce(&WatchlistStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    Ok(tokio::task::spawn_blocking(move || op(&store)).await??)
}

fn etag_token(parts: &[&str]) -> String {
    let digest = Sha256::digest(parts.join(":").as_bytes());
    hex::encode(digest)
}

/// JSON response with a weak ETag and short-lived cache headers when HTTP
/// caching is enabled.
fn cacheable<T: Serialize>(state: &AppState, body: T, parts: &[&str]) -> Response {
    let mut response = Json(body).into_response();
    if !state.http_cache {
        return response;
    }
    let version = state.store.state_version().to_string();
    let mut all = vec![version.as_str()];
    all.extend_from_slice(parts);
    let token = etag_token(&all);

    let headers = response.headers_mut();
    if let Ok(etag) = HeaderValue::from_str(&format!("W/\"{token}\"")) {
        headers.insert(header::ETAG, etag);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    response
}

fn join_weeks(weeks: &[NaiveDate]) -> String {
    weeks
        .iter()
        .map(|week| week.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Request bodies are parsed leniently: anything that is not a JSON object
/// reads as an empty one.
fn parse_payload(body: &Bytes) -> Map<String, Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn text_field(payload: &Map<String, Value>, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn price_field(payload: &Map<String, Value>) -> ApiResult<f64> {
    payload
        .get("initial_price")
        .and_then(parse_price)
        .ok_or_else(|| ApiError::BadRequest("initial_price must be a number".to_string()))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_stocks(State(state): State<AppState>, Query(query): Query<WeekQuery>) -> ApiResult<Response> {
    let (weeks, grouped) = with_store(&state.store, move |store| {
        let weeks = store.resolve_weeks(query.week.as_deref())?;
        let grouped = store.read(&weeks)?;
        Ok((weeks, grouped))
    })
    .await?;
    let joined = join_weeks(&weeks);
    Ok(cacheable(&state, grouped, &[joined.as_str()]))
}

async fn search_stocks(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResults>> {
    let q = query.q.as_deref().unwrap_or_default().trim().to_uppercase();
    if q.is_empty() {
        return Ok(Json(SearchResults { results: Vec::new() }));
    }
    if q.chars().count() > MAX_QUERY_LEN {
        return Err(ApiError::BadRequest(format!(
            "query must be {MAX_QUERY_LEN} characters or fewer"
        )));
    }

    let list = query
        .list
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(ListType::coerce);
    let matches = with_store(&state.store, move |store| {
        let weeks = store.resolve_weeks(query.week.as_deref())?;
        store.search(&q, list, &weeks)
    })
    .await?;

    let results = matches
        .into_iter()
        .map(|record| SearchHit {
            symbol: normalize_symbol(&record.symbol).unwrap_or_default(),
            id: record.id,
            list_type: record.list_type,
        })
        .collect();
    Ok(Json(SearchResults { results }))
}

async fn list_weeks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.weeks())
}

async fn create_stock(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<CreatedStock>> {
    let payload = parse_payload(&body);
    let symbol = normalize_symbol(&text_field(&payload, "symbol"))
        .ok_or_else(|| ApiError::BadRequest("symbol is required".to_string()))?;
    let initial_price = price_field(&payload)?;

    let record = StockRecord {
        symbol: symbol.clone(),
        initial_price: Some(initial_price),
        reason: text_field(&payload, "reason"),
        date_spotted: parse_date(&text_field(&payload, "date_spotted")),
        date_bought: parse_date(&text_field(&payload, "date_bought")),
        date_added: Some(Utc::now().date_naive()),
        list_type: ListType::coerce(&text_field(&payload, "list_type")),
        ..Default::default()
    };
    let stock = with_store(&state.store, move |store| store.upsert(record, None)).await?;
    debug!("Created {} ({})", stock.symbol, stock.id);

    let current_price = state
        .prices
        .get_many([&symbol], false)
        .get(&symbol)
        .copied()
        .flatten();
    Ok(Json(CreatedStock {
        percent_change: percent_change(stock.initial_price, current_price),
        stock,
        current_price,
    }))
}

async fn update_stock(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<StockRecord>> {
    let payload = parse_payload(&body);
    let lookup = id.clone();
    let (location, mut updated) = with_store(&state.store, move |store| Ok(store.get(&lookup)))
        .await?
        .ok_or(ApiError::NotFound)?;

    if payload.contains_key("symbol") {
        updated.symbol = normalize_symbol(&text_field(&payload, "symbol"))
            .ok_or_else(|| ApiError::BadRequest("symbol cannot be empty".to_string()))?;
    }
    if payload.contains_key("initial_price") {
        updated.initial_price = Some(price_field(&payload)?);
    }
    if payload.contains_key("reason") {
        updated.reason = text_field(&payload, "reason");
    }
    if payload.contains_key("date_spotted") {
        updated.date_spotted = parse_date(&text_field(&payload, "date_spotted"));
    }
    if payload.contains_key("date_bought") {
        updated.date_bought = parse_date(&text_field(&payload, "date_bought"));
    }
    if payload.contains_key("list_type") {
        updated.list_type = ListType::coerce(&text_field(&payload, "list_type"));
    }

    let stored = with_store(&state.store, move |store| store.upsert(updated, Some(location))).await?;
    debug!("Updated {}", id);
    Ok(Json(stored))
}

async fn delete_stock(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    with_store(&state.store, move |store| store.delete(&id)).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn stock_prices(State(state): State<AppState>, Query(query): Query<WeekQuery>) -> ApiResult<Response> {
    let (weeks, records) = with_store(&state.store, move |store| {
        let weeks = store.resolve_weeks(query.week.as_deref())?;
        let records = store.read_flat(&weeks)?;
        Ok((weeks, records))
    })
    .await?;

    let rows: Vec<(String, String, Option<f64>)> = records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.trim().to_string();
            let symbol = normalize_symbol(&record.symbol)?;
            (!id.is_empty()).then_some((id, symbol, record.initial_price))
        })
        .collect();
    let prices = state.prices.get_many(rows.iter().map(|(_, symbol, _)| symbol), true);

    let body: Vec<PriceRow> = rows
        .into_iter()
        .map(|(id, symbol, initial)| {
            let current_price = prices.get(&symbol).copied().flatten();
            PriceRow {
                id,
                symbol,
                current_price,
                percent_change: percent_change(initial, current_price),
            }
        })
        .collect();
    let joined = join_weeks(&weeks);
    Ok(cacheable(&state, body, &["prices", joined.as_str()]))
}

async fn symbol_prices(State(state): State<AppState>, Query(query): Query<SymbolsQuery>) -> Response {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in query.symbols.as_deref().unwrap_or_default().split(',') {
        if let Some(symbol) = normalize_symbol(symbol) {
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
    }
    if symbols.is_empty() {
        return Json(PricesBody {
            prices: OrderedPrices(Vec::new()),
        })
        .into_response();
    }

    let prices = state.prices.get_many(&symbols, true);
    let ordered = symbols
        .iter()
        .map(|symbol| (symbol.clone(), prices.get(symbol).copied().flatten()))
        .collect();
    let joined = symbols.join(",");
    cacheable(
        &state,
        PricesBody {
            prices: OrderedPrices(ordered),
        },
        &["prices", joined.as_str()],
    )
}

async fn stock_snapshot(State(state): State<AppState>, Path(symbol): Path<String>) -> ApiResult<Json<Snapshot>> {
    let symbol = normalize_symbol(&symbol).ok_or_else(|| ApiError::BadRequest("symbol is required".to_string()))?;
    let lookup = symbol.clone();
    let record = with_store(&state.store, move |store| store.latest_for_symbol(&lookup))
        .await?
        .ok_or(ApiError::NotFound)?;

    let mut current_price = state
        .prices
        .get_many([&symbol], false)
        .get(&symbol)
        .copied()
        .flatten();
    if current_price.is_none() {
        match state.fetcher.fetch_prices(std::slice::from_ref(&symbol)).await {
            Ok(fresh) => {
                current_price = fresh.get(&symbol).copied().flatten();
                state.prices.prime(&symbol, current_price);
            }
            Err(e) => warn!("Inline price fetch for {} failed: {}", symbol, e),
        }
    }

    Ok(Json(Snapshot {
        percent_change: percent_change(record.initial_price, current_price),
        symbol,
        id: record.id,
        list_type: record.list_type,
        initial_price: record.initial_price,
        date_spotted: record.date_spotted,
        date_added: record.date_added,
        current_price,
    }))
}
