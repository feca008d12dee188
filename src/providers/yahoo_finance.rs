use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::price::{PriceFetcher, PriceMap};
use crate::providers::util::{RetryPolicy, with_retry};

// YahooFinanceProvider implementation for PriceFetcher
pub struct YahooFinanceProvider {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl YahooFinanceProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("stockwatch/1.0")
            .build()?;
        Ok(YahooFinanceProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Last traded price for one symbol.
    ///
    /// `Ok(None)` means Yahoo answered but had no usable quote; `Err` means it
    /// could not be reached at all.
    #[instrument(name = "YahooPriceFetch", skip(self))]
    async fn fetch_one(&self, symbol: &str) -> Result<Option<f64>> {
        let url = format!(
            "{}/v8/finance/chart/{}?interval=1d&range=1d",
            self.base_url, symbol
        );
        debug!("Requesting price data from {}", url);

        let response = with_retry(|| self.client.get(&url).send(), self.retry)
            .await
            .map_err(|e| anyhow!("Request error: {} for symbol: {} URL: {}", e, symbol, url))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(anyhow!("HTTP error: {} for symbol: {}", status, symbol));
        }
        if !status.is_success() {
            debug!(%status, "No quote for {}", symbol);
            return Ok(None);
        }

        let text = response.text().await?;
        match serde_json::from_str::<YahooPriceResponse>(&text) {
            Ok(data) => Ok(data
                .chart
                .result
                .and_then(|items| items.into_iter().next())
                .and_then(|item| item.meta.regular_market_price)),
            Err(e) => {
                warn!("Failed to parse JSON response for {}: {}", symbol, e);
                Ok(None)
            }
        }
    }
}

#[derive(Deserialize, Debug)]
struct YahooPriceResponse {
    chart: PriceChartResult,
}

#[derive(Deserialize, Debug)]
struct PriceChartResult {
    result: Option<Vec<PriceChartItem>>,
}

#[derive(Deserialize, Debug)]
struct PriceChartItem {
    meta: PriceChartMeta,
}

#[derive(Deserialize, Debug)]
struct PriceChartMeta {
    #[serde(alias = "regularMarketPrice")]
    regular_market_price: Option<f64>,
}

#[async_trait]
impl PriceFetcher for YahooFinanceProvider {
    /// Fetches every symbol concurrently. Individual failures become `None`;
    /// the batch only fails when no symbol could be fetched at all.
    async fn fetch_prices(&self, symbols: &[String]) -> Result<PriceMap> {
        if symbols.is_empty() {
            return Ok(PriceMap::new());
        }

        let results = join_all(symbols.iter().map(|symbol| self.fetch_one(symbol))).await;

        let mut prices = PriceMap::new();
        let mut failures = 0;
        let mut last_error = None;
        for (symbol, result) in symbols.iter().zip(results) {
            let price = match result {
                Ok(price) => price,
                Err(e) => {
                    debug!("Price fetch failed for {}: {}", symbol, e);
                    failures += 1;
                    last_error = Some(e);
                    None
                }
            };
            prices.insert(symbol.clone(), price);
        }

        match last_error {
            Some(e) if failures == symbols.len() => {
                Err(e.context(format!("all {} price requests failed", symbols.len())))
            }
            _ => Ok(prices),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub async fn mount_quote(mock_server: &MockServer, symbol: &str, status: u16, body: &str) {
        let request_path = format!("/v8/finance/chart/{symbol}");

        Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(mock_server)
            .await;
    }

    fn quote_body(price: f64) -> String {
        format!(
            r#"{{
                "chart": {{
                    "result": [{{
                        "meta": {{
                            "regularMarketPrice": {price},
                            "currency": "USD"
                        }}
                    }}]
                }}
            }}"#
        )
    }

    #[tokio::test]
    async fn test_successful_batch_fetch() {
        let mock_server = MockServer::start().await;
        mount_quote(&mock_server, "AAPL", 200, &quote_body(150.65)).await;
        mount_quote(&mock_server, "MSFT", 200, &quote_body(410.1)).await;

        let provider = YahooFinanceProvider::new(&mock_server.uri()).unwrap();
        let prices = provider
            .fetch_prices(&["AAPL".to_string(), "MSFT".to_string()])
            .await
            .unwrap();

        assert_eq!(prices.len(), 2);
        assert_eq!(prices["AAPL"], Some(150.65));
        assert_eq!(prices["MSFT"], Some(410.1));
    }

    #[tokio::test]
    async fn test_missing_quotes_map_to_none() {
        let mock_server = MockServer::start().await;
        mount_quote(&mock_server, "AAPL", 200, &quote_body(150.65)).await;
        mount_quote(&mock_server, "EMPTY", 200, r#"{"chart": {"result": []}}"#).await;
        mount_quote(&mock_server, "GARBLED", 200, r#"{"chart": "#).await;
        mount_quote(
            &mock_server,
            "UNKNOWN",
            404,
            r#"{"chart": {"result": null, "error": {"code": "Not Found"}}}"#,
        )
        .await;

        let provider = YahooFinanceProvider::new(&mock_server.uri()).unwrap();
        let symbols: Vec<String> = ["AAPL", "EMPTY", "GARBLED", "UNKNOWN"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let prices = provider.fetch_prices(&symbols).await.unwrap();

        assert_eq!(prices["AAPL"], Some(150.65));
        assert_eq!(prices["EMPTY"], None);
        assert_eq!(prices["GARBLED"], None);
        assert_eq!(prices["UNKNOWN"], None);
    }

    #[tokio::test]
    async fn test_partial_server_errors_do_not_fail_batch() {
        let mock_server = MockServer::start().await;
        mount_quote(&mock_server, "AAPL", 200, &quote_body(150.65)).await;
        mount_quote(&mock_server, "BROKEN", 500, "").await;

        let provider = YahooFinanceProvider::new(&mock_server.uri()).unwrap();
        let prices = provider
            .fetch_prices(&["AAPL".to_string(), "BROKEN".to_string()])
            .await
            .unwrap();

        assert_eq!(prices["AAPL"], Some(150.65));
        assert_eq!(prices["BROKEN"], None);
    }

    #[tokio::test]
    async fn test_batch_fails_when_upstream_is_down() {
        let mock_server = MockServer::start().await;
        mount_quote(&mock_server, "AAPL", 503, "").await;
        mount_quote(&mock_server, "MSFT", 503, "").await;

        let provider = YahooFinanceProvider::new(&mock_server.uri()).unwrap();
        let result = provider
            .fetch_prices(&["AAPL".to_string(), "MSFT".to_string()])
            .await;

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("all 2 price requests failed")
        );
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let provider = YahooFinanceProvider::new("http://127.0.0.1:9").unwrap();
        assert!(provider.fetch_prices(&[]).await.unwrap().is_empty());
    }
}
