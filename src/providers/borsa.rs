use super::ProviderAdapter;
use super::util::{http_client, number_from_value, with_retry};
use crate::core::FetchError;
use crate::core::config::StocksProviderConfig;
use crate::core::market::{StockQuote, StockSnapshot};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

const NAME: &str = "collectapi";
const STOCKS_PATH: &str = "/economy/hisseSenedi";

/// Borsa Istanbul quotes from CollectAPI.
pub struct CollectApiProvider {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl CollectApiProvider {
    pub fn new(config: &StocksProviderConfig) -> Result<Self> {
        Ok(Self {
            url: format!("{}{}", config.base_url.trim_end_matches('/'), STOCKS_PATH),
            api_key: config.resolved_api_key(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CollectApiResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CollectApiStock {
    #[serde(default)]
    code: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    lastprice: Value,
    #[serde(default)]
    rate: Value,
    #[serde(default)]
    hacim: Value,
    #[serde(default)]
    min: Value,
    #[serde(default)]
    max: Value,
    #[serde(default)]
    time: Value,
    #[serde(default)]
    icon: Option<String>,
}

impl From<CollectApiStock> for StockQuote {
    fn from(stock: CollectApiStock) -> Self {
        StockQuote {
            code: stock.code,
            name: stock.text,
            last_price: number_from_value(&stock.lastprice).unwrap_or_default(),
            change_rate: number_from_value(&stock.rate).unwrap_or_default(),
            volume: number_from_value(&stock.hacim).unwrap_or_default(),
            high: number_from_value(&stock.max).unwrap_or_default(),
            low: number_from_value(&stock.min).unwrap_or_default(),
            time: match stock.time {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            },
            icon: stock.icon.filter(|s| !s.is_empty()),
        }
    }
}

pub(crate) fn parse_stocks(body: &str) -> Result<StockSnapshot, FetchError> {
    let response: CollectApiResponse =
        serde_json::from_str(body).map_err(|e| FetchError::malformed(NAME, e))?;

    if response.success == Some(false) {
        let message = response.message.unwrap_or_else(|| "unknown error".to_string());
        return Err(FetchError::malformed(NAME, format!("success=false: {message}")));
    }
    if response.result.is_empty() {
        return Err(FetchError::malformed(NAME, "empty result"));
    }

    let total = response.result.len();
    let stocks: Vec<StockQuote> = response
        .result
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<CollectApiStock>(item) {
            Ok(stock) => Some(stock.into()),
            Err(e) => {
                warn!("Skipping unreadable stock row: {}", e);
                None
            }
        })
        .collect();
    if stocks.is_empty() {
        return Err(FetchError::malformed(NAME, "no readable rows"));
    }
    debug!("Parsed {}/{} stock rows", stocks.len(), total);

    Ok(StockSnapshot {
        source: "CollectAPI".to_string(),
        stocks,
    })
}

#[async_trait]
impl ProviderAdapter<StockSnapshot> for CollectApiProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<StockSnapshot, FetchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| FetchError::unavailable(NAME, "no API key configured"))?;

        debug!("Requesting stock data from {}", self.url);
        let response = with_retry(
            || async {
                self.client
                    .get(&self.url)
                    .header(reqwest::header::AUTHORIZATION, format!("apikey {api_key}"))
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .send()
                    .await?
                    .error_for_status()
            },
            1,
            500,
        )
        .await
        .map_err(|e| FetchError::from_reqwest(NAME, e))?;

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(NAME, e))?;
        let snapshot = parse_stocks(&body)?;
        info!("Fetched {} stocks from CollectAPI", snapshot.stocks.len());
        Ok(snapshot)
    }
}
