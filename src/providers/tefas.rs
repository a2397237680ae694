use super::FundDetailProvider;
use super::util::{http_client, number_from_value};
use crate::core::FetchError;
use crate::core::config::FundsProviderConfig;
use crate::core::fund::SeriesPoint;
use crate::core::market::FundDetail;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

const NAME: &str = "tefas";
pub const LAST_PRICE_KEY: &str = "Son Fiyat (TL)";

/// TEFAS fund detail through RapidAPI. Every call counts against the daily
/// quota, so failed calls are not retried here.
pub struct TefasProvider {
    base_url: String,
    host: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl TefasProvider {
    pub fn new(config: &FundsProviderConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            host: config.host.clone(),
            api_key: config.resolved_api_key(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

/// `2020-11-06T00:00:00.000Z` or `2020-11-06`.
fn parse_series_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.split('T').next().unwrap_or(raw);
    NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d").ok()
}

/// Price series from a raw response, oldest first.
pub fn series_from_raw(raw: &Value) -> Vec<SeriesPoint> {
    let Some(items) = raw
        .pointer("/data/lineValues")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut series: Vec<SeriesPoint> = items
        .iter()
        .filter_map(|item| {
            let date = item.get("date").and_then(Value::as_str).and_then(parse_series_date);
            let value = item.get("value").and_then(number_from_value);
            match (date, value) {
                (Some(date), Some(value)) => Some(SeriesPoint {
                    date,
                    value,
                    order: item.get("order").and_then(Value::as_i64),
                }),
                _ => {
                    debug!("Skipping unreadable series item: {}", item);
                    None
                }
            }
        })
        .collect();
    series.sort_by_key(|p| p.date);
    series
}

/// "Son Fiyat (TL)" from the summary list, if quoted.
pub fn last_price_from_raw(raw: &Value) -> Option<f64> {
    raw.pointer("/data/topList")
        .and_then(Value::as_array)?
        .iter()
        .filter(|item| item.get("key").and_then(Value::as_str) == Some(LAST_PRICE_KEY))
        .find_map(|item| item.get("value").and_then(number_from_value))
}

pub(crate) fn parse_fund(code: &str, body: &str) -> Result<FundDetail, FetchError> {
    let raw: Value = serde_json::from_str(body).map_err(|e| FetchError::malformed(NAME, e))?;
    if raw.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(FetchError::malformed(NAME, format!("success=false for {code}")));
    }
    if !raw.get("data").is_some_and(Value::is_object) {
        return Err(FetchError::malformed(NAME, format!("no data section for {code}")));
    }

    let series = series_from_raw(&raw);
    let last_price = last_price_from_raw(&raw);
    if series.is_empty() && last_price.is_none() {
        warn!("Fund {} has neither a series nor a quoted price", code);
    }
    Ok(FundDetail {
        code: code.to_string(),
        raw,
        series,
        last_price,
    })
}

#[async_trait]
impl FundDetailProvider for TefasProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip(self))]
    async fn fetch_fund(&self, code: &str) -> Result<FundDetail, FetchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| FetchError::unavailable(NAME, "no API key configured"))?;

        let url = format!("{}/api/v1/funds/{}", self.base_url, code);
        debug!("Requesting fund detail from {}", url);
        let response = self
            .client
            .get(&url)
            .header("x-rapidapi-host", &self.host)
            .header("x-rapidapi-key", api_key)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::from_reqwest(NAME, e))?;

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(NAME, e))?;
        let detail = parse_fund(code, &body)?;
        info!(
            fund = code,
            points = detail.series.len(),
            "Fetched fund detail from TEFAS"
        );
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE: &str = r#"{
        "data": {
            "lineValues": [
                {"date": "2025-11-04T00:00:00.000Z", "value": 0.401, "order": 2},
                {"date": "2025-11-03T00:00:00.000Z", "value": 0.399107, "order": 1},
                {"date": "garbage", "value": 1.0}
            ],
            "topList": [
                {"key": "Kategori", "value": "Hisse"},
                {"key": "Son Fiyat (TL)", "value": "0,401"}
            ]
        },
        "success": true
    }"#;

    async fn create_tefas_mock_server(code: &str, body: &str, status_code: u16) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/funds/{code}")))
            .and(header("x-rapidapi-key", "rapid-key"))
            .and(header("x-rapidapi-host", "tefas-api.p.rapidapi.com"))
            .respond_with(ResponseTemplate::new(status_code).set_body_string(body))
            .mount(&mock_server)
            .await;
        mock_server
    }

    fn provider(base_url: &str) -> TefasProvider {
        let mut provider = TefasProvider::new(&FundsProviderConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap();
        provider.api_key = Some("rapid-key".to_string());
        provider
    }

    #[test]
    fn test_parse_fund_series_and_price() {
        let detail = parse_fund("GSP", SAMPLE).unwrap();
        assert_eq!(detail.code, "GSP");
        assert_eq!(detail.series.len(), 2);
        assert_eq!(detail.series[0].date, NaiveDate::from_ymd_opt(2025, 11, 3).unwrap());
        assert_eq!(detail.series[1].order, Some(2));
        assert_eq!(detail.last_price, Some(0.401));
        assert!(detail.raw.pointer("/data/topList").is_some());
    }

    #[test]
    fn test_parse_fund_rejects_failures() {
        assert!(parse_fund("GSP", r#"{"success": false}"#).is_err());
        assert!(parse_fund("GSP", r#"{"success": true}"#).is_err());
        assert!(parse_fund("GSP", "<html/>").is_err());
    }

    #[tokio::test]
    async fn test_fetch_fund_sends_rapidapi_headers() {
        let server = create_tefas_mock_server("GSP", SAMPLE, 200).await;
        let detail = provider(&server.uri()).fetch_fund("GSP").await.unwrap();
        assert_eq!(detail.series.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_fund_maps_rate_limit_to_unavailable() {
        let server = create_tefas_mock_server("GSP", "{}", 429).await;
        let err = provider(&server.uri()).fetch_fund("GSP").await.unwrap_err();
        assert!(matches!(err, FetchError::UpstreamUnavailable { .. }));
    }
}
