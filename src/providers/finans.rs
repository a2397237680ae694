use super::ProviderAdapter;
use super::util::{http_client, number_from_value, with_retry};
use crate::core::FetchError;
use crate::core::market::{RateKind, RateQuote, RateSnapshot};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

const NAME: &str = "finans";
const TODAY_PATH: &str = "/v4/today.json";

/// Currency, gold and crypto rates from the Finans JSON feed.
pub struct FinansProvider {
    url: String,
    client: reqwest::Client,
}

impl FinansProvider {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            url: format!("{}{}", base_url.trim_end_matches('/'), TODAY_PATH),
            client: http_client(timeout_secs)?,
        })
    }
}

fn field(item: &Map<String, Value>, name: &str) -> f64 {
    item.get(name)
        .and_then(number_from_value)
        .filter(|v| *v > 0.0 || name == "Change")
        .unwrap_or_default()
}

fn midpoint(buy: f64, sell: f64) -> f64 {
    match (buy > 0.0, sell > 0.0) {
        (true, true) => (buy + sell) / 2.0,
        (true, false) => buy,
        _ => sell,
    }
}

fn kind_of(type_name: &str) -> Option<RateKind> {
    match type_name {
        "Currency" => Some(RateKind::Currency),
        "Gold" => Some(RateKind::Gold),
        "CryptoCurrency" => Some(RateKind::Crypto),
        "Platinum" => Some(RateKind::Platinum),
        "Palladium" => Some(RateKind::Palladium),
        _ => None,
    }
}

fn to_quote(code: &str, kind: RateKind, item: &Map<String, Value>) -> RateQuote {
    let name = item
        .get("Name")
        .and_then(Value::as_str)
        .unwrap_or(code)
        .to_string();
    let change = field(item, "Change");
    let mut buy = field(item, "Buying");
    let mut sell = field(item, "Selling");
    let mut usd_price = None;

    let rate = match kind {
        RateKind::Gold => {
            // Some gold rows only quote one side.
            if buy == 0.0 {
                buy = sell;
            } else if sell == 0.0 {
                sell = buy;
            }
            midpoint(buy, sell)
        }
        RateKind::Crypto => {
            let mut try_price = field(item, "TRY_Price");
            if try_price == 0.0 {
                try_price = sell;
            }
            if sell == 0.0 {
                sell = try_price;
            }
            buy = try_price;
            usd_price = Some(field(item, "USD_Price"));
            try_price
        }
        RateKind::Currency | RateKind::Platinum | RateKind::Palladium => midpoint(buy, sell),
    };

    RateQuote {
        code: code.to_string(),
        name,
        kind,
        buy,
        sell,
        rate,
        change,
        usd_price,
    }
}

pub(crate) fn parse_rates(body: &str) -> Result<RateSnapshot, FetchError> {
    let root: Value = serde_json::from_str(body).map_err(|e| FetchError::malformed(NAME, e))?;
    let Value::Object(items) = root else {
        return Err(FetchError::malformed(NAME, "expected a JSON object"));
    };

    let mut snapshot = RateSnapshot {
        source: "Finans API".to_string(),
        update_date: items
            .get("Update_Date")
            .and_then(Value::as_str)
            .map(str::to_string),
        ..Default::default()
    };

    for (code, item) in &items {
        let Value::Object(item) = item else {
            continue;
        };
        let type_name = item.get("Type").and_then(Value::as_str).unwrap_or_default();
        match kind_of(type_name) {
            Some(kind) => snapshot.insert(to_quote(code, kind, item)),
            None => debug!("Skipping {} with unknown type '{}'", code, type_name),
        }
    }

    if snapshot.is_empty() {
        return Err(FetchError::malformed(NAME, "no rate rows"));
    }
    Ok(snapshot.with_base_currency())
}

#[async_trait]
impl ProviderAdapter<RateSnapshot> for FinansProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<RateSnapshot, FetchError> {
        debug!("Requesting rates from {}", self.url);
        let response = with_retry(
            || async { self.client.get(&self.url).send().await?.error_for_status() },
            1,
            500,
        )
        .await
        .map_err(|e| FetchError::from_reqwest(NAME, e))?;

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(NAME, e))?;
        let snapshot = parse_rates(&body)?;
        info!(
            currencies = snapshot.currencies.len(),
            gold = snapshot.gold.len(),
            crypto = snapshot.crypto.len(),
            "Fetched rates from Finans API"
        );
        Ok(snapshot)
    }
}
