use super::fund::SeriesPoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One listed stock as reported by the exchange feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockQuote {
    pub code: String,
    pub name: String,
    pub last_price: f64,
    /// Daily change in percent.
    pub change_rate: f64,
    pub volume: f64,
    pub high: f64,
    pub low: f64,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub source: String,
    pub stocks: Vec<StockQuote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateKind {
    Currency,
    Gold,
    Crypto,
    Platinum,
    Palladium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub code: String,
    pub name: String,
    pub kind: RateKind,
    pub buy: f64,
    pub sell: f64,
    /// Midpoint of buy and sell, or whichever side is quoted.
    pub rate: f64,
    pub change: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usd_price: Option<f64>,
}

/// Currency, gold, crypto and precious metal rates against TRY.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub source: String,
    #[serde(default)]
    pub update_date: Option<String>,
    pub currencies: BTreeMap<String, RateQuote>,
    pub gold: BTreeMap<String, RateQuote>,
    pub crypto: BTreeMap<String, RateQuote>,
    pub precious_metals: BTreeMap<String, RateQuote>,
}

impl RateSnapshot {
    pub fn insert(&mut self, quote: RateQuote) {
        let bucket = match quote.kind {
            RateKind::Currency => &mut self.currencies,
            RateKind::Gold => &mut self.gold,
            RateKind::Crypto => &mut self.crypto,
            RateKind::Platinum | RateKind::Palladium => &mut self.precious_metals,
        };
        bucket.insert(quote.code.clone(), quote);
    }

    /// Adds TRY as the base currency at rate 1.
    pub fn with_base_currency(mut self) -> Self {
        self.insert(RateQuote {
            code: "TRY".to_string(),
            name: "Türk Lirası".to_string(),
            kind: RateKind::Currency,
            buy: 1.0,
            sell: 1.0,
            rate: 1.0,
            change: 0.0,
            usd_price: None,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
            && self.gold.is_empty()
            && self.crypto.is_empty()
            && self.precious_metals.is_empty()
    }

    pub fn exchange_rates(&self) -> ExchangeRates {
        ExchangeRates {
            update_date: self.update_date.clone(),
            currencies: self.currencies.clone(),
        }
    }

    pub fn gold_prices(&self) -> GoldPrices {
        GoldPrices {
            update_date: self.update_date.clone(),
            gold: self.gold.clone(),
            precious_metals: self.precious_metals.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRates {
    pub update_date: Option<String>,
    pub currencies: BTreeMap<String, RateQuote>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoldPrices {
    pub update_date: Option<String>,
    pub gold: BTreeMap<String, RateQuote>,
    pub precious_metals: BTreeMap<String, RateQuote>,
}

/// Fund detail as cached. `raw` is the provider response, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundDetail {
    pub code: String,
    pub raw: serde_json::Value,
    pub series: Vec<SeriesPoint>,
    /// Latest quoted price from the provider's summary list.
    #[serde(default)]
    pub last_price: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(code: &str, kind: RateKind, rate: f64) -> RateQuote {
        RateQuote {
            code: code.to_string(),
            name: code.to_string(),
            kind,
            buy: rate,
            sell: rate,
            rate,
            change: 0.0,
            usd_price: None,
        }
    }

    #[test]
    fn test_insert_routes_by_kind() {
        let mut snapshot = RateSnapshot::default();
        snapshot.insert(quote("USD", RateKind::Currency, 41.9));
        snapshot.insert(quote("gram-altin", RateKind::Gold, 5600.0));
        snapshot.insert(quote("BTC", RateKind::Crypto, 4_500_000.0));
        snapshot.insert(quote("platin", RateKind::Platinum, 2100.0));
        snapshot.insert(quote("paladyum", RateKind::Palladium, 1900.0));

        assert_eq!(snapshot.currencies.len(), 1);
        assert_eq!(snapshot.gold.len(), 1);
        assert_eq!(snapshot.crypto.len(), 1);
        assert_eq!(snapshot.precious_metals.len(), 2);

        let gold = snapshot.gold_prices();
        assert_eq!(gold.gold.len() + gold.precious_metals.len(), 3);
        assert_eq!(snapshot.exchange_rates().currencies.len(), 1);
    }

    #[test]
    fn test_base_currency() {
        let snapshot = RateSnapshot::default().with_base_currency();
        let try_quote = &snapshot.currencies["TRY"];
        assert_eq!(try_quote.rate, 1.0);
        assert!(!snapshot.is_empty());
    }
}
