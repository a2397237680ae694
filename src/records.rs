//! Per-user transactions and investments.
//!
//! Every key lives under `records:{uid}:`, so a caller can only address the
//! prefix of the identity it was verified as.

use crate::core::{ServiceError, ServiceResult};
use crate::store::PersistentStore;
use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maps a bearer token to a user id.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<String>;
}

/// Fixed token table from configuration.
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: f64,
    pub category: String,
    pub description: String,
    pub date: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTransaction {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub amount: Option<f64>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFilter {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub quantity: f64,
    pub average_price: f64,
    pub current_price: f64,
    pub total_value: f64,
    pub profit_loss: f64,
    pub profit_loss_percentage: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvestment {
    pub symbol: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub quantity: Option<f64>,
    pub average_price: Option<f64>,
    pub current_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentTransaction {
    pub id: String,
    pub investment_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub quantity: f64,
    pub price: f64,
    pub total_amount: f64,
    pub date: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvestmentTransaction {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub total_amount: Option<f64>,
    pub date: Option<String>,
}

fn required_text(value: Option<String>, field: &str) -> ServiceResult<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ServiceError::InvalidRequest(format!(
            "Missing required field: {field}"
        ))),
    }
}

fn required_number(value: Option<f64>, field: &str) -> ServiceResult<f64> {
    value
        .filter(|v| v.is_finite())
        .ok_or_else(|| ServiceError::InvalidRequest(format!("Missing required field: {field}")))
}

/// Ids become key segments and must not contain the separator.
fn segment<'a>(value: &'a str, what: &str) -> ServiceResult<&'a str> {
    if value.is_empty() || value.contains(':') {
        return Err(ServiceError::InvalidRequest(format!("Invalid {what}: {value}")));
    }
    Ok(value)
}

fn timestamp(now: NaiveDateTime) -> String {
    now.format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub struct RecordStore {
    store: Arc<dyn PersistentStore>,
}

impl RecordStore {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    fn transactions_prefix(uid: &str) -> String {
        format!("records:{uid}:transactions:")
    }

    fn investments_prefix(uid: &str) -> String {
        format!("records:{uid}:investments:")
    }

    fn investment_tx_prefix(uid: &str, investment_id: &str) -> String {
        format!("records:{uid}:investments:{investment_id}:tx:")
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> ServiceResult<()> {
        let bytes = serde_json::to_vec(value).context("Failed to encode record")?;
        self.store
            .put(key, bytes)
            .await
            .with_context(|| format!("Failed to write record: {key}"))?;
        debug!("Record PUT for key: {}", key);
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> ServiceResult<Option<T>> {
        let bytes = self
            .store
            .get(key)
            .await
            .with_context(|| format!("Failed to read record: {key}"))?;
        Ok(bytes.and_then(|b| decode(key, &b)))
    }

    /// Records directly under `prefix`, skipping deeper keys.
    async fn scan<T: DeserializeOwned>(&self, prefix: &str) -> ServiceResult<Vec<T>> {
        let entries = self
            .store
            .scan_prefix(prefix)
            .await
            .with_context(|| format!("Failed to scan records: {prefix}"))?;
        Ok(entries
            .iter()
            .filter(|(key, _)| !key[prefix.len()..].contains(':'))
            .filter_map(|(key, bytes)| decode(key, bytes))
            .collect())
    }

    async fn remove_existing(&self, key: &str, what: &str) -> ServiceResult<()> {
        let exists = self
            .store
            .get(key)
            .await
            .with_context(|| format!("Failed to read record: {key}"))?
            .is_some();
        if !exists {
            return Err(ServiceError::NotFound(format!("{what} not found")));
        }
        self.store
            .remove(key)
            .await
            .with_context(|| format!("Failed to delete record: {key}"))?;
        Ok(())
    }

    pub async fn create_transaction(
        &self,
        uid: &str,
        input: NewTransaction,
        now: NaiveDateTime,
    ) -> ServiceResult<Transaction> {
        let uid = segment(uid, "user id")?;
        let tx = Transaction {
            id: Uuid::new_v4().to_string(),
            kind: required_text(input.kind, "type")?,
            amount: required_number(input.amount, "amount")?,
            category: required_text(input.category, "category")?,
            description: required_text(input.description, "description")?,
            date: required_text(input.date, "date")?,
            created_at: timestamp(now),
        };
        let key = format!("{}{}", Self::transactions_prefix(uid), tx.id);
        self.write(&key, &tx).await?;
        info!(user = uid, id = %tx.id, "Created transaction");
        Ok(tx)
    }

    /// Newest first.
    pub async fn list_transactions(
        &self,
        uid: &str,
        filter: &TransactionFilter,
    ) -> ServiceResult<Vec<Transaction>> {
        let uid = segment(uid, "user id")?;
        let mut items: Vec<Transaction> = self.scan(&Self::transactions_prefix(uid)).await?;
        items.retain(|tx| {
            filter.kind.as_ref().is_none_or(|k| &tx.kind == k)
                && filter.category.as_ref().is_none_or(|c| &tx.category == c)
        });
        items.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.created_at.cmp(&a.created_at)));
        Ok(items)
    }

    pub async fn delete_transaction(&self, uid: &str, id: &str) -> ServiceResult<()> {
        let uid = segment(uid, "user id")?;
        let id = segment(id, "transaction id")?;
        self.remove_existing(&format!("{}{}", Self::transactions_prefix(uid), id), "Transaction")
            .await?;
        info!(user = uid, id, "Deleted transaction");
        Ok(())
    }

    pub async fn create_investment(
        &self,
        uid: &str,
        input: NewInvestment,
        now: NaiveDateTime,
    ) -> ServiceResult<Investment> {
        let uid = segment(uid, "user id")?;
        let quantity = required_number(input.quantity, "quantity")?;
        let current_price = required_number(input.current_price, "currentPrice")?;
        let investment = Investment {
            id: Uuid::new_v4().to_string(),
            symbol: required_text(input.symbol, "symbol")?,
            name: required_text(input.name, "name")?,
            kind: required_text(input.kind, "type")?,
            quantity,
            average_price: required_number(input.average_price, "averagePrice")?,
            current_price,
            total_value: quantity * current_price,
            profit_loss: 0.0,
            profit_loss_percentage: 0.0,
            created_at: timestamp(now),
        };
        let key = format!("{}{}", Self::investments_prefix(uid), investment.id);
        self.write(&key, &investment).await?;
        info!(user = uid, id = %investment.id, symbol = %investment.symbol, "Created investment");
        Ok(investment)
    }

    pub async fn list_investments(&self, uid: &str) -> ServiceResult<Vec<Investment>> {
        let uid = segment(uid, "user id")?;
        let mut items: Vec<Investment> = self.scan(&Self::investments_prefix(uid)).await?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    /// Removes the investment and its transactions.
    pub async fn delete_investment(&self, uid: &str, id: &str) -> ServiceResult<()> {
        let uid = segment(uid, "user id")?;
        let id = segment(id, "investment id")?;
        self.remove_existing(&format!("{}{}", Self::investments_prefix(uid), id), "Investment")
            .await?;

        let tx_prefix = Self::investment_tx_prefix(uid, id);
        let children = self
            .store
            .scan_prefix(&tx_prefix)
            .await
            .with_context(|| format!("Failed to scan records: {tx_prefix}"))?;
        for (key, _) in children {
            self.store
                .remove(&key)
                .await
                .with_context(|| format!("Failed to delete record: {key}"))?;
        }
        info!(user = uid, id, "Deleted investment");
        Ok(())
    }

    pub async fn create_investment_transaction(
        &self,
        uid: &str,
        investment_id: &str,
        input: NewInvestmentTransaction,
        now: NaiveDateTime,
    ) -> ServiceResult<InvestmentTransaction> {
        let uid = segment(uid, "user id")?;
        let investment_id = segment(investment_id, "investment id")?;
        self.require_investment(uid, investment_id).await?;

        let tx = InvestmentTransaction {
            id: Uuid::new_v4().to_string(),
            investment_id: investment_id.to_string(),
            kind: required_text(input.kind, "type")?,
            quantity: required_number(input.quantity, "quantity")?,
            price: required_number(input.price, "price")?,
            total_amount: required_number(input.total_amount, "totalAmount")?,
            date: required_text(input.date, "date")?,
            created_at: timestamp(now),
        };
        let key = format!("{}{}", Self::investment_tx_prefix(uid, investment_id), tx.id);
        self.write(&key, &tx).await?;
        Ok(tx)
    }

    pub async fn list_investment_transactions(
        &self,
        uid: &str,
        investment_id: &str,
    ) -> ServiceResult<Vec<InvestmentTransaction>> {
        let uid = segment(uid, "user id")?;
        let investment_id = segment(investment_id, "investment id")?;
        self.require_investment(uid, investment_id).await?;
        let mut items: Vec<InvestmentTransaction> = self
            .scan(&Self::investment_tx_prefix(uid, investment_id))
            .await?;
        items.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(items)
    }

    async fn require_investment(&self, uid: &str, id: &str) -> ServiceResult<Investment> {
        self.read::<Investment>(&format!("{}{}", Self::investments_prefix(uid), id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("Investment not found".to_string()))
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Unreadable record {}: {}", key, e);
            None
        }
    }
}
