//! Checkpoint-scheduled resources: decide, fetch, cache and fall back.

use crate::core::cache::EntrySummary;
use crate::core::quota::QuotaStatus;
use crate::core::{
    CacheEntry, CacheStore, Decision, FetchDecisionEngine, FetchError, FetchRecord, Hold,
    ServiceError, ServiceResult,
};
use crate::providers::ProviderAdapter;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cache,
    Api,
}

/// Data handed back to a caller along with where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct Served<T> {
    pub data: T,
    pub source: Source,
    pub date: NaiveDate,
    pub fetched_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaStatus>,
}

impl<T> Served<T> {
    pub fn from_entry(entry: CacheEntry<T>, source: Source) -> Self {
        Served {
            data: entry.payload,
            source,
            date: entry.fetch_record.date,
            fetched_at: entry.fetch_record.fetched_at,
            warning: None,
            quota: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn is_cached(&self) -> bool {
        self.source == Source::Cache
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Served<U> {
        Served {
            data: f(self.data),
            source: self.source,
            date: self.date,
            fetched_at: self.fetched_at,
            warning: self.warning,
            quota: self.quota,
        }
    }
}

/// Why no fresh data was obtained for today.
enum Shortfall {
    Held(Hold),
    Failed(FetchError),
}

/// One upstream snapshot per day, refreshed at the configured checkpoints.
///
/// Entries are keyed `"{prefix}:{date}"`. The per-key lock is held from the
/// decision until the new entry is written, so concurrent callers for the same
/// day trigger at most one upstream call.
pub struct ScheduledResource<T> {
    prefix: String,
    adapter: Arc<dyn ProviderAdapter<T>>,
    cache: CacheStore,
    engine: FetchDecisionEngine,
    trading_day_required: bool,
}

impl<T> ScheduledResource<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        prefix: &str,
        adapter: Arc<dyn ProviderAdapter<T>>,
        cache: CacheStore,
        engine: FetchDecisionEngine,
        trading_day_required: bool,
    ) -> Self {
        Self {
            prefix: prefix.to_string(),
            adapter,
            cache,
            engine,
            trading_day_required,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key_for(&self, date: NaiveDate) -> String {
        format!("{}:{}", self.prefix, date.format("%Y-%m-%d"))
    }

    /// Today's data, fetching from the upstream when a checkpoint is due.
    pub async fn serve(&self, now: NaiveDateTime) -> ServiceResult<Served<T>> {
        let today = now.date();
        let key = self.key_for(today);
        let _guard = self.cache.lock(&key).await;

        let cached: Option<CacheEntry<T>> = self.cache.get(&key).await?;
        let decision = self.engine.decide(
            now,
            cached.as_ref().map(|e| &e.fetch_record),
            self.trading_day_required,
        );
        debug!(resource = %self.prefix, ?decision, "Serving");

        let shortfall = match decision {
            Decision::Fetch => match self.adapter.fetch().await {
                Ok(payload) => return Ok(self.store_fresh(key, payload, now).await),
                Err(err) => {
                    warn!(
                        resource = %self.prefix,
                        provider = self.adapter.name(),
                        error = %err,
                        "Upstream fetch failed, falling back to cache"
                    );
                    Shortfall::Failed(err)
                }
            },
            Decision::UseCache(hold) => Shortfall::Held(hold),
        };
        self.fall_back(now, cached, shortfall).await
    }

    /// Data for a specific day. Past days are answered from the cache only.
    pub async fn serve_for_date(
        &self,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> ServiceResult<Served<T>> {
        if date == now.date() {
            return self.serve(now).await;
        }
        let key = self.key_for(date);
        match self.cache.get::<T>(&key).await? {
            Some(entry) => Ok(Served::from_entry(entry, Source::Cache)),
            None => Err(ServiceError::NotFound(format!(
                "No {} data for {}",
                self.prefix, date
            ))),
        }
    }

    pub async fn summaries(&self) -> ServiceResult<Vec<EntrySummary>> {
        Ok(self.cache.summaries(&format!("{}:", self.prefix)).await?)
    }

    async fn store_fresh(&self, key: String, payload: T, now: NaiveDateTime) -> Served<T> {
        let entry = CacheEntry {
            key,
            payload,
            fetch_record: FetchRecord::at(now, self.engine.window()),
        };
        match self.cache.put(&entry).await {
            Ok(()) => info!(resource = %self.prefix, key = %entry.key, "Stored fresh snapshot"),
            // The caller still gets the data, the next request simply refetches.
            Err(e) => error!(resource = %self.prefix, error = %e, "Failed to store snapshot"),
        }
        Served::from_entry(entry, Source::Api)
    }

    async fn fall_back(
        &self,
        now: NaiveDateTime,
        cached: Option<CacheEntry<T>>,
        shortfall: Shortfall,
    ) -> ServiceResult<Served<T>> {
        if let Some(entry) = cached {
            let served = Served::from_entry(entry, Source::Cache);
            return Ok(match shortfall {
                Shortfall::Held(_) => served,
                Shortfall::Failed(_) => {
                    let fetched_at = served.fetched_at.clone();
                    served.with_warning(format!(
                        "Upstream unavailable, serving data fetched at {fetched_at}"
                    ))
                }
            });
        }

        let today_key = self.key_for(now.date());
        let prefix = format!("{}:", self.prefix);
        if let Some(previous) = self.cache.latest_before::<T>(&prefix, &today_key).await? {
            let date = previous.fetch_record.date;
            warn!(resource = %self.prefix, %date, "No data for today, serving an earlier day");
            return Ok(Served::from_entry(previous, Source::Cache)
                .with_warning(format!("No data for today yet, showing data from {date}")));
        }

        Err(match shortfall {
            Shortfall::Held(Hold::NonTradingDay) => ServiceError::NonTradingDay { date: now.date() },
            Shortfall::Held(Hold::BeforeFirstCheckpoint { first }) => ServiceError::OffHours {
                checkpoints: self
                    .engine
                    .window()
                    .checkpoints()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                next_checkpoint: first.to_string(),
                current_time: now.format("%H:%M").to_string(),
            },
            Shortfall::Held(hold) => {
                ServiceError::Unavailable(format!("No {} data cached ({hold:?})", self.prefix))
            }
            Shortfall::Failed(err) => {
                error!(resource = %self.prefix, error = %err, "No cached data to fall back to");
                ServiceError::Unavailable(err.to_string())
            }
        })
    }
}
