//! Daily request budget for rate-limited upstreams

use crate::store::{KeyLocks, PersistentStore};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Persisted counter. `date` is always the day the count belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub date: NaiveDate,
    pub request_count: u32,
    #[serde(default)]
    pub last_request_at: Option<String>,
}

impl QuotaRecord {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            request_count: 0,
            last_request_at: None,
        }
    }
}

/// Budget as seen from a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub date: NaiveDate,
    pub request_count: u32,
    pub remaining: u32,
    pub daily_limit: u32,
    pub last_request_at: Option<String>,
}

/// Tracks calls made to one upstream per calendar day.
///
/// The tracker never refuses an increment. Callers check [`can_request`]
/// first and increment only after a successful upstream call. A record from
/// an earlier day reads as zero but is only rewritten on the next increment.
///
/// [`can_request`]: QuotaTracker::can_request
pub struct QuotaTracker {
    name: String,
    daily_limit: u32,
    store: Arc<dyn PersistentStore>,
    locks: Arc<KeyLocks>,
}

impl QuotaTracker {
    pub fn new(
        name: &str,
        daily_limit: u32,
        store: Arc<dyn PersistentStore>,
        locks: Arc<KeyLocks>,
    ) -> Self {
        Self {
            name: name.to_string(),
            daily_limit,
            store,
            locks,
        }
    }

    pub fn key(&self) -> String {
        format!("quota:{}", self.name)
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    pub async fn can_request(&self, now: NaiveDateTime) -> Result<(bool, QuotaStatus)> {
        let status = self.status(now).await?;
        Ok((status.request_count < self.daily_limit, status))
    }

    /// Read-only view of today's budget. Never counts as a request.
    pub async fn status(&self, now: NaiveDateTime) -> Result<QuotaStatus> {
        let record = self.current(now.date()).await?;
        Ok(self.to_status(record))
    }

    pub async fn increment(&self, now: NaiveDateTime) -> Result<QuotaStatus> {
        let _guard = self.locks.lock(&self.key()).await;
        self.increment_locked(now).await
    }

    /// Holds the quota key lock until dropped, so a check, the upstream call
    /// and the increment happen as one step.
    pub async fn session(&self) -> QuotaSession<'_> {
        let guard = self.locks.lock(&self.key()).await;
        QuotaSession {
            tracker: self,
            _guard: guard,
        }
    }

    async fn increment_locked(&self, now: NaiveDateTime) -> Result<QuotaStatus> {
        let mut record = self.current(now.date()).await?;
        record.request_count += 1;
        record.last_request_at = Some(now.format("%Y-%m-%dT%H:%M:%S").to_string());

        let bytes = serde_json::to_vec(&record).context("Failed to encode quota record")?;
        self.store
            .put(&self.key(), bytes)
            .await
            .with_context(|| format!("Failed to persist quota for {}", self.name))?;
        info!(
            quota = %self.name,
            request_count = record.request_count,
            daily_limit = self.daily_limit,
            "Quota incremented"
        );
        Ok(self.to_status(record))
    }

    /// Stored record if it belongs to `today`, otherwise a zero record.
    async fn current(&self, today: NaiveDate) -> Result<QuotaRecord> {
        let key = self.key();
        let Some(bytes) = self
            .store
            .get(&key)
            .await
            .with_context(|| format!("Failed to read quota for {}", self.name))?
        else {
            return Ok(QuotaRecord::empty(today));
        };

        match serde_json::from_slice::<QuotaRecord>(&bytes) {
            Ok(record) if record.date == today => Ok(record),
            Ok(record) => {
                debug!(quota = %self.name, stored = %record.date, "Quota day rolled over");
                Ok(QuotaRecord::empty(today))
            }
            Err(e) => {
                warn!(quota = %self.name, error = %e, "Corrupt quota record, starting from zero");
                Ok(QuotaRecord::empty(today))
            }
        }
    }

    fn to_status(&self, record: QuotaRecord) -> QuotaStatus {
        QuotaStatus {
            date: record.date,
            request_count: record.request_count,
            remaining: self.daily_limit.saturating_sub(record.request_count),
            daily_limit: self.daily_limit,
            last_request_at: record.last_request_at,
        }
    }
}

/// Exclusive access to a quota for the lifetime of the value.
pub struct QuotaSession<'a> {
    tracker: &'a QuotaTracker,
    _guard: OwnedMutexGuard<()>,
}

impl QuotaSession<'_> {
    pub async fn can_request(&self, now: NaiveDateTime) -> Result<(bool, QuotaStatus)> {
        self.tracker.can_request(now).await
    }

    pub async fn increment(&self, now: NaiveDateTime) -> Result<QuotaStatus> {
        self.tracker.increment_locked(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn tracker(store: Arc<dyn PersistentStore>) -> QuotaTracker {
        QuotaTracker::new("tefas", 10, store, Arc::new(KeyLocks::new()))
    }

    #[tokio::test]
    async fn test_increment_counts_within_a_day() {
        let quota = tracker(Arc::new(MemoryStore::new()));
        let now = at(2025, 11, 5, 11);

        for expected in 1..=4 {
            let status = quota.increment(now).await.unwrap();
            assert_eq!(status.request_count, expected);
        }
        let status = quota.status(now).await.unwrap();
        assert_eq!(status.request_count, 4);
        assert_eq!(status.remaining, 6);
        assert_eq!(status.last_request_at.as_deref(), Some("2025-11-05T11:00:00"));
    }

    #[tokio::test]
    async fn test_new_day_resets_to_one_after_first_increment() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let quota = tracker(Arc::clone(&store));
        for _ in 0..7 {
            quota.increment(at(2025, 11, 5, 11)).await.unwrap();
        }

        let next_day = at(2025, 11, 6, 9);
        let (allowed, status) = quota.can_request(next_day).await.unwrap();
        assert!(allowed);
        assert_eq!(status.request_count, 0);
        assert_eq!(status.remaining, 10);

        // Lazy reset: the stored record is untouched until an increment.
        let raw = store.get(&quota.key()).await.unwrap().unwrap();
        let stored: QuotaRecord = serde_json::from_slice(&raw).unwrap();
        assert_eq!(stored.request_count, 7);

        let status = quota.increment(next_day).await.unwrap();
        assert_eq!(status.request_count, 1);
        assert_eq!(status.date, next_day.date());
    }

    #[tokio::test]
    async fn test_exhausted_quota_refuses() {
        let quota = tracker(Arc::new(MemoryStore::new()));
        let now = at(2025, 11, 5, 11);
        for _ in 0..10 {
            quota.increment(now).await.unwrap();
        }

        let (allowed, status) = quota.can_request(now).await.unwrap();
        assert!(!allowed);
        assert_eq!(status.remaining, 0);

        // Reporting only: the tracker itself does not cap the counter.
        let status = quota.increment(now).await.unwrap();
        assert_eq!(status.request_count, 11);
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_zero() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        store.put("quota:tefas", b"not json".to_vec()).await.unwrap();
        let quota = tracker(store);

        let (allowed, status) = quota.can_request(at(2025, 11, 5, 11)).await.unwrap();
        assert!(allowed);
        assert_eq!(status.request_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let quota = Arc::new(tracker(Arc::new(MemoryStore::new())));
        let now = at(2025, 11, 5, 11);

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let quota = Arc::clone(&quota);
                tokio::spawn(async move { quota.increment(now).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(quota.status(now).await.unwrap().request_count, 25);
    }

    #[tokio::test]
    async fn test_session_check_and_increment() {
        let quota = tracker(Arc::new(MemoryStore::new()));
        let now = at(2025, 11, 5, 11);
        {
            let session = quota.session().await;
            let (allowed, _) = session.can_request(now).await.unwrap();
            assert!(allowed);
            let status = session.increment(now).await.unwrap();
            assert_eq!(status.request_count, 1);
        }
        // Lock released on drop.
        assert_eq!(quota.increment(now).await.unwrap().request_count, 2);
    }
}
