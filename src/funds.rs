//! Mutual fund detail behind a daily request quota.

use crate::core::fund::{self, CachedSeries, FundAction, price_on_or_before};
use crate::core::market::FundDetail;
use crate::core::{
    CacheEntry, CacheStore, ClockWindow, FetchRecord, QuotaStatus, QuotaTracker, ServiceError,
    ServiceResult,
};
use crate::providers::FundDetailProvider;
use crate::resource::{Served, Source};
use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const QUOTA_EXHAUSTED_WARNING: &str = "Daily API limit reached, serving cached data";

/// Answer to a cache-only price lookup.
#[derive(Debug, Clone, Serialize)]
pub struct PriceCheck {
    pub fund_code: String,
    pub has_price: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub needs_api_request: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'static str>,
    pub quota: QuotaStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub id: Value,
}

/// Uppercased, trimmed fund code. Empty codes are rejected.
pub fn normalize_code(raw: &str) -> ServiceResult<String> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() {
        return Err(ServiceError::InvalidRequest(
            "fund_code parameter is required".to_string(),
        ));
    }
    if code.contains(':') {
        return Err(ServiceError::InvalidRequest(format!("Invalid fund code: {code}")));
    }
    Ok(code)
}

pub struct FundService {
    provider: Arc<dyn FundDetailProvider>,
    cache: CacheStore,
    quota: QuotaTracker,
    window: ClockWindow,
    catalog_path: Option<PathBuf>,
}

impl FundService {
    pub fn new(
        provider: Arc<dyn FundDetailProvider>,
        cache: CacheStore,
        quota: QuotaTracker,
        window: ClockWindow,
        catalog_path: Option<PathBuf>,
    ) -> Self {
        Self {
            provider,
            cache,
            quota,
            window,
            catalog_path,
        }
    }

    pub fn key_for(code: &str) -> String {
        format!("fund:{code}")
    }

    /// Fund detail for `date` (today when absent).
    ///
    /// Only the fund key is locked while the cache answers. When a refresh is
    /// needed the quota key is locked next and held from the budget check
    /// until the increment.
    pub async fn detail(
        &self,
        raw_code: &str,
        date: Option<NaiveDate>,
        now: NaiveDateTime,
    ) -> ServiceResult<Served<FundDetail>> {
        let code = normalize_code(raw_code)?;
        let today = now.date();
        let target = date.unwrap_or(today);
        let key = Self::key_for(&code);

        let _guard = self.cache.lock(&key).await;
        let cached: Option<CacheEntry<FundDetail>> = self.cache.get(&key).await?;
        let series = cached.as_ref().map(|e| CachedSeries {
            series: &e.payload.series,
            fetched_on: e.fetch_record.date,
        });

        if !fund::needs_refresh(series, target, today) {
            let status = self.quota.status(now).await?;
            debug!(fund = %code, %target, "Fund served from cache");
            return Ok(with_quota(
                Served::from_entry(serve_cached(cached)?, Source::Cache),
                status,
            ));
        }

        let session = self.quota.session().await;
        let (allowed, status) = session.can_request(now).await?;
        let action = fund::decide(series, target, today, allowed);
        debug!(fund = %code, %target, ?action, remaining = status.remaining, "Fund decision");

        match action {
            FundAction::Serve => Ok(with_quota(
                Served::from_entry(serve_cached(cached)?, Source::Cache),
                status,
            )),
            FundAction::Exhausted => match cached {
                Some(entry) => {
                    warn!(fund = %code, "Fund quota exhausted, serving cached detail");
                    Ok(with_quota(
                        Served::from_entry(entry, Source::Cache).with_warning(QUOTA_EXHAUSTED_WARNING),
                        status,
                    ))
                }
                None => Err(ServiceError::QuotaExceeded(status)),
            },
            FundAction::Fetch => match self.provider.fetch_fund(&code).await {
                Ok(detail) => {
                    let entry = CacheEntry {
                        key,
                        payload: detail,
                        fetch_record: FetchRecord::at(now, &self.window),
                    };
                    if let Err(e) = self.cache.put(&entry).await {
                        error!(fund = %code, error = %e, "Failed to store fund detail");
                    }
                    let status = match session.increment(now).await {
                        Ok(status) => status,
                        Err(e) => {
                            error!(fund = %code, error = %e, "Failed to record fund quota use");
                            status
                        }
                    };
                    info!(fund = %code, remaining = status.remaining, "Fetched fund detail");
                    Ok(with_quota(Served::from_entry(entry, Source::Api), status))
                }
                Err(err) => match cached {
                    Some(entry) => {
                        warn!(fund = %code, error = %err, "Fund fetch failed, serving cached detail");
                        Ok(with_quota(
                            Served::from_entry(entry, Source::Cache)
                                .with_warning(format!("Upstream unavailable: {err}")),
                            status,
                        ))
                    }
                    None => {
                        error!(fund = %code, error = %err, "Fund fetch failed with nothing cached");
                        Err(ServiceError::Unavailable(err.to_string()))
                    }
                },
            },
        }
    }

    /// Price for `date` from the cache alone. Never calls the upstream or
    /// touches the quota.
    pub async fn price_check(
        &self,
        raw_code: &str,
        date: Option<NaiveDate>,
        now: NaiveDateTime,
    ) -> ServiceResult<PriceCheck> {
        let code = normalize_code(raw_code)?;
        let today = now.date();
        let target = date.unwrap_or(today);
        let quota = self.quota.status(now).await?;

        let mut check = PriceCheck {
            fund_code: code.clone(),
            has_price: false,
            price: None,
            date: None,
            needs_api_request: true,
            source: None,
            quota,
        };

        let Some(entry) = self
            .cache
            .get::<FundDetail>(&Self::key_for(&code))
            .await?
        else {
            debug!(fund = %code, "Price check: fund not cached");
            return Ok(check);
        };
        let detail = entry.payload;

        if target >= today {
            if let Some(price) = detail.last_price {
                check.has_price = true;
                check.price = Some(price);
                check.date = Some(today);
                check.needs_api_request = false;
                check.source = Some("cache_toplist");
                return Ok(check);
            }
        }

        if let Some(point) = price_on_or_before(&detail.series, target.min(today)) {
            check.has_price = true;
            check.price = Some(point.value);
            check.date = Some(point.date);
            check.needs_api_request = false;
            check.source = Some("cache_series");
        }
        Ok(check)
    }

    pub async fn quota_status(&self, now: NaiveDateTime) -> ServiceResult<QuotaStatus> {
        Ok(self.quota.status(now).await?)
    }

    pub fn daily_limit(&self) -> u32 {
        self.quota.daily_limit()
    }

    /// Fund list from the configured JSON file, sorted by key.
    pub async fn catalog(&self) -> ServiceResult<Vec<CatalogEntry>> {
        let Some(path) = &self.catalog_path else {
            return Err(ServiceError::NotFound(
                "No fund catalog configured".to_string(),
            ));
        };
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read fund catalog: {}", path.display()))?;
        Ok(parse_catalog(&text)
            .with_context(|| format!("Failed to parse fund catalog: {}", path.display()))?)
    }

    pub async fn cached_funds(&self) -> ServiceResult<Vec<crate::core::cache::EntrySummary>> {
        Ok(self.cache.summaries("fund:").await?)
    }
}

fn serve_cached(cached: Option<CacheEntry<FundDetail>>) -> ServiceResult<CacheEntry<FundDetail>> {
    cached.ok_or_else(|| ServiceError::Unavailable("Fund detail missing from cache".to_string()))
}

fn with_quota<T>(mut served: Served<T>, status: QuotaStatus) -> Served<T> {
    served.quota = Some(status);
    served
}

/// Accepts `{"data": [...]}` or a bare array.
pub fn parse_catalog(text: &str) -> anyhow::Result<Vec<CatalogEntry>> {
    let root: Value = serde_json::from_str(text)?;
    let items = match root {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => anyhow::bail!("expected a \"data\" array"),
        },
        _ => anyhow::bail!("expected an array or an object with \"data\""),
    };

    let mut entries: Vec<CatalogEntry> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<CatalogEntry>(item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping catalog item: {}", e);
                None
            }
        })
        .collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FetchError;
    use crate::core::fund::SeriesPoint;
    use crate::store::{KeyLocks, MemoryStore, PersistentStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubProvider {
        calls: AtomicUsize,
        series_end: NaiveDate,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl FundDetailProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch_fund(&self, code: &str) -> Result<FundDetail, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(FetchError::unavailable("stub", "down"));
            }
            Ok(FundDetail {
                code: code.to_string(),
                raw: serde_json::json!({"data": {}}),
                series: vec![
                    SeriesPoint {
                        date: self.series_end - chrono::Duration::days(2),
                        value: 1.0,
                        order: None,
                    },
                    SeriesPoint {
                        date: self.series_end,
                        value: 1.2,
                        order: None,
                    },
                ],
                last_price: Some(1.25),
            })
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, day).unwrap()
    }

    fn at(day: u32, h: u32) -> NaiveDateTime {
        d(day).and_hms_opt(h, 0, 0).unwrap()
    }

    fn service(provider: Arc<StubProvider>, limit: u32) -> FundService {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let locks = Arc::new(KeyLocks::new());
        FundService::new(
            provider,
            CacheStore::new(Arc::clone(&store), Arc::clone(&locks)),
            QuotaTracker::new("tefas", limit, store, locks),
            ClockWindow::default(),
            None,
        )
    }

    fn stub(series_end: NaiveDate, fail: bool) -> Arc<StubProvider> {
        Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            series_end,
            fail,
            delay: Duration::from_millis(10),
        })
    }

    /// Fails every write to the quota record.
    struct QuotaWriteFails(MemoryStore);

    #[async_trait]
    impl PersistentStore for QuotaWriteFails {
        async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            self.0.get(key).await
        }

        async fn put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
            if key.starts_with("quota:") {
                anyhow::bail!("disk full");
            }
            self.0.put(key, value).await
        }

        async fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.0.remove(key).await
        }

        async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
            self.0.scan_prefix(prefix).await
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  gsp ").unwrap(), "GSP");
        assert!(matches!(
            normalize_code("   "),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_detail_fetches_once_then_serves_cache() {
        let provider = stub(d(4), false);
        let svc = service(Arc::clone(&provider), 10);

        let first = svc.detail("gsp", None, at(5, 11)).await.unwrap();
        assert_eq!(first.source, Source::Api);
        assert_eq!(first.data.code, "GSP");
        let quota = first.quota.unwrap();
        assert_eq!((quota.request_count, quota.remaining), (1, 9));

        // Series ends yesterday, which is current for a one-day publication lag.
        let second = svc.detail("GSP", None, at(5, 15)).await.unwrap();
        assert_eq!(second.source, Source::Cache);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // A covered historical date never fetches.
        let past = svc.detail("GSP", Some(d(3)), at(5, 15)).await.unwrap();
        assert_eq!(past.source, Source::Cache);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_series_refetches_next_day() {
        let provider = stub(d(4), false);
        let svc = service(Arc::clone(&provider), 10);
        svc.detail("GSP", None, at(5, 11)).await.unwrap();

        // On the 7th the series ending on the 4th is stale.
        let served = svc.detail("GSP", None, at(7, 11)).await.unwrap();
        assert_eq!(served.source, Source::Api);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_quota_exhausted_without_cache_is_an_error() {
        let provider = stub(d(4), false);
        let svc = service(Arc::clone(&provider), 1);
        svc.detail("GSP", None, at(5, 11)).await.unwrap();

        let err = svc.detail("TTE", None, at(5, 12)).await.unwrap_err();
        match err {
            ServiceError::QuotaExceeded(status) => {
                assert_eq!(status.request_count, 1);
                assert_eq!(status.remaining, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_quota_exhausted_with_stale_cache_serves_it() {
        let provider = stub(d(4), false);
        let svc = service(Arc::clone(&provider), 1);
        svc.detail("GSP", None, at(5, 11)).await.unwrap();

        // Next day, earlier quota spent on another fund.
        let other = svc.detail("TTE", None, at(7, 9)).await.unwrap();
        assert_eq!(other.source, Source::Api);

        let served = svc.detail("GSP", None, at(7, 11)).await.unwrap();
        assert_eq!(served.source, Source::Cache);
        assert_eq!(served.warning.as_deref(), Some(QUOTA_EXHAUSTED_WARNING));
    }

    #[tokio::test]
    async fn test_failed_fetch_does_not_spend_quota() {
        let provider = stub(d(4), true);
        let svc = service(Arc::clone(&provider), 10);

        let err = svc.detail("GSP", None, at(5, 11)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));
        let status = svc.quota_status(at(5, 11)).await.unwrap();
        assert_eq!(status.request_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_detail_requests_fetch_once() {
        let provider = stub(d(4), false);
        let svc = Arc::new(service(Arc::clone(&provider), 10));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let svc = Arc::clone(&svc);
                tokio::spawn(async move { svc.detail("GSP", None, at(5, 11)).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let status = svc.quota_status(at(5, 11)).await.unwrap();
        assert_eq!(status.request_count, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_does_not_wait_for_other_fund_fetch() {
        let provider = Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            series_end: d(4),
            fail: false,
            delay: Duration::from_millis(1500),
        });
        let svc = Arc::new(service(Arc::clone(&provider), 10));
        svc.detail("AFT", None, at(5, 11)).await.unwrap();

        let slow = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.detail("GSP", None, at(5, 11)).await.unwrap() })
        };
        // Let the GSP fetch take its locks and reach the upstream.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        let cached = svc.detail("AFT", None, at(5, 12)).await.unwrap();
        let waited = started.elapsed();
        assert_eq!(cached.source, Source::Cache);
        assert!(waited < Duration::from_millis(500), "waited {waited:?}");
        assert_eq!(cached.quota.unwrap().request_count, 1);

        assert_eq!(slow.await.unwrap().source, Source::Api);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetched_detail_served_when_quota_write_fails() {
        let provider = stub(d(4), false);
        let store: Arc<dyn PersistentStore> = Arc::new(QuotaWriteFails(MemoryStore::new()));
        let locks = Arc::new(KeyLocks::new());
        let svc = FundService::new(
            Arc::clone(&provider) as Arc<dyn FundDetailProvider>,
            CacheStore::new(Arc::clone(&store), Arc::clone(&locks)),
            QuotaTracker::new("tefas", 10, store, locks),
            ClockWindow::default(),
            None,
        );

        let served = svc.detail("GSP", None, at(5, 11)).await.unwrap();
        assert_eq!(served.source, Source::Api);
        assert_eq!(served.data.code, "GSP");
        assert!(served.quota.is_some());

        // The detail was cached, so the next request does not refetch.
        let again = svc.detail("GSP", None, at(5, 12)).await.unwrap();
        assert_eq!(again.source, Source::Cache);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_price_check_reads_cache_only() {
        let provider = stub(d(4), false);
        let svc = service(Arc::clone(&provider), 10);

        let miss = svc.price_check("GSP", None, at(5, 11)).await.unwrap();
        assert!(!miss.has_price);
        assert!(miss.needs_api_request);

        svc.detail("GSP", None, at(5, 11)).await.unwrap();

        let today = svc.price_check("GSP", None, at(5, 12)).await.unwrap();
        assert_eq!(today.price, Some(1.25));
        assert_eq!(today.source, Some("cache_toplist"));
        assert_eq!(today.date, Some(d(5)));

        let past = svc.price_check("GSP", Some(d(3)), at(5, 12)).await.unwrap();
        assert_eq!(past.price, Some(1.0));
        assert_eq!(past.date, Some(d(2)));
        assert_eq!(past.source, Some("cache_series"));

        let too_early = svc.price_check("GSP", Some(d(1)), at(5, 12)).await.unwrap();
        assert!(!too_early.has_price);
        assert!(too_early.needs_api_request);

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(today.quota.request_count, 1);
    }

    #[test]
    fn test_parse_catalog_shapes() {
        let wrapped = r#"{"data": [{"key": "TTE", "value": "İş Portföy", "id": 2},
                                  {"key": "GSP", "value": "Garanti", "id": "1"}]}"#;
        let entries = parse_catalog(wrapped).unwrap();
        assert_eq!(entries[0].key, "GSP");
        assert_eq!(entries[1].id, serde_json::json!(2));

        let bare = r#"[{"key": "AFT", "value": "Ak Portföy"}]"#;
        assert_eq!(parse_catalog(bare).unwrap().len(), 1);

        assert!(parse_catalog(r#"{"items": []}"#).is_err());
    }

    #[tokio::test]
    async fn test_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("funds.json");
        std::fs::write(&path, r#"[{"key": "B"}, {"key": "A"}]"#).unwrap();

        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let locks = Arc::new(KeyLocks::new());
        let svc = FundService::new(
            stub(d(4), false),
            CacheStore::new(Arc::clone(&store), Arc::clone(&locks)),
            QuotaTracker::new("tefas", 10, store, locks),
            ClockWindow::default(),
            Some(path),
        );
        let keys: Vec<_> = svc.catalog().await.unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["A", "B"]);

        let unconfigured = service(stub(d(4), false), 10);
        assert!(matches!(
            unconfigured.catalog().await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
