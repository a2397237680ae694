//! Mutual fund price series and the refresh policy for fund detail

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One published price in a fund's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
    #[serde(default)]
    pub order: Option<i64>,
}

/// Entry with the latest date not after `date`. An exact match wins over any
/// predecessor.
pub fn price_on_or_before(series: &[SeriesPoint], date: NaiveDate) -> Option<&SeriesPoint> {
    series
        .iter()
        .filter(|p| p.date <= date)
        .max_by_key(|p| p.date)
}

pub fn latest_date(series: &[SeriesPoint]) -> Option<NaiveDate> {
    series.iter().map(|p| p.date).max()
}

/// What is known about the cached copy of a fund when a request arrives.
#[derive(Debug, Clone, Copy)]
pub struct CachedSeries<'a> {
    pub series: &'a [SeriesPoint],
    pub fetched_on: NaiveDate,
}

/// Whether the cached fund detail can answer a request for `target`.
///
/// `None` means nothing is cached. Dates after `today` are treated as today.
/// The provider publishes with a one-day lag, so a series ending yesterday
/// is current.
pub fn needs_refresh(cached: Option<CachedSeries<'_>>, target: NaiveDate, today: NaiveDate) -> bool {
    let Some(cached) = cached else {
        debug!("Fund cache MISS");
        return true;
    };

    if target < today {
        let found = price_on_or_before(cached.series, target).is_some();
        debug!(%target, found, "Historical fund lookup");
        return !found;
    }

    let yesterday = today - Duration::days(1);
    match latest_date(cached.series) {
        Some(latest) => {
            let stale = latest < yesterday;
            debug!(%latest, %yesterday, stale, "Fund series recency");
            stale
        }
        // Nothing to inspect. A copy fetched today is the best available.
        None => cached.fetched_on < today,
    }
}

/// Outcome of combining the freshness policy with the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundAction {
    /// Serve the cached copy, it answers the request.
    Serve,
    /// Call the upstream. Budget is available.
    Fetch,
    /// A refresh is needed but the quota is spent.
    Exhausted,
}

pub fn decide(
    cached: Option<CachedSeries<'_>>,
    target: NaiveDate,
    today: NaiveDate,
    quota_allows: bool,
) -> FundAction {
    if !needs_refresh(cached, target, today) {
        FundAction::Serve
    } else if quota_allows {
        FundAction::Fetch
    } else {
        FundAction::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn point(date: NaiveDate, value: f64) -> SeriesPoint {
        SeriesPoint {
            date,
            value,
            order: None,
        }
    }

    #[test]
    fn test_price_on_or_before() {
        let series = vec![point(d(2025, 1, 1), 1.0), point(d(2025, 1, 3), 1.2)];

        let hit = price_on_or_before(&series, d(2025, 1, 2)).unwrap();
        assert_eq!(hit.date, d(2025, 1, 1));
        assert_eq!(hit.value, 1.0);

        let exact = price_on_or_before(&series, d(2025, 1, 1)).unwrap();
        assert_eq!(exact.date, d(2025, 1, 1));

        assert!(price_on_or_before(&series, d(2024, 12, 31)).is_none());

        let after = price_on_or_before(&series, d(2025, 2, 1)).unwrap();
        assert_eq!(after.value, 1.2);
    }

    #[test]
    fn test_price_lookup_ignores_order_of_series() {
        let series = vec![
            point(d(2025, 1, 3), 1.2),
            point(d(2025, 1, 1), 1.0),
            point(d(2025, 1, 2), 1.1),
        ];
        assert_eq!(price_on_or_before(&series, d(2025, 1, 2)).unwrap().value, 1.1);
        assert!(price_on_or_before(&[], d(2025, 1, 2)).is_none());
    }

    #[test]
    fn test_nothing_cached_needs_fetch() {
        let today = d(2025, 11, 5);
        assert_eq!(decide(None, today, today, true), FundAction::Fetch);
        assert_eq!(decide(None, today, today, false), FundAction::Exhausted);
    }

    #[test]
    fn test_historical_date_found_in_series_is_served() {
        let today = d(2025, 11, 5);
        let series = vec![point(d(2025, 10, 30), 0.39), point(d(2025, 11, 4), 0.40)];
        let cached = CachedSeries {
            series: &series,
            fetched_on: d(2025, 11, 1),
        };

        assert_eq!(decide(Some(cached), d(2025, 11, 2), today, true), FundAction::Serve);
        assert_eq!(decide(Some(cached), d(2025, 10, 1), today, true), FundAction::Fetch);
        assert_eq!(
            decide(Some(cached), d(2025, 10, 1), today, false),
            FundAction::Exhausted
        );
    }

    #[test]
    fn test_today_with_one_day_lag_is_current() {
        let today = d(2025, 11, 5);
        let series = vec![point(d(2025, 11, 4), 0.40)];
        for fetched_on in [today, d(2025, 11, 4)] {
            let cached = CachedSeries {
                series: &series,
                fetched_on,
            };
            assert_eq!(decide(Some(cached), today, today, true), FundAction::Serve);
        }
    }

    #[test]
    fn test_today_with_old_series_is_stale() {
        let today = d(2025, 11, 5);
        let series = vec![point(d(2025, 11, 2), 0.40)];
        for fetched_on in [today, d(2025, 11, 2)] {
            let cached = CachedSeries {
                series: &series,
                fetched_on,
            };
            assert_eq!(decide(Some(cached), today, today, true), FundAction::Fetch);
            assert_eq!(decide(Some(cached), today, today, false), FundAction::Exhausted);
        }
    }

    #[test]
    fn test_series_up_to_today_is_current() {
        let today = d(2025, 11, 5);
        let series = vec![point(today, 0.41)];
        let cached = CachedSeries {
            series: &series,
            fetched_on: d(2025, 11, 1),
        };
        assert_eq!(decide(Some(cached), today, today, true), FundAction::Serve);
    }

    #[test]
    fn test_empty_series_depends_on_fetch_day() {
        let today = d(2025, 11, 5);
        let fresh = CachedSeries {
            series: &[],
            fetched_on: today,
        };
        assert_eq!(decide(Some(fresh), today, today, true), FundAction::Serve);

        let old = CachedSeries {
            series: &[],
            fetched_on: d(2025, 11, 4),
        };
        assert_eq!(decide(Some(old), today, today, true), FundAction::Fetch);
    }

    #[test]
    fn test_future_target_is_treated_as_today() {
        let today = d(2025, 11, 5);
        let series = vec![point(d(2025, 11, 4), 0.40)];
        let cached = CachedSeries {
            series: &series,
            fetched_on: today,
        };
        assert_eq!(decide(Some(cached), d(2025, 12, 1), today, true), FundAction::Serve);
    }
}
