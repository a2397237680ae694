//! Fetch-or-serve decisions over the daily checkpoint schedule

use super::clock::{Checkpoint, ClockWindow};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const STORED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Last successful fetch for a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRecord {
    pub date: NaiveDate,
    /// Kept as the raw stored text so a damaged value degrades to a refetch
    /// instead of failing the whole entry.
    pub fetched_at: String,
    #[serde(default)]
    pub checkpoint_index: Option<usize>,
}

impl FetchRecord {
    pub fn at(now: NaiveDateTime, window: &ClockWindow) -> Self {
        Self {
            date: now.date(),
            fetched_at: now.format(STORED_TIMESTAMP_FORMAT).to_string(),
            checkpoint_index: window.window_index_of(now.time()),
        }
    }

    /// Time of day of the fetch. Accepts a full timestamp (space or `T`
    /// separated) or a bare `HH:MM[:SS]`.
    pub fn fetched_time(&self) -> Option<NaiveTime> {
        let raw = self.fetched_at.trim();
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, STORED_TIMESTAMP_FORMAT) {
            return Some(dt.time());
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(dt.time());
        }
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .ok()
    }
}

/// Why cached data is served instead of calling the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hold {
    NonTradingDay,
    BeforeFirstCheckpoint { first: Checkpoint },
    AwaitingCheckpoint { next: Checkpoint },
    DayComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Fetch,
    UseCache(Hold),
}

impl Decision {
    pub fn is_fetch(&self) -> bool {
        matches!(self, Decision::Fetch)
    }
}

/// Stateless: every answer is a pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct FetchDecisionEngine {
    window: ClockWindow,
}

impl FetchDecisionEngine {
    pub fn new(window: ClockWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &ClockWindow {
        &self.window
    }

    pub fn should_fetch(
        &self,
        now: NaiveDateTime,
        last_fetch: Option<&FetchRecord>,
        trading_day_required: bool,
    ) -> bool {
        self.decide(now, last_fetch, trading_day_required).is_fetch()
    }

    pub fn decide(
        &self,
        now: NaiveDateTime,
        last_fetch: Option<&FetchRecord>,
        trading_day_required: bool,
    ) -> Decision {
        if trading_day_required && !ClockWindow::is_trading_day(now.date()) {
            return Decision::UseCache(Hold::NonTradingDay);
        }

        let last = match last_fetch {
            Some(record) if record.date == now.date() => record,
            _ => return self.decide_fresh_day(now),
        };

        let Some(fetched_time) = last.fetched_time() else {
            warn!(
                fetched_at = %last.fetched_at,
                "Unreadable fetch timestamp, treating day as empty"
            );
            return self.decide_fresh_day(now);
        };

        let next = match self.window.window_index_of(fetched_time) {
            Some(index) => self.window.next_checkpoint_after(index),
            // Fetched between checkpoints: wait for the first one after it.
            None => self.window.first_checkpoint_later_than(fetched_time),
        };

        let decision = match next {
            Some(next) if self.window.has_reached(now.time(), next) => Decision::Fetch,
            Some(next) => Decision::UseCache(Hold::AwaitingCheckpoint { next }),
            None => Decision::UseCache(Hold::DayComplete),
        };
        debug!(
            now = %now,
            fetched_at = %last.fetched_at,
            ?decision,
            "Checkpoint decision"
        );
        decision
    }

    fn decide_fresh_day(&self, now: NaiveDateTime) -> Decision {
        let first = self.window.first();
        if self.window.has_reached(now.time(), first) {
            Decision::Fetch
        } else {
            Decision::UseCache(Hold::BeforeFirstCheckpoint { first })
        }
    }
}
