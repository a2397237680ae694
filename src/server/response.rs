use crate::core::QuotaStatus;
use crate::resource::{Served, Source};
use chrono::NaiveDate;
use serde::Serialize;

/// Response body for every successful market data request.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    pub source: Source,
    pub cached: bool,
    pub date: NaiveDate,
    pub fetched_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaStatus>,
}

impl<T> From<Served<T>> for Envelope<T> {
    fn from(served: Served<T>) -> Self {
        Envelope {
            success: true,
            cached: served.is_cached(),
            data: served.data,
            source: served.source,
            date: served.date,
            fetched_at: served.fetched_at,
            warning: served.warning,
            quota: served.quota,
        }
    }
}

/// Response body for listings and lookups that carry no cache metadata.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
