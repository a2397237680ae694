use super::quota::QuotaStatus;
use chrono::NaiveDate;
use thiserror::Error;

/// Failure talking to an upstream provider. Produced only by adapters.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("{provider} unavailable: {reason}")]
    UpstreamUnavailable { provider: String, reason: String },
    #[error("{provider} returned malformed data: {reason}")]
    MalformedPayload { provider: String, reason: String },
}

impl FetchError {
    pub fn unavailable(provider: &str, reason: impl ToString) -> Self {
        FetchError::UpstreamUnavailable {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(provider: &str, reason: impl ToString) -> Self {
        FetchError::MalformedPayload {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Maps transport errors: timeouts, connection failures and non-2xx.
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::malformed(provider, err)
        } else {
            Self::unavailable(provider, err)
        }
    }
}

/// Structured outcome of a request that could not be served.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("No data yet today, next refresh at {next_checkpoint}")]
    OffHours {
        checkpoints: Vec<String>,
        next_checkpoint: String,
        current_time: String,
    },
    #[error("{date} is not a trading day and nothing is cached")]
    NonTradingDay { date: NaiveDate },
    #[error("{0}")]
    NotFound(String),
    #[error("Daily request limit of {} reached", .0.daily_limit)]
    QuotaExceeded(QuotaStatus),
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ServiceError {
    /// Stable machine-readable name for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidRequest(_) => "invalid_request",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::OffHours { .. } => "off_hours",
            ServiceError::NonTradingDay { .. } => "non_trading_day",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::QuotaExceeded(_) => "quota_exceeded",
            ServiceError::Unavailable(_) => "upstream_unavailable",
            ServiceError::Storage(_) => "storage_error",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
