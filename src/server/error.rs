use crate::core::ServiceError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Service(ServiceError::InvalidRequest(message.into()))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Service(ServiceError::Unauthorized(message.into()))
    }
}

fn status_of(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::InvalidRequest(_)
        | ServiceError::OffHours { .. }
        | ServiceError::NonTradingDay { .. } => StatusCode::BAD_REQUEST,
        ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Extra fields the caller can act on.
fn details_of(err: &ServiceError) -> Value {
    match err {
        ServiceError::OffHours {
            checkpoints,
            next_checkpoint,
            current_time,
        } => json!({
            "checkpoints": checkpoints,
            "next_checkpoint": next_checkpoint,
            "current_time": current_time,
        }),
        ServiceError::NonTradingDay { date } => json!({ "date": date }),
        ServiceError::QuotaExceeded(status) => json!({ "quota": status }),
        _ => json!({}),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::Service(ServiceError::Storage(e)) | ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                    json!({}),
                )
            }
            ApiError::Service(e) => (status_of(e), e.code(), e.to_string(), details_of(e)),
        };

        let mut body = json!({
            "success": false,
            "error": code,
            "message": message,
        });
        if let (Value::Object(body), Value::Object(details)) = (&mut body, details) {
            body.extend(details);
        }
        (status, Json(body)).into_response()
    }
}
