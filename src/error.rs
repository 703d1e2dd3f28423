use std::time::Duration;

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::{HeaderValue, StatusCode, header};
use serde::Serialize;
use thiserror::Error;

pub type LimiterResult<T> = Result<T, LimiterError>;

/// Failures raised below the admission boundary. Never handed to callers as-is.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("invalid rate limit configuration: {0}")]
    Config(String),
    #[error("shared store request failed: {0}")]
    Store(String),
    #[error("shared store timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed shared store response: {0}")]
    Malformed(String),
    #[error("internal counter error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for LimiterError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<reqwest::Error> for LimiterError {
    fn from(err: reqwest::Error) -> Self {
        Self::Store(err.to_string())
    }
}

pub const GENERIC_REJECTION: &str = "Too many requests. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionKind {
    QuotaExceeded { retry_after_secs: Option<u64> },
    BackendFailure { cause: String },
}

/// The single failure shape callers of the admission service ever observe.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TooManyRequests {
    kind: RejectionKind,
    message: String,
}

impl TooManyRequests {
    pub fn quota_exceeded(retry_after_secs: Option<u64>) -> Self {
        let message = match retry_after_secs {
            Some(secs) => format!("Too many requests. Please try again in {secs} seconds."),
            None => GENERIC_REJECTION.to_string(),
        };
        Self {
            kind: RejectionKind::QuotaExceeded { retry_after_secs },
            message,
        }
    }

    pub fn backend_failure(err: &LimiterError) -> Self {
        Self {
            kind: RejectionKind::BackendFailure {
                cause: err.to_string(),
            },
            message: GENERIC_REJECTION.to_string(),
        }
    }

    pub fn kind(&self) -> &RejectionKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self.kind {
            RejectionKind::QuotaExceeded { retry_after_secs } => retry_after_secs,
            RejectionKind::BackendFailure { .. } => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl IntoResponse for TooManyRequests {
    fn into_response(self) -> Response {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorBody {
                error: "rate_limited",
                message: &self.message,
            }),
        )
            .into_response();

        if let Some(secs) = self.retry_after_secs()
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }

        response
    }
}
