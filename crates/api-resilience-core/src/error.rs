//! Error taxonomy for api-resilience.
//!
//! Every failure a caller can observe is one [`ApiError`] variant. Variants
//! carry the fields specific to their kind, and [`ApiError::envelope`]
//! derives the fields every kind shares (code, correlation id,
//! recoverability, request context). Dispatch on [`ErrorCode`] or match on
//! the variant; there is no type hierarchy to walk.
//!
//! ```
//! use api_resilience_core::{ApiError, ErrorCode, HttpError};
//!
//! let err = ApiError::Http(HttpError::new(503, "Service Unavailable"));
//! let envelope = err.envelope();
//! assert_eq!(envelope.code, ErrorCode::Http);
//! assert!(envelope.recoverable);
//! ```

use crate::request::RequestContext;
use crate::snapshot::CircuitBreakerStats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "HTTP_ERROR")]
    Http,
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    #[serde(rename = "TIMEOUT_ERROR")]
    Timeout,
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "RETRY_EXHAUSTED")]
    RetryExhausted,
    #[serde(rename = "CIRCUIT_BREAKER_OPEN")]
    CircuitBreakerOpen,
    #[serde(rename = "BATCH_ERROR")]
    Batch,
    #[serde(rename = "CACHE_ERROR")]
    Cache,
}

impl ErrorCode {
    /// String form used in `retryable_errors` configuration lists.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Http => "HTTP_ERROR",
            ErrorCode::Network => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT_ERROR",
            ErrorCode::Validation => "VALIDATION_ERROR",
            ErrorCode::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorCode::Batch => "BATCH_ERROR",
            ErrorCode::Cache => "CACHE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every error kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub code: ErrorCode,
    pub correlation_id: Option<String>,
    /// Whether a later attempt may succeed without caller intervention.
    pub recoverable: bool,
    pub context: Option<RequestContext>,
}

/// A non-success HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpError {
    pub status: u16,
    pub status_text: String,
    pub message: String,
    pub correlation_id: Option<String>,
    pub response_body: Option<serde_json::Value>,
    pub request_info: Option<RequestContext>,
}

impl HttpError {
    pub fn new(status: u16, status_text: impl Into<String>) -> Self {
        let status_text = status_text.into();
        Self {
            status,
            message: status_text.clone(),
            status_text,
            correlation_id: None,
            response_body: None,
            request_info: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_response_body(mut self, body: serde_json::Value) -> Self {
        self.response_body = Some(body);
        self
    }

    pub fn with_request_info(mut self, info: RequestContext) -> Self {
        self.request_info = Some(info);
        self
    }

    /// 408, 429 and every 5xx are transient by nature.
    pub fn is_transient(&self) -> bool {
        matches!(self.status, 408 | 429) || (500..600).contains(&self.status)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {} {}", self.status, self.status_text)?;
        if self.message != self.status_text {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Why a batched request did not get an executor outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BatchError {
    /// Batching is disabled in the current configuration.
    #[error("batching is disabled")]
    Disabled,
    /// `clear()` rejected the pending request.
    #[error("Batch manager cleared")]
    Cleared,
    /// The batch was dropped before it produced a result.
    #[error("batch was abandoned before completion")]
    Abandoned,
}

/// Every error surfaced by api-resilience.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("{0}")]
    Http(HttpError),

    /// The request never produced a response (connection refused, reset, DNS).
    #[error("network error: {message}")]
    Network {
        message: String,
        correlation_id: Option<String>,
    },

    /// The request did not complete in time.
    #[error("request timed out after {elapsed:?}")]
    Timeout {
        elapsed: Duration,
        correlation_id: Option<String>,
    },

    /// The request was rejected before it was sent.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Every permitted attempt failed with a retryable error.
    #[error("retries exhausted for {} {} after {attempts} attempts: {source}", context.method, context.endpoint)]
    RetryExhausted {
        source: Box<ApiError>,
        context: RequestContext,
        attempts: u32,
    },

    /// The circuit breaker for this endpoint is rejecting calls.
    #[error("circuit breaker '{key}' is open until {next_retry_time}")]
    CircuitOpen {
        key: String,
        /// Epoch milliseconds at which a trial call will be admitted.
        ///
        /// While a half-open trial is in flight this is the latest point the
        /// breaker could admit again: now plus the recovery timeout.
        next_retry_time: u64,
        stats: CircuitBreakerStats,
    },

    /// The batch manager rejected or abandoned the request.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// A cache backend could not be set up.
    #[error("cache error: {message}")]
    Cache { message: String },
}

impl ApiError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        ApiError::Network {
            message: message.into(),
            correlation_id: None,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(elapsed: Duration) -> Self {
        ApiError::Timeout {
            elapsed,
            correlation_id: None,
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Creates an HTTP error from a status code and reason phrase.
    pub fn http(status: u16, status_text: impl Into<String>) -> Self {
        ApiError::Http(HttpError::new(status, status_text))
    }

    /// The kind of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Http(_) => ErrorCode::Http,
            ApiError::Network { .. } => ErrorCode::Network,
            ApiError::Timeout { .. } => ErrorCode::Timeout,
            ApiError::Validation { .. } => ErrorCode::Validation,
            ApiError::RetryExhausted { .. } => ErrorCode::RetryExhausted,
            ApiError::CircuitOpen { .. } => ErrorCode::CircuitBreakerOpen,
            ApiError::Batch(_) => ErrorCode::Batch,
            ApiError::Cache { .. } => ErrorCode::Cache,
        }
    }

    /// Correlation id, looking through retry exhaustion to the last failure.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            ApiError::Http(e) => e.correlation_id.as_deref(),
            ApiError::Network { correlation_id, .. } | ApiError::Timeout { correlation_id, .. } => {
                correlation_id.as_deref()
            }
            ApiError::RetryExhausted {
                source, context, ..
            } => context
                .correlation_id
                .as_deref()
                .or_else(|| source.correlation_id()),
            _ => None,
        }
    }

    /// Whether a later attempt may succeed without caller intervention.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ApiError::Http(e) => e.is_transient(),
            ApiError::Network { .. } | ApiError::Timeout { .. } => true,
            ApiError::CircuitOpen { .. } | ApiError::Cache { .. } => true,
            ApiError::RetryExhausted { source, .. } => source.is_recoverable(),
            ApiError::Validation { .. } | ApiError::Batch(_) => false,
        }
    }

    /// HTTP status, looking through retry exhaustion.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http(e) => Some(e.status),
            ApiError::RetryExhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Returns the shared envelope for this error.
    pub fn envelope(&self) -> ErrorEnvelope {
        let context = match self {
            ApiError::Http(e) => e.request_info.clone(),
            ApiError::RetryExhausted { context, .. } => Some(context.clone()),
            _ => None,
        };
        ErrorEnvelope {
            code: self.code(),
            correlation_id: self.correlation_id().map(str::to_string),
            recoverable: self.is_recoverable(),
            context,
        }
    }

    /// Returns `true` if the circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ApiError::CircuitOpen { .. })
    }

    /// Returns `true` if retries were exhausted.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, ApiError::RetryExhausted { .. })
    }

    /// Attaches a correlation id where the variant carries one and none is set.
    pub fn with_correlation_id(mut self, id: Option<&str>) -> Self {
        let Some(id) = id else {
            return self;
        };
        match &mut self {
            ApiError::Http(e) if e.correlation_id.is_none() => {
                e.correlation_id = Some(id.to_string())
            }
            ApiError::Network { correlation_id, .. } | ApiError::Timeout { correlation_id, .. }
                if correlation_id.is_none() =>
            {
                *correlation_id = Some(id.to_string())
            }
            _ => {}
        }
        self
    }
}

impl From<HttpError> for ApiError {
    fn from(err: HttpError) -> Self {
        ApiError::Http(err)
    }
}
