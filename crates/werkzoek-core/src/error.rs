use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Transport-level failure codes.
///
/// The string forms are stable; UIs key their messages off them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCode {
    /// The per-call deadline elapsed while queued or in flight.
    Timeout,
    /// DNS, connect, or TLS failure.
    Network,
    /// The request could not be built or sent.
    Request,
    /// The response body could not be read.
    Body,
    /// The underlying failure carried no recognisable code.
    Unknown,
}

impl TransportCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportCode::Timeout => "ETIMEDOUT",
            TransportCode::Network => "ERR_NETWORK",
            TransportCode::Request => "ERR_REQUEST",
            TransportCode::Body => "ERR_BODY",
            TransportCode::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse failure classes, used by callers deciding what to show or retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Transport,
    Protocol,
}

/// Every failure a gateway call or query operation can produce.
///
/// Each variant carries only what is relevant to its kind; [`ApiError::body`]
/// flattens it into the `{ code, message, details }` shape for display.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// A required argument was missing. Raised before anything is enqueued.
    #[error("Invalid argument `{field}`: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// DNS, connect, TLS, timeout, or body-read failure.
    #[error("Transport error ({code}): {message}")]
    Transport { code: TransportCode, message: String },

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// The response body did not match the expected shape.
    #[error("Failed to decode response body: {message}")]
    Decode { message: String, body: String },

    /// The caller cancelled the request before it was dispatched.
    #[error("Request was cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn transport(code: TransportCode, message: impl Into<String>) -> Self {
        ApiError::Transport {
            code,
            message: message.into(),
        }
    }

    /// Build a status error from a non-2xx response body.
    ///
    /// JSON bodies are kept as-is in `details`; anything else is kept as a
    /// string so the raw payload still reaches the caller.
    pub fn from_status(status: u16, body: &str) -> Self {
        let details = if body.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<serde_json::Value>(body)
                    .unwrap_or_else(|_| serde_json::Value::String(body.to_string())),
            )
        };
        let message = details
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Request failed with status code {status}"));

        ApiError::Status {
            status,
            message,
            details,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::Transport { .. } | ApiError::Cancelled => ErrorKind::Transport,
            ApiError::Status { .. } | ApiError::Decode { .. } => ErrorKind::Protocol,
        }
    }

    /// Stable, non-empty error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "INVALID_ARGUMENT",
            ApiError::Transport { code, .. } => code.as_str(),
            ApiError::Status { status, .. } if (400..500).contains(status) => "ERR_BAD_REQUEST",
            ApiError::Status { .. } => "ERR_BAD_RESPONSE",
            ApiError::Decode { .. } => "ERR_DECODE",
            ApiError::Cancelled => "ERR_CANCELED",
        }
    }

    /// Human-readable message, never empty.
    pub fn message(&self) -> String {
        let message = match self {
            ApiError::Validation { message, .. }
            | ApiError::Transport { message, .. }
            | ApiError::Status { message, .. }
            | ApiError::Decode { message, .. } => message.clone(),
            ApiError::Cancelled => String::new(),
        };
        if message.is_empty() {
            self.to_string()
        } else {
            message
        }
    }

    /// HTTP status, for protocol failures that have one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport { code, .. } => !matches!(code, TransportCode::Request),
            ApiError::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            ApiError::Validation { .. } | ApiError::Decode { .. } | ApiError::Cancelled => false,
        }
    }

    /// Flatten into the `{ code, message, details }` display shape.
    pub fn body(&self) -> ErrorBody {
        let details = match self {
            ApiError::Status { details, .. } => details.clone(),
            ApiError::Decode { body, .. } if !body.is_empty() => {
                Some(serde_json::Value::String(body.clone()))
            }
            ApiError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            _ => None,
        };
        ErrorBody {
            code: self.code().to_string(),
            message: self.message(),
            details,
        }
    }
}

/// The normalized error shape handed to presentation code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<ApiError> for ErrorBody {
    fn from(error: ApiError) -> Self {
        error.body()
    }
}

/// The secure credential store could not be read or written.
#[derive(Error, Debug, Clone)]
#[error("Credential store error: {0}")]
pub struct CredentialError(pub String);
