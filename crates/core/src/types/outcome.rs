//! Normalized results and the error taxonomy callers branch on.
//!
//! Every gateway call ends in exactly one of two shapes: data from the
//! exchange, or a [`NormalizedError`] whose [`ErrorKind`] tells the caller what
//! happened independently of which exchange produced it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or missing input, or an upstream parameter rejection.
    BadRequest,
    /// Bad key, secret, passphrase, or signature. Terminal.
    AuthFailure,
    /// Upstream throttling survived the retry bound.
    RateLimited,
    /// Request timestamp outside the exchange's receive window.
    ClockSkew,
    /// Network failure, timeout, 5xx, or an ambiguous write.
    UpstreamUnavailable,
    /// Unknown symbol or order.
    NotFound,
    /// Upstream payload that no mapping recognises.
    UnknownUpstreamError,
}

impl ErrorKind {
    /// HTTP status the outer layer should answer with.
    pub const fn http_status(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::AuthFailure => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::ClockSkew => 409,
            ErrorKind::RateLimited => 429,
            ErrorKind::UnknownUpstreamError => 502,
            ErrorKind::UpstreamUnavailable => 503,
        }
    }

    /// Terminal kinds are surfaced unchanged; nothing retries them.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            ErrorKind::BadRequest
                | ErrorKind::AuthFailure
                | ErrorKind::NotFound
                | ErrorKind::UnknownUpstreamError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A failed call in normalized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct NormalizedError {
    pub kind: ErrorKind,
    pub http_status: u16,
    pub message: String,
    /// Upstream payload, kept for diagnostics when one was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl NormalizedError {
    /// Create an error whose HTTP status follows its kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            http_status: kind.http_status(),
            message: message.into(),
            raw: None,
        }
    }

    /// Attach the upstream payload.
    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailure, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }

    /// Missing required parameter for an operation.
    pub fn missing_param(operation: impl fmt::Display, param: &str) -> Self {
        Self::bad_request(format!("{} requires parameter `{}`", operation, param))
    }
}

/// Result of one gateway call.
pub type NormalizedResult = Result<Value, NormalizedError>;

/// Wire envelope for a [`NormalizedResult`]:
/// `{"ok": true, "data": ...}` or `{"ok": false, "kind": ..., ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultEnvelope {
    Success { ok: bool, data: Value },
    Failure {
        ok: bool,
        #[serde(flatten)]
        error: NormalizedError,
    },
}

impl ResultEnvelope {
    /// HTTP status for the envelope.
    pub fn http_status(&self) -> u16 {
        match self {
            ResultEnvelope::Success { .. } => 200,
            ResultEnvelope::Failure { error, .. } => error.http_status,
        }
    }
}

impl From<NormalizedResult> for ResultEnvelope {
    fn from(result: NormalizedResult) -> Self {
        match result {
            Ok(data) => ResultEnvelope::Success { ok: true, data },
            Err(error) => ResultEnvelope::Failure { ok: false, error },
        }
    }
}
