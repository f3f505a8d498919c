//! Raw exchange responses and their mapping into [`NormalizedResult`].
//!
//! Each exchange wraps payloads and errors differently: Binance and MEXC
//! return bare JSON with `{code, msg}` on failure, Bybit always answers 200
//! with `retCode`, Bitget uses a string `code` of `"00000"` for success.
//! A [`ResponseNormalizer`] hides that behind one contract: either the
//! extracted data, or a [`NormalizedError`] whose kind callers can branch on.
//! Anything no mapping recognises becomes `UnknownUpstreamError` with the raw
//! payload attached, never a silent success.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Value};

use exgw_core::types::{
    ErrorKind, NormalizedCommand, NormalizedError, NormalizedResult, OperationKind, Symbol,
    Timestamp,
};

/// An HTTP response as received, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Header names lower-cased.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Body parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// Body as JSON, or as a string value when it is not JSON.
    pub fn payload(&self) -> Value {
        self.json().unwrap_or_else(|| Value::String(self.body.clone()))
    }

    /// `Retry-After` in seconds, when the exchange sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

/// A request that produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection was never established; the request did not leave.
    #[error("connection failed: {0}")]
    Connect(String),
    /// No response within the per-attempt timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The connection broke after the request was sent.
    #[error("connection interrupted: {0}")]
    Interrupted(String),
    /// The caller gave up on the call.
    #[error("request cancelled")]
    Cancelled,
    /// The request could not be constructed for sending.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether the exchange may have received and acted on the request.
    pub fn may_have_reached_upstream(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_) | TransportError::Interrupted(_) | TransportError::Cancelled
        )
    }

    /// Normalized form. A write whose outcome is unknown is
    /// `UpstreamUnavailable` with a message saying so.
    pub fn normalize(&self, write: bool) -> NormalizedError {
        match self {
            TransportError::InvalidRequest(msg) => NormalizedError::bad_request(msg.clone()),
            other if write && other.may_have_reached_upstream() => NormalizedError::unavailable(
                format!("write outcome unknown, verify before retrying: {}", other),
            ),
            other => NormalizedError::unavailable(other.to_string()),
        }
    }
}

/// Maps raw exchange responses into normalized results.
pub trait ResponseNormalizer: Send + Sync {
    /// Whether the response is upstream throttling that a later attempt may
    /// clear.
    fn is_throttled(&self, raw: &RawResponse) -> bool {
        raw.status == 429
    }

    /// Unwrap the exchange envelope: the data on success, the mapped error
    /// otherwise.
    fn unwrap_payload(&self, raw: &RawResponse) -> NormalizedResult;

    /// Symbol names from a `GetSymbols` payload.
    fn symbol_names(&self, data: &Value) -> Option<Vec<String>>;

    /// Instrument entries from a `GetExchangeInfo` payload.
    fn instruments<'a>(&self, data: &'a Value) -> Option<&'a Vec<Value>>;

    /// Server time from a clock-probe response.
    fn server_time(&self, raw: &RawResponse) -> Option<Timestamp>;

    /// Full normalization: envelope, error mapping, then result shaping.
    fn normalize(&self, command: &NormalizedCommand, raw: &RawResponse) -> NormalizedResult {
        let data = self.unwrap_payload(raw)?;
        match command.operation {
            OperationKind::GetSymbols => {
                let names = self
                    .symbol_names(&data)
                    .ok_or_else(|| unexpected_shape("symbol list", &data))?;
                Ok(enumerate_symbols(names))
            }
            OperationKind::GetExchangeInfo => match command.text("symbol") {
                Some(symbol) => {
                    let entries = self
                        .instruments(&data)
                        .ok_or_else(|| unexpected_shape("instrument list", &data))?;
                    select_instrument(entries, &Symbol::new(symbol))
                }
                None => Ok(data),
            },
            _ => Ok(data),
        }
    }
}

/// `[{id, symbol}]` with 1-based ids in upstream order.
pub fn enumerate_symbols(names: Vec<String>) -> Value {
    Value::Array(
        names
            .into_iter()
            .enumerate()
            .map(|(i, symbol)| json!({ "id": i + 1, "symbol": symbol }))
            .collect(),
    )
}

/// The instrument whose `symbol` matches, compared case-insensitively.
pub fn select_instrument(entries: &[Value], symbol: &Symbol) -> NormalizedResult {
    entries
        .iter()
        .find(|entry| {
            entry
                .get("symbol")
                .and_then(Value::as_str)
                .is_some_and(|s| s.eq_ignore_ascii_case(symbol.as_str()))
        })
        .cloned()
        .ok_or_else(|| NormalizedError::not_found("Symbol not found"))
}

/// A 2xx response whose payload does not have the expected layout.
pub(crate) fn unexpected_shape(what: &str, data: &Value) -> NormalizedError {
    NormalizedError::new(
        ErrorKind::UnknownUpstreamError,
        format!("unexpected {} payload", what),
    )
    .with_raw(data.clone())
}

/// Classification from the HTTP status alone, for responses that carry no
/// recognisable exchange error code.
pub(crate) fn classify_status(raw: &RawResponse) -> NormalizedError {
    let payload = raw.payload();
    let kind = match raw.status {
        429 | 418 => ErrorKind::RateLimited,
        401 | 403 => ErrorKind::AuthFailure,
        404 => ErrorKind::NotFound,
        s if s >= 500 => ErrorKind::UpstreamUnavailable,
        _ => ErrorKind::UnknownUpstreamError,
    };
    NormalizedError::new(kind, format!("HTTP {}", raw.status)).with_raw(payload)
}

/// JSON body of a 2xx response, or `UnknownUpstreamError`.
pub(crate) fn success_json(raw: &RawResponse) -> NormalizedResult {
    raw.json().ok_or_else(|| {
        NormalizedError::new(
            ErrorKind::UnknownUpstreamError,
            "response body is not JSON",
        )
        .with_raw(Value::String(raw.body.clone()))
    })
}

/// Numeric error code that may be sent as a number or a string.
pub(crate) fn code_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Millisecond timestamp that may be sent as a number or a string.
pub(crate) fn millis_of(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n.as_u64().map(Timestamp::from_millis),
        Value::String(s) => s.trim().parse().ok().map(Timestamp::from_millis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_symbols() {
        let value = enumerate_symbols(vec!["BTCUSDT".into(), "ETHUSDT".into()]);
        assert_eq!(
            value,
            json!([{"id": 1, "symbol": "BTCUSDT"}, {"id": 2, "symbol": "ETHUSDT"}])
        );
    }

    #[test]
    fn test_select_instrument_case_insensitive() {
        let entries = vec![json!({"symbol": "BTCUSDT", "status": "TRADING"})];
        let hit = select_instrument(&entries, &Symbol::new("btcusdt")).unwrap();
        assert_eq!(hit["status"], "TRADING");

        let miss = select_instrument(&entries, &Symbol::new("DOGEUSDT")).unwrap_err();
        assert_eq!(miss.kind, ErrorKind::NotFound);
        assert_eq!(miss.message, "Symbol not found");
    }

    #[test]
    fn test_retry_after_header() {
        let raw = RawResponse::new(429, "").with_header("Retry-After", "2");
        assert_eq!(raw.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(RawResponse::new(429, "").retry_after(), None);
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(&RawResponse::new(503, "")).kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(classify_status(&RawResponse::new(429, "")).kind, ErrorKind::RateLimited);
        assert_eq!(classify_status(&RawResponse::new(401, "")).kind, ErrorKind::AuthFailure);
        assert_eq!(classify_status(&RawResponse::new(400, "{}")).kind, ErrorKind::UnknownUpstreamError);
    }

    #[test]
    fn test_non_json_body_is_kept_as_raw() {
        let raw = RawResponse::new(200, "<html>maintenance</html>");
        let err = success_json(&raw).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownUpstreamError);
        assert_eq!(err.raw, Some(Value::String("<html>maintenance</html>".into())));
    }

    #[test]
    fn test_ambiguous_write_is_unavailable() {
        let err = TransportError::Timeout(Duration::from_secs(1)).normalize(true);
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
        assert!(err.message.contains("outcome unknown"));

        let err = TransportError::Connect("refused".into()).normalize(true);
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
        assert!(!err.message.contains("outcome unknown"));
    }

    #[test]
    fn test_code_of_accepts_strings() {
        assert_eq!(code_of(&json!(-1121)), Some(-1121));
        assert_eq!(code_of(&json!("40008")), Some(40008));
        assert_eq!(code_of(&json!(null)), None);
    }
}
