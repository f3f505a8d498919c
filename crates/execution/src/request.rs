//! Signed requests and the builder contract each exchange dialect fulfils.
//!
//! A [`RequestBuilder`] turns a [`NormalizedCommand`] into a fully-formed
//! [`SignedRequest`] without touching the network. Every validation failure
//! (missing parameter, unsupported operation, missing credentials) surfaces
//! here as a `BadRequest` or `AuthFailure`, before any socket is opened.

use std::fmt;
use std::time::Duration;

use exgw_core::config::ExchangeConfig;
use exgw_core::types::{
    Credentials, ExchangeId, NormalizedCommand, NormalizedError, OperationKind, OrderType, Side,
    Symbol, Timestamp,
};

/// HTTP verb of an exchange endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPurpose {
    /// A caller's command.
    Command(OperationKind),
    /// A server-time probe used to measure clock offset.
    ClockProbe,
}

impl RequestPurpose {
    /// Whether sending twice could change exchange state twice.
    pub const fn is_write(&self) -> bool {
        match self {
            RequestPurpose::Command(op) => op.is_write(),
            RequestPurpose::ClockProbe => false,
        }
    }
}

impl fmt::Display for RequestPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestPurpose::Command(op) => write!(f, "{}", op),
            RequestPurpose::ClockProbe => f.write_str("ServerTime"),
        }
    }
}

/// Where and how to reach one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// REST base URL without trailing slash.
    pub base_url: String,
    /// Receive window sent with signed requests.
    pub recv_window_ms: u64,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            recv_window_ms: 5000,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self {
            recv_window_ms: config.recv_window_ms,
            timeout: Duration::from_millis(config.timeout_ms),
            ..Self::new(config.rest_url.clone())
        }
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Absolute URL for `path` plus an optional encoded query.
    pub fn url(&self, path: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        }
    }
}

/// A request ready to send. Immutable once built.
#[derive(Clone, PartialEq)]
pub struct SignedRequest {
    pub exchange: ExchangeId,
    pub purpose: RequestPurpose,
    pub method: HttpMethod,
    /// Path without query, kept separately for logging.
    pub path: String,
    /// Absolute URL including the (signed) query string.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Timestamp the signature was computed with; `None` for public requests.
    pub signed_at: Option<Timestamp>,
    pub timeout: Duration,
    /// Cost against the exchange's client-side request budget.
    pub weight: u32,
}

impl SignedRequest {
    pub fn is_write(&self) -> bool {
        self.purpose.is_write()
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// The URL and headers carry signatures and API keys.
impl fmt::Debug for SignedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("SignedRequest")
            .field("exchange", &self.exchange)
            .field("purpose", &self.purpose)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &header_names)
            .field("signed_at", &self.signed_at)
            .field("weight", &self.weight)
            .finish()
    }
}

/// Builds exchange-specific requests from normalized commands.
pub trait RequestBuilder: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    /// Whether the exchange exposes `operation` at all.
    fn supports(&self, operation: OperationKind) -> bool;

    /// Build and, when `credentials` are given, sign the request.
    ///
    /// Pure: the same command, credentials and timestamp always produce the
    /// same request.
    fn build(
        &self,
        command: &NormalizedCommand,
        credentials: Option<&Credentials>,
        timestamp: Timestamp,
    ) -> Result<SignedRequest, NormalizedError>;

    /// Unsigned request for the exchange's server time.
    fn server_time_request(&self) -> SignedRequest;
}

/// Error for an operation the exchange does not offer.
pub(crate) fn unsupported(exchange: ExchangeId, operation: OperationKind) -> NormalizedError {
    NormalizedError::bad_request(format!("{} does not support {}", exchange, operation))
}

/// Credentials for a signed operation, or `AuthFailure`.
pub(crate) fn require_credentials<'a>(
    exchange: ExchangeId,
    operation: OperationKind,
    credentials: Option<&'a Credentials>,
) -> Result<&'a Credentials, NormalizedError> {
    credentials.filter(|c| c.is_complete()).ok_or_else(|| {
        NormalizedError::auth_failure(format!(
            "{} {} requires API credentials",
            exchange, operation
        ))
    })
}

/// How a caller identifies an existing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OrderRef {
    /// Exchange-assigned id.
    OrderId(String),
    /// Caller-assigned id.
    ClientOrderId(String),
}

/// Typed access to a command's parameters.
///
/// Missing or malformed values become `BadRequest` errors naming the
/// operation and parameter.
pub(crate) struct ParamReader<'a> {
    command: &'a NormalizedCommand,
}

impl<'a> ParamReader<'a> {
    pub(crate) fn new(command: &'a NormalizedCommand) -> Self {
        Self { command }
    }

    fn op(&self) -> OperationKind {
        self.command.operation
    }

    pub(crate) fn optional(&self, key: &str) -> Option<String> {
        self.command.text(key)
    }

    pub(crate) fn required(&self, key: &str) -> Result<String, NormalizedError> {
        self.optional(key)
            .ok_or_else(|| NormalizedError::missing_param(self.op(), key))
    }

    pub(crate) fn symbol(&self) -> Result<Symbol, NormalizedError> {
        self.required("symbol").map(Symbol::new)
    }

    pub(crate) fn optional_symbol(&self) -> Option<Symbol> {
        self.optional("symbol").map(Symbol::new)
    }

    pub(crate) fn side(&self) -> Result<Side, NormalizedError> {
        self.required("side")?
            .parse()
            .map_err(|e: exgw_core::types::ParseVocabularyError| {
                NormalizedError::bad_request(e.to_string())
            })
    }

    /// `type`, with `orderType` accepted as an alias.
    pub(crate) fn order_type(&self) -> Result<OrderType, NormalizedError> {
        self.optional("type")
            .or_else(|| self.optional("orderType"))
            .ok_or_else(|| NormalizedError::missing_param(self.op(), "type"))?
            .parse()
            .map_err(|e: exgw_core::types::ParseVocabularyError| {
                NormalizedError::bad_request(e.to_string())
            })
    }

    /// Limit price, required unless the order type is market.
    pub(crate) fn price_for(&self, order_type: OrderType) -> Result<Option<String>, NormalizedError> {
        if order_type.requires_price() {
            self.required("price").map(Some)
        } else {
            Ok(None)
        }
    }

    /// `orderId` takes precedence over `clientOrderId`.
    pub(crate) fn order_ref(&self) -> Result<OrderRef, NormalizedError> {
        if let Some(id) = self.optional("orderId") {
            return Ok(OrderRef::OrderId(id));
        }
        if let Some(id) = self.optional("clientOrderId") {
            return Ok(OrderRef::ClientOrderId(id));
        }
        Err(NormalizedError::bad_request(format!(
            "{} requires parameter `orderId` or `clientOrderId`",
            self.op()
        )))
    }

    /// Amend needs at least one of `newPrice` and `newQuantity`.
    pub(crate) fn amendment(&self) -> Result<(Option<String>, Option<String>), NormalizedError> {
        let price = self.optional("newPrice");
        let quantity = self.optional("newQuantity");
        if price.is_none() && quantity.is_none() {
            return Err(NormalizedError::bad_request(format!(
                "{} requires parameter `newPrice` or `newQuantity`",
                self.op()
            )));
        }
        Ok((price, quantity))
    }
}

/// Ordered key/value pairs that become a query string or a JSON body.
#[derive(Debug, Default, Clone)]
pub(crate) struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.pairs.push((key.to_string(), value.into()));
        self
    }

    pub(crate) fn push_opt(&mut self, key: &str, value: Option<String>) -> &mut Self {
        if let Some(v) = value {
            self.push(key, v);
        }
        self
    }

    /// URL-encoded in insertion order.
    pub(crate) fn to_query(&self) -> Result<String, NormalizedError> {
        serde_urlencoded::to_string(&self.pairs).map_err(|e| {
            NormalizedError::bad_request(format!("parameters cannot be URL-encoded: {}", e))
        })
    }

    /// JSON object with string values.
    pub(crate) fn to_json(&self) -> String {
        let map: serde_json::Map<String, serde_json::Value> = self
            .pairs
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map).to_string()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
