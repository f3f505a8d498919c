//! Shared request assembly for the Binance-style `/api/v3` spot API, which
//! MEXC also speaks.
//!
//! Signed requests append `recvWindow` and `timestamp` to the query, sign the
//! resulting string, and append `signature` last. The API key travels in a
//! header whose name differs per exchange.

use serde_json::Value;

use exgw_core::types::{
    Credentials, ErrorKind, ExchangeId, NormalizedError, OperationKind, OrderType, Side, Timestamp,
};

use crate::normalizer::{classify_status, code_of, millis_of, success_json, RawResponse};
use crate::request::{
    require_credentials, Endpoint, HttpMethod, OrderRef, Params, RequestPurpose, SignedRequest,
};
use crate::signing::sign_query_string;

/// One resolved endpoint call, before signing.
pub(crate) struct Route {
    pub method: HttpMethod,
    pub path: &'static str,
    pub params: Params,
    pub weight: u32,
}

impl Route {
    pub fn new(method: HttpMethod, path: &'static str, weight: u32) -> Self {
        Self {
            method,
            path,
            params: Params::new(),
            weight,
        }
    }
}

/// Static per-exchange settings.
pub(crate) struct SpotV3 {
    pub exchange: ExchangeId,
    pub api_key_header: &'static str,
    /// Extra headers sent on every request.
    pub fixed_headers: &'static [(&'static str, &'static str)],
}

impl SpotV3 {
    pub fn assemble(
        &self,
        endpoint: &Endpoint,
        operation: OperationKind,
        mut route: Route,
        credentials: Option<&Credentials>,
        timestamp: Timestamp,
    ) -> Result<SignedRequest, NormalizedError> {
        let mut headers: Vec<(String, String)> = self
            .fixed_headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let (query, signed_at) = if operation.requires_auth() {
            let creds = require_credentials(self.exchange, operation, credentials)?;
            route
                .params
                .push("recvWindow", endpoint.recv_window_ms.to_string())
                .push("timestamp", timestamp.as_millis().to_string());
            let unsigned = route.params.to_query()?;
            let signature = sign_query_string(&creds.api_secret, &unsigned);
            headers.push((self.api_key_header.to_string(), creds.api_key.clone()));
            (format!("{}&signature={}", unsigned, signature), Some(timestamp))
        } else {
            (route.params.to_query()?, None)
        };

        Ok(SignedRequest {
            exchange: self.exchange,
            purpose: RequestPurpose::Command(operation),
            method: route.method,
            path: route.path.to_string(),
            url: endpoint.url(route.path, &query),
            headers,
            body: None,
            signed_at,
            timeout: endpoint.timeout,
            weight: route.weight,
        })
    }

    pub fn time_request(&self, endpoint: &Endpoint) -> SignedRequest {
        let path = "/api/v3/time";
        SignedRequest {
            exchange: self.exchange,
            purpose: RequestPurpose::ClockProbe,
            method: HttpMethod::Get,
            path: path.to_string(),
            url: endpoint.url(path, ""),
            headers: Vec::new(),
            body: None,
            signed_at: None,
            timeout: endpoint.timeout,
            weight: 1,
        }
    }
}

/// `{code, msg}` from an error body.
pub(crate) fn error_code(payload: &Value) -> Option<(i64, String)> {
    let code = payload.get("code").and_then(code_of)?;
    let msg = payload
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((code, msg))
}

/// Unwrap a spot-v3 response: bare JSON on 2xx, `{code, msg}` otherwise.
pub(crate) fn unwrap(
    exchange: ExchangeId,
    raw: &RawResponse,
    map_code: impl Fn(i64, &str, u16) -> ErrorKind,
) -> Result<Value, NormalizedError> {
    if raw.is_success() {
        return success_json(raw);
    }
    let payload = raw.payload();
    match error_code(&payload) {
        Some((code, msg)) => Err(NormalizedError::new(
            map_code(code, &msg, raw.status),
            format!("{} error {}: {}", exchange, code, msg),
        )
        .with_raw(payload)),
        None => Err(classify_status(raw)),
    }
}

/// `{"serverTime": ms}`.
pub(crate) fn server_time(raw: &RawResponse) -> Option<Timestamp> {
    raw.json()?.get("serverTime").and_then(millis_of)
}

/// `symbols[]` of an `exchangeInfo` payload.
pub(crate) fn symbols_array(data: &Value) -> Option<&Vec<Value>> {
    data.get("symbols").and_then(Value::as_array)
}

pub(crate) const fn side_code(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

pub(crate) const fn order_type_code(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Limit => "LIMIT",
        OrderType::Market => "MARKET",
        OrderType::PostOnly => "LIMIT_MAKER",
    }
}

/// `orderId` or `origClientOrderId`.
pub(crate) fn push_order_ref(params: &mut Params, order: OrderRef) {
    match order {
        OrderRef::OrderId(id) => params.push("orderId", id),
        OrderRef::ClientOrderId(id) => params.push("origClientOrderId", id),
    };
}
