//! Bitget spot (`/api/v2`).
//!
//! Authenticated requests carry `ACCESS-KEY`, `ACCESS-SIGN`,
//! `ACCESS-TIMESTAMP` and `ACCESS-PASSPHRASE`. The signature is a base64 HMAC
//! over `timestamp + METHOD + path[?query] + body`. Responses use a string
//! `code`, `"00000"` on success.

use serde::Deserialize;
use serde_json::Value;

use exgw_core::types::{
    Credentials, ErrorKind, ExchangeId, NormalizedCommand, NormalizedError, NormalizedResult,
    OperationKind, OrderType, Side, Timestamp,
};

use crate::normalizer::{classify_status, code_of, millis_of, success_json, RawResponse, ResponseNormalizer};
use crate::request::{
    require_credentials, unsupported, Endpoint, HttpMethod, OrderRef, ParamReader, Params,
    RequestBuilder, RequestPurpose, SignedRequest,
};
use crate::signing::sign_bitget_request;

const SUCCESS: &str = "00000";

/// Bitget v2 response envelope.
#[derive(Debug, Deserialize)]
pub struct BitgetEnvelope {
    pub code: Value,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(rename = "requestTime", default)]
    pub request_time: Option<u64>,
}

impl BitgetEnvelope {
    fn code_text(&self) -> String {
        match &self.code {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn is_success(&self) -> bool {
        self.code_text() == SUCCESS
    }
}

/// Bitget spot dialect.
#[derive(Debug, Clone)]
pub struct Bitget {
    endpoint: Endpoint,
}

struct Route {
    method: HttpMethod,
    path: &'static str,
    params: Params,
}

impl Route {
    fn get(path: &'static str) -> Self {
        Self {
            method: HttpMethod::Get,
            path,
            params: Params::new(),
        }
    }

    fn post(path: &'static str) -> Self {
        Self {
            method: HttpMethod::Post,
            path,
            params: Params::new(),
        }
    }
}

const fn side_code(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

fn push_order_ref(params: &mut Params, order: OrderRef) {
    match order {
        OrderRef::OrderId(id) => params.push("orderId", id),
        OrderRef::ClientOrderId(id) => params.push("clientOid", id),
    };
}

impl Bitget {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    fn route(&self, command: &NormalizedCommand) -> Result<Route, NormalizedError> {
        use OperationKind::*;

        let p = ParamReader::new(command);
        let route = match command.operation {
            GetSymbols => Route::get("/api/v2/spot/market/tickers"),
            GetExchangeInfo => Route::get("/api/v2/spot/public/symbols"),
            GetOrderBook => {
                let mut r = Route::get("/api/v2/spot/market/orderbook");
                r.params
                    .push("symbol", p.symbol()?.as_str())
                    .push("type", "step0")
                    .push("limit", p.optional("limit").unwrap_or_else(|| "10".into()));
                r
            }
            GetTicker => {
                let mut r = Route::get("/api/v2/spot/market/tickers");
                r.params.push("symbol", p.symbol()?.as_str());
                r
            }
            PlaceOrder => {
                let symbol = p.symbol()?;
                let side = p.side()?;
                let order_type = p.order_type()?;
                let quantity = p.required("quantity")?;
                let price = p.price_for(order_type)?;
                let client_order_id = p.required("clientOrderId")?;
                let (kind, force) = match order_type {
                    OrderType::Market => ("market", None),
                    OrderType::Limit => ("limit", Some("gtc".to_string())),
                    OrderType::PostOnly => ("limit", Some("post_only".to_string())),
                };

                let mut r = Route::post("/api/v2/spot/trade/place-order");
                r.params
                    .push("symbol", symbol.as_str())
                    .push("side", side_code(side))
                    .push("orderType", kind)
                    .push_opt("force", force)
                    .push_opt("price", price)
                    .push("size", quantity)
                    .push("clientOid", client_order_id);
                r
            }
            AmendOrder => {
                // cancel-replace needs both the new price and size.
                let symbol = p.symbol()?;
                let order = p.order_ref()?;
                let new_price = p.required("newPrice")?;
                let new_quantity = p.required("newQuantity")?;
                let mut r = Route::post("/api/v2/spot/trade/cancel-replace-order");
                r.params
                    .push("symbol", symbol.as_str())
                    .push("price", new_price)
                    .push("size", new_quantity);
                push_order_ref(&mut r.params, order);
                r.params.push_opt("newClientOid", p.optional("newClientOrderId"));
                r
            }
            CancelOrder => {
                let symbol = p.symbol()?;
                let order = p.order_ref()?;
                let mut r = Route::post("/api/v2/spot/trade/cancel-order");
                r.params.push("symbol", symbol.as_str());
                push_order_ref(&mut r.params, order);
                r
            }
            GetOrderStatus => {
                let mut r = Route::get("/api/v2/spot/trade/orderInfo");
                push_order_ref(&mut r.params, p.order_ref()?);
                r
            }
            GetOpenOrders => {
                let mut r = Route::get("/api/v2/spot/trade/unfilled-orders");
                r.params
                    .push_opt("symbol", p.optional_symbol().map(|s| s.as_str().to_string()));
                r
            }
            GetAccountBalance => {
                let mut r = Route::get("/api/v2/spot/account/assets");
                r.params.push_opt("coin", p.optional("coin"));
                r
            }
            GetTradeHistory => {
                let mut r = Route::get("/api/v2/spot/trade/fills");
                r.params
                    .push("symbol", p.symbol()?.as_str())
                    .push_opt("startTime", p.optional("startTime"))
                    .push_opt("endTime", p.optional("endTime"))
                    .push_opt("limit", p.optional("limit"));
                r
            }
        };
        Ok(route)
    }
}

/// Bitget error code to [`ErrorKind`].
pub(crate) fn error_kind(code: i64, status: u16) -> ErrorKind {
    match code {
        40008 => ErrorKind::ClockSkew,
        40006 | 40009 | 40011 | 40012 | 40014 | 40037 => ErrorKind::AuthFailure,
        429 | 40010 => ErrorKind::RateLimited,
        40034 | 40309 | 43001 | 43025 => ErrorKind::NotFound,
        40725 | 45001 => ErrorKind::UpstreamUnavailable,
        40000..=40999 | 43000..=43999 => ErrorKind::BadRequest,
        _ if status == 429 => ErrorKind::RateLimited,
        _ if status >= 500 => ErrorKind::UpstreamUnavailable,
        _ => ErrorKind::UnknownUpstreamError,
    }
}

fn parse_envelope(raw: &RawResponse) -> Option<BitgetEnvelope> {
    serde_json::from_str(&raw.body).ok()
}

impl RequestBuilder for Bitget {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bitget
    }

    fn supports(&self, _operation: OperationKind) -> bool {
        true
    }

    fn build(
        &self,
        command: &NormalizedCommand,
        credentials: Option<&Credentials>,
        timestamp: Timestamp,
    ) -> Result<SignedRequest, NormalizedError> {
        if !self.supports(command.operation) {
            return Err(unsupported(ExchangeId::Bitget, command.operation));
        }
        let route = self.route(command)?;

        let (query, body) = match route.method {
            HttpMethod::Post => (String::new(), Some(route.params.to_json())),
            _ => (route.params.to_query()?, None),
        };

        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("locale".to_string(), "en-US".to_string()),
        ];

        let signed_at = if command.operation.requires_auth() {
            let creds = require_credentials(ExchangeId::Bitget, command.operation, credentials)?;
            let passphrase = creds
                .passphrase
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    NormalizedError::auth_failure("Bitget requires an API passphrase")
                })?;
            let signature = sign_bitget_request(
                &creds.api_secret,
                timestamp.as_millis(),
                route.method.as_str(),
                route.path,
                &query,
                body.as_deref().unwrap_or_default(),
            );
            headers.extend([
                ("ACCESS-KEY".to_string(), creds.api_key.clone()),
                ("ACCESS-SIGN".to_string(), signature),
                ("ACCESS-TIMESTAMP".to_string(), timestamp.as_millis().to_string()),
                ("ACCESS-PASSPHRASE".to_string(), passphrase.to_string()),
            ]);
            Some(timestamp)
        } else {
            None
        };

        Ok(SignedRequest {
            exchange: ExchangeId::Bitget,
            purpose: RequestPurpose::Command(command.operation),
            method: route.method,
            path: route.path.to_string(),
            url: self.endpoint.url(route.path, &query),
            headers,
            body,
            signed_at,
            timeout: self.endpoint.timeout,
            weight: 1,
        })
    }

    fn server_time_request(&self) -> SignedRequest {
        let path = "/api/v2/public/time";
        SignedRequest {
            exchange: ExchangeId::Bitget,
            purpose: RequestPurpose::ClockProbe,
            method: HttpMethod::Get,
            path: path.to_string(),
            url: self.endpoint.url(path, ""),
            headers: Vec::new(),
            body: None,
            signed_at: None,
            timeout: self.endpoint.timeout,
            weight: 1,
        }
    }
}

impl ResponseNormalizer for Bitget {
    fn is_throttled(&self, raw: &RawResponse) -> bool {
        if raw.status == 429 {
            return true;
        }
        parse_envelope(raw).is_some_and(|env| env.code_text() == "429")
    }

    fn unwrap_payload(&self, raw: &RawResponse) -> NormalizedResult {
        let Some(envelope) = parse_envelope(raw) else {
            return if raw.is_success() {
                success_json(raw)
            } else {
                Err(classify_status(raw))
            };
        };

        if envelope.is_success() && raw.is_success() {
            return Ok(envelope.data.unwrap_or(Value::Null));
        }
        let kind = match code_of(&envelope.code) {
            Some(code) if !envelope.is_success() => error_kind(code, raw.status),
            _ => return Err(classify_status(raw)),
        };
        Err(NormalizedError::new(
            kind,
            format!("Bitget error {}: {}", envelope.code_text(), envelope.msg),
        )
        .with_raw(raw.payload()))
    }

    fn symbol_names(&self, data: &Value) -> Option<Vec<String>> {
        self.instruments(data)?
            .iter()
            .map(|t| t.get("symbol").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    fn instruments<'a>(&self, data: &'a Value) -> Option<&'a Vec<Value>> {
        data.as_array()
    }

    fn server_time(&self, raw: &RawResponse) -> Option<Timestamp> {
        let envelope = parse_envelope(raw)?;
        envelope
            .data
            .as_ref()
            .and_then(|d| d.get("serverTime"))
            .and_then(millis_of)
            .or_else(|| envelope.request_time.map(Timestamp::from_millis))
    }
}
