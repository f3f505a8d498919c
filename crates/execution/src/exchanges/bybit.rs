//! Bybit unified trading API (`/v5`).
//!
//! All authenticated requests include `X-BAPI-*` headers. The signature
//! covers `timestamp + api_key + recv_window + payload`, where the payload is
//! the query string for GET and the exact JSON body for POST. Every response,
//! including most errors, is HTTP 200 with a `retCode` envelope.

use serde::Deserialize;
use serde_json::Value;

use exgw_core::types::{
    Credentials, ErrorKind, ExchangeId, NormalizedCommand, NormalizedError, NormalizedResult,
    OperationKind, OrderType, Side, Timestamp,
};

use crate::normalizer::{classify_status, success_json, RawResponse, ResponseNormalizer};
use crate::request::{
    require_credentials, unsupported, Endpoint, HttpMethod, OrderRef, ParamReader, Params,
    RequestBuilder, RequestPurpose, SignedRequest,
};
use crate::signing::sign_bybit_request;

/// Bybit v5 response envelope.
#[derive(Debug, Deserialize)]
pub struct BybitEnvelope {
    /// Return code (0 = success).
    #[serde(rename = "retCode")]
    pub ret_code: i64,
    #[serde(rename = "retMsg", default)]
    pub ret_msg: String,
    /// Payload, present on success.
    #[serde(default)]
    pub result: Option<Value>,
    /// Server time in milliseconds.
    #[serde(default)]
    pub time: Option<u64>,
}

/// Bybit v5 dialect.
#[derive(Debug, Clone)]
pub struct Bybit {
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
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    }
}

fn push_order_ref(params: &mut Params, order: OrderRef) {
    match order {
        OrderRef::OrderId(id) => params.push("orderId", id),
        OrderRef::ClientOrderId(id) => params.push("orderLinkId", id),
    };
}

impl Bybit {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    fn route(&self, command: &NormalizedCommand) -> Result<Route, NormalizedError> {
        use OperationKind::*;

        let p = ParamReader::new(command);
        let category = p.optional("category").unwrap_or_else(|| "spot".into());
        let route = match command.operation {
            GetSymbols => {
                let mut r = Route::get("/v5/market/tickers");
                r.params.push("category", category);
                r
            }
            GetExchangeInfo => {
                let mut r = Route::get("/v5/market/instruments-info");
                r.params.push("category", category);
                r
            }
            GetOrderBook => {
                let mut r = Route::get("/v5/market/orderbook");
                r.params
                    .push("category", category)
                    .push("symbol", p.symbol()?.as_str())
                    .push("limit", p.optional("limit").unwrap_or_else(|| "10".into()));
                r
            }
            GetTicker => {
                let mut r = Route::get("/v5/market/tickers");
                r.params
                    .push("category", category)
                    .push("symbol", p.symbol()?.as_str());
                r
            }
            PlaceOrder => {
                let symbol = p.symbol()?;
                let side = p.side()?;
                let order_type = p.order_type()?;
                let quantity = p.required("quantity")?;
                let price = p.price_for(order_type)?;
                let client_order_id = p.required("clientOrderId")?;
                let time_in_force = match order_type {
                    OrderType::Market => None,
                    OrderType::PostOnly => Some("PostOnly".to_string()),
                    OrderType::Limit => {
                        Some(p.optional("timeInForce").unwrap_or_else(|| "GTC".into()))
                    }
                };
                let bybit_type = if order_type == OrderType::Market {
                    "Market"
                } else {
                    "Limit"
                };

                let mut r = Route::post("/v5/order/create");
                r.params
                    .push("category", category)
                    .push("symbol", symbol.as_str())
                    .push("side", side_code(side))
                    .push("orderType", bybit_type)
                    .push("qty", quantity)
                    .push_opt("price", price)
                    .push_opt("timeInForce", time_in_force)
                    .push("orderLinkId", client_order_id);
                r
            }
            AmendOrder => {
                let symbol = p.symbol()?;
                let order = p.order_ref()?;
                let (new_price, new_quantity) = p.amendment()?;
                let mut r = Route::post("/v5/order/amend");
                r.params
                    .push("category", category)
                    .push("symbol", symbol.as_str());
                push_order_ref(&mut r.params, order);
                r.params
                    .push_opt("qty", new_quantity)
                    .push_opt("price", new_price);
                r
            }
            CancelOrder => {
                let symbol = p.symbol()?;
                let order = p.order_ref()?;
                let mut r = Route::post("/v5/order/cancel");
                r.params
                    .push("category", category)
                    .push("symbol", symbol.as_str());
                push_order_ref(&mut r.params, order);
                r
            }
            GetOrderStatus => {
                let order = p.order_ref()?;
                let mut r = Route::get("/v5/order/realtime");
                r.params
                    .push("category", category)
                    .push_opt("symbol", p.optional_symbol().map(|s| s.as_str().to_string()));
                push_order_ref(&mut r.params, order);
                r
            }
            GetOpenOrders => {
                let mut r = Route::get("/v5/order/realtime");
                r.params
                    .push("category", category)
                    .push_opt("symbol", p.optional_symbol().map(|s| s.as_str().to_string()))
                    .push("openOnly", "0");
                r
            }
            GetAccountBalance => {
                let mut r = Route::get("/v5/account/wallet-balance");
                r.params.push(
                    "accountType",
                    p.optional("accountType").unwrap_or_else(|| "UNIFIED".into()),
                );
                r
            }
            GetTradeHistory => {
                let mut r = Route::get("/v5/execution/list");
                r.params
                    .push("category", category)
                    .push_opt("symbol", p.optional_symbol().map(|s| s.as_str().to_string()))
                    .push_opt("startTime", p.optional("startTime"))
                    .push_opt("endTime", p.optional("endTime"))
                    .push_opt("limit", p.optional("limit"));
                r
            }
        };
        Ok(route)
    }
}

/// Bybit `retCode` to [`ErrorKind`].
pub(crate) fn error_kind(code: i64, msg: &str) -> ErrorKind {
    match code {
        10002 => ErrorKind::ClockSkew,
        10003 | 10004 | 10005 | 10007 | 10009 | 10010 | 33004 => ErrorKind::AuthFailure,
        10006 | 10018 | 170005 => ErrorKind::RateLimited,
        110001 | 170213 | 170121 => ErrorKind::NotFound,
        10001 if is_unknown_symbol(msg) => ErrorKind::NotFound,
        10016 | 10019 | 170007 => ErrorKind::UpstreamUnavailable,
        10001 | 110003 | 110007 | 110072 | 170131 | 170141 => ErrorKind::BadRequest,
        _ => ErrorKind::UnknownUpstreamError,
    }
}

fn is_unknown_symbol(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("symbol") && (msg.contains("invalid") || msg.contains("not exist"))
}

fn parse_envelope(raw: &RawResponse) -> Option<BybitEnvelope> {
    serde_json::from_str(&raw.body).ok()
}

impl RequestBuilder for Bybit {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bybit
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
            return Err(unsupported(ExchangeId::Bybit, command.operation));
        }
        let route = self.route(command)?;

        let (query, body) = match route.method {
            HttpMethod::Post => (String::new(), Some(route.params.to_json())),
            _ => (route.params.to_query()?, None),
        };

        let mut headers = Vec::new();
        if body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        let signed_at = if command.operation.requires_auth() {
            let creds = require_credentials(ExchangeId::Bybit, command.operation, credentials)?;
            let payload = body.as_deref().unwrap_or(&query);
            let signature = sign_bybit_request(
                &creds.api_secret,
                timestamp.as_millis(),
                &creds.api_key,
                self.endpoint.recv_window_ms,
                payload,
            );
            headers.extend([
                ("X-BAPI-API-KEY".to_string(), creds.api_key.clone()),
                ("X-BAPI-TIMESTAMP".to_string(), timestamp.as_millis().to_string()),
                ("X-BAPI-RECV-WINDOW".to_string(), self.endpoint.recv_window_ms.to_string()),
                ("X-BAPI-SIGN".to_string(), signature),
            ]);
            Some(timestamp)
        } else {
            None
        };

        Ok(SignedRequest {
            exchange: ExchangeId::Bybit,
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
        let path = "/v5/market/time";
        SignedRequest {
            exchange: ExchangeId::Bybit,
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

impl ResponseNormalizer for Bybit {
    fn is_throttled(&self, raw: &RawResponse) -> bool {
        if raw.status == 429 {
            return true;
        }
        match parse_envelope(raw) {
            Some(env) => matches!(env.ret_code, 10006 | 10018 | 170005),
            // Bybit's IP rate-limit page.
            None => raw.status == 403,
        }
    }

    fn unwrap_payload(&self, raw: &RawResponse) -> NormalizedResult {
        let Some(envelope) = parse_envelope(raw) else {
            // 403 without an envelope is Bybit's IP rate-limit page.
            if raw.status == 403 {
                return Err(NormalizedError::new(
                    ErrorKind::RateLimited,
                    "Bybit access too frequent",
                )
                .with_raw(raw.payload()));
            }
            return if raw.is_success() {
                success_json(raw)
            } else {
                Err(classify_status(raw))
            };
        };

        if envelope.ret_code == 0 && raw.is_success() {
            return Ok(envelope.result.unwrap_or(Value::Null));
        }
        if envelope.ret_code == 0 {
            return Err(classify_status(raw));
        }
        Err(NormalizedError::new(
            error_kind(envelope.ret_code, &envelope.ret_msg),
            format!("Bybit error {}: {}", envelope.ret_code, envelope.ret_msg),
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
        data.get("list").and_then(Value::as_array)
    }

    fn server_time(&self, raw: &RawResponse) -> Option<Timestamp> {
        let envelope = parse_envelope(raw)?;
        if let Some(ms) = envelope.time {
            return Some(Timestamp::from_millis(ms));
        }
        let seconds: u64 = envelope
            .result?
            .get("timeSecond")?
            .as_str()?
            .parse()
            .ok()?;
        seconds.checked_mul(1000).map(Timestamp::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::{bybit_prehash, sign_hex};
    use serde_json::json;

    const TS: Timestamp = Timestamp::from_millis(1_672_502_400_000);

    fn bybit() -> Bybit {
        Bybit::new(Endpoint::new("https://api-testnet.bybit.com").with_recv_window(20000))
    }

    fn creds() -> Credentials {
        Credentials::new("bybit-key", "bybit-secret")
    }

    #[test]
    fn test_tickers_default_to_spot() {
        let cmd = NormalizedCommand::new(ExchangeId::Bybit, OperationKind::GetTicker)
            .with_param("symbol", "btcusdt");
        let req = bybit().build(&cmd, None, TS).unwrap();
        assert_eq!(
            req.url,
            "https://api-testnet.bybit.com/v5/market/tickers?category=spot&symbol=BTCUSDT"
        );
        assert!(req.header("X-BAPI-SIGN").is_none());
    }

    #[test]
    fn test_place_order_signs_json_body() {
        let cmd = NormalizedCommand::new(ExchangeId::Bybit, OperationKind::PlaceOrder)
            .with_param("symbol", "BTCUSDT")
            .with_param("side", "buy")
            .with_param("orderType", "limit")
            .with_param("quantity", "0.01")
            .with_param("price", "30000")
            .with_param("clientOrderId", "link-1");
        let req = bybit().build(&cmd, Some(&creds()), TS).unwrap();

        let body = req.body.clone().unwrap();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            parsed,
            json!({
                "category": "spot",
                "symbol": "BTCUSDT",
                "side": "Buy",
                "orderType": "Limit",
                "qty": "0.01",
                "price": "30000",
                "timeInForce": "GTC",
                "orderLinkId": "link-1"
            })
        );
        assert_eq!(req.url, "https://api-testnet.bybit.com/v5/order/create");
        assert_eq!(req.header("X-BAPI-TIMESTAMP"), Some("1672502400000"));
        assert_eq!(req.header("X-BAPI-RECV-WINDOW"), Some("20000"));
        assert_eq!(
            req.header("X-BAPI-SIGN").unwrap(),
            sign_hex("bybit-secret", &bybit_prehash(TS.as_millis(), "bybit-key", 20000, &body))
        );
    }

    #[test]
    fn test_signed_get_covers_query() {
        let cmd = NormalizedCommand::new(ExchangeId::Bybit, OperationKind::GetAccountBalance);
        let req = bybit().build(&cmd, Some(&creds()), TS).unwrap();
        assert!(req.url.ends_with("/v5/account/wallet-balance?accountType=UNIFIED"));
        assert_eq!(
            req.header("X-BAPI-SIGN").unwrap(),
            sign_bybit_request("bybit-secret", TS.as_millis(), "bybit-key", 20000, "accountType=UNIFIED")
        );
    }

    #[test]
    fn test_post_only_uses_time_in_force() {
        let cmd = NormalizedCommand::new(ExchangeId::Bybit, OperationKind::PlaceOrder)
            .with_param("symbol", "BTCUSDT")
            .with_param("side", "sell")
            .with_param("orderType", "PostOnly")
            .with_param("quantity", "1")
            .with_param("price", "1")
            .with_param("clientOrderId", "c");
        let req = bybit().build(&cmd, Some(&creds()), TS).unwrap();
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["orderType"], "Limit");
        assert_eq!(body["timeInForce"], "PostOnly");
    }

    #[test]
    fn test_amend_by_link_id() {
        let cmd = NormalizedCommand::new(ExchangeId::Bybit, OperationKind::AmendOrder)
            .with_param("symbol", "BTCUSDT")
            .with_param("clientOrderId", "link-1")
            .with_param("newPrice", "31000");
        let req = bybit().build(&cmd, Some(&creds()), TS).unwrap();
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["orderLinkId"], "link-1");
        assert_eq!(body["price"], "31000");
        assert!(body.get("qty").is_none());
    }

    #[test]
    fn test_success_unwraps_result() {
        let raw = RawResponse::new(
            200,
            json!({"retCode": 0, "retMsg": "OK", "result": {"orderId": "1"}, "time": 1}).to_string(),
        );
        assert_eq!(bybit().unwrap_payload(&raw).unwrap(), json!({"orderId": "1"}));
    }

    #[test]
    fn test_ret_code_mapping() {
        let cases = [
            (10002, "invalid request, please check your server timestamp or recv_window param", ErrorKind::ClockSkew),
            (10003, "API key is invalid.", ErrorKind::AuthFailure),
            (10004, "error sign!", ErrorKind::AuthFailure),
            (10006, "Too many visits!", ErrorKind::RateLimited),
            (10001, "params error: Symbol Is Invalid", ErrorKind::NotFound),
            (10001, "params error: qty must be positive", ErrorKind::BadRequest),
            (110001, "order not exists or too late to cancel", ErrorKind::NotFound),
            (170213, "Order does not exist.", ErrorKind::NotFound),
            (110072, "OrderLinkedID is duplicate", ErrorKind::BadRequest),
            (10016, "Server error", ErrorKind::UpstreamUnavailable),
            (99999, "mystery", ErrorKind::UnknownUpstreamError),
        ];
        for (code, msg, kind) in cases {
            let raw = RawResponse::new(
                200,
                json!({"retCode": code, "retMsg": msg, "result": {}}).to_string(),
            );
            let err = bybit().unwrap_payload(&raw).unwrap_err();
            assert_eq!(err.kind, kind, "{} {}", code, msg);
            assert!(err.raw.is_some());
        }
    }

    #[test]
    fn test_throttle_detection() {
        let raw = RawResponse::new(200, r#"{"retCode":10006,"retMsg":"Too many visits!"}"#);
        assert!(bybit().is_throttled(&raw));
        let raw = RawResponse::new(200, r#"{"retCode":0,"retMsg":"OK","result":{}}"#);
        assert!(!bybit().is_throttled(&raw));
    }

    #[test]
    fn test_forbidden_page_is_rate_limited() {
        let raw = RawResponse::new(403, "access too frequent");
        assert_eq!(bybit().unwrap_payload(&raw).unwrap_err().kind, ErrorKind::RateLimited);
        assert!(bybit().is_throttled(&raw));
    }

    #[test]
    fn test_forbidden_with_envelope_is_not_throttling() {
        let raw = RawResponse::new(
            403,
            json!({"retCode": 10005, "retMsg": "Permission denied", "result": {}}).to_string(),
        );
        assert!(!bybit().is_throttled(&raw));
        assert_eq!(bybit().unwrap_payload(&raw).unwrap_err().kind, ErrorKind::AuthFailure);
    }

    #[test]
    fn test_symbols_from_tickers() {
        let raw = RawResponse::new(
            200,
            json!({"retCode": 0, "result": {"category": "spot", "list": [{"symbol": "BTCUSDT"}, {"symbol": "ETHUSDT"}]}}).to_string(),
        );
        let cmd = NormalizedCommand::new(ExchangeId::Bybit, OperationKind::GetSymbols);
        assert_eq!(
            bybit().normalize(&cmd, &raw).unwrap(),
            json!([{"id": 1, "symbol": "BTCUSDT"}, {"id": 2, "symbol": "ETHUSDT"}])
        );
    }

    #[test]
    fn test_server_time_prefers_millis() {
        let raw = RawResponse::new(
            200,
            json!({"retCode": 0, "result": {"timeSecond": "1688639403", "timeNano": "1688639403423213947"}, "time": 1688639403423u64}).to_string(),
        );
        assert_eq!(bybit().server_time(&raw), Some(Timestamp::from_millis(1_688_639_403_423)));

        let raw = RawResponse::new(200, json!({"retCode": 0, "result": {"timeSecond": "1688639403"}}).to_string());
        assert_eq!(bybit().server_time(&raw), Some(Timestamp::from_millis(1_688_639_403_000)));
    }

    #[test]
    fn test_server_time_rejects_overflowing_seconds() {
        let raw = RawResponse::new(
            200,
            json!({"retCode": 0, "result": {"timeSecond": u64::MAX.to_string()}}).to_string(),
        );
        assert_eq!(bybit().server_time(&raw), None);
    }
}
