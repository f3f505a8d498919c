//! MEXC spot (`/api/v3`).
//!
//! Binance-compatible signing with the key in `X-MEXC-APIKEY`. The symbol
//! list comes from `defaultSymbols`, the tradable-via-API set, rather than
//! from `exchangeInfo`. MEXC offers no order amendment.

use serde_json::Value;

use exgw_core::types::{
    Credentials, ErrorKind, ExchangeId, NormalizedCommand, NormalizedError, NormalizedResult,
    OperationKind, Timestamp,
};

use super::spot_v3::{self, push_order_ref, Route, SpotV3};
use crate::normalizer::{RawResponse, ResponseNormalizer};
use crate::request::{
    unsupported, Endpoint, HttpMethod, ParamReader, RequestBuilder, SignedRequest,
};

const SPOT: SpotV3 = SpotV3 {
    exchange: ExchangeId::Mexc,
    api_key_header: "X-MEXC-APIKEY",
    fixed_headers: &[("Content-Type", "application/json")],
};

/// MEXC spot dialect.
#[derive(Debug, Clone)]
pub struct Mexc {
    endpoint: Endpoint,
}

impl Mexc {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    fn route(&self, command: &NormalizedCommand) -> Result<Route, NormalizedError> {
        use HttpMethod::*;
        use OperationKind::*;

        let p = ParamReader::new(command);
        let route = match command.operation {
            GetSymbols => Route::new(Get, "/api/v3/defaultSymbols", 1),
            GetExchangeInfo => Route::new(Get, "/api/v3/exchangeInfo", 10),
            GetOrderBook => {
                let mut r = Route::new(Get, "/api/v3/depth", 1);
                r.params
                    .push("symbol", p.symbol()?.as_str())
                    .push("limit", p.optional("limit").unwrap_or_else(|| "10".into()));
                r
            }
            GetTicker => {
                let mut r = Route::new(Get, "/api/v3/ticker/24hr", 1);
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

                let mut r = Route::new(Post, "/api/v3/order", 1);
                r.params
                    .push("symbol", symbol.as_str())
                    .push("side", spot_v3::side_code(side))
                    .push("type", spot_v3::order_type_code(order_type))
                    .push("quantity", quantity)
                    .push_opt("price", price)
                    .push("newClientOrderId", client_order_id);
                r
            }
            AmendOrder => return Err(unsupported(ExchangeId::Mexc, AmendOrder)),
            CancelOrder => {
                let mut r = Route::new(Delete, "/api/v3/order", 1);
                r.params.push("symbol", p.symbol()?.as_str());
                push_order_ref(&mut r.params, p.order_ref()?);
                r
            }
            GetOrderStatus => {
                let mut r = Route::new(Get, "/api/v3/order", 2);
                r.params.push("symbol", p.symbol()?.as_str());
                push_order_ref(&mut r.params, p.order_ref()?);
                r
            }
            GetOpenOrders => {
                let mut r = Route::new(Get, "/api/v3/openOrders", 3);
                r.params.push("symbol", p.symbol()?.as_str());
                r
            }
            GetAccountBalance => Route::new(Get, "/api/v3/account", 10),
            GetTradeHistory => {
                let mut r = Route::new(Get, "/api/v3/myTrades", 10);
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

/// MEXC error code to [`ErrorKind`].
pub(crate) fn error_kind(code: i64, _msg: &str, status: u16) -> ErrorKind {
    match code {
        700003 | 10073 => ErrorKind::ClockSkew,
        602 | 10072 | 700001 | 700002 | 700006 | 700007 => ErrorKind::AuthFailure,
        429 | 510 => ErrorKind::RateLimited,
        -2011 | -2013 | 10007 | 30014 | 730001 => ErrorKind::NotFound,
        700004 | 700005 | 33333 | 30002 | 30004 | 30005 | 30016 | 10101 => ErrorKind::BadRequest,
        _ if status == 429 => ErrorKind::RateLimited,
        _ if status >= 500 => ErrorKind::UpstreamUnavailable,
        _ => ErrorKind::UnknownUpstreamError,
    }
}

impl RequestBuilder for Mexc {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Mexc
    }

    fn supports(&self, operation: OperationKind) -> bool {
        operation != OperationKind::AmendOrder
    }

    fn build(
        &self,
        command: &NormalizedCommand,
        credentials: Option<&Credentials>,
        timestamp: Timestamp,
    ) -> Result<SignedRequest, NormalizedError> {
        if !self.supports(command.operation) {
            return Err(unsupported(ExchangeId::Mexc, command.operation));
        }
        let route = self.route(command)?;
        SPOT.assemble(&self.endpoint, command.operation, route, credentials, timestamp)
    }

    fn server_time_request(&self) -> SignedRequest {
        SPOT.time_request(&self.endpoint)
    }
}

impl ResponseNormalizer for Mexc {
    fn is_throttled(&self, raw: &RawResponse) -> bool {
        if raw.status == 429 {
            return true;
        }
        raw.json()
            .as_ref()
            .and_then(spot_v3::error_code)
            .is_some_and(|(code, _)| code == 429 || code == 510)
    }

    fn unwrap_payload(&self, raw: &RawResponse) -> NormalizedResult {
        spot_v3::unwrap(ExchangeId::Mexc, raw, error_kind)
    }

    fn symbol_names(&self, data: &Value) -> Option<Vec<String>> {
        // defaultSymbols: {"code": 0, "data": ["BTCUSDT", ...]}
        data.get("data")?
            .as_array()?
            .iter()
            .map(|s| s.as_str().map(str::to_string))
            .collect()
    }

    fn instruments<'a>(&self, data: &'a Value) -> Option<&'a Vec<Value>> {
        spot_v3::symbols_array(data)
    }

    fn server_time(&self, raw: &RawResponse) -> Option<Timestamp> {
        spot_v3::server_time(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::sign_query_string;
    use serde_json::json;

    const TS: Timestamp = Timestamp::from_millis(1_700_000_000_000);

    fn mexc() -> Mexc {
        Mexc::new(Endpoint::new("https://api.mexc.com"))
    }

    fn creds() -> Credentials {
        Credentials::new("mx0-key", "mx0-secret")
    }

    #[test]
    fn test_amend_is_unsupported() {
        let cmd = NormalizedCommand::new(ExchangeId::Mexc, OperationKind::AmendOrder)
            .with_param("symbol", "BTCUSDT")
            .with_param("orderId", "1")
            .with_param("newPrice", "1");
        let err = mexc().build(&cmd, Some(&creds()), TS).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert!(err.message.contains("does not support AmendOrder"));
    }

    #[test]
    fn test_place_order_has_no_time_in_force() {
        let cmd = NormalizedCommand::new(ExchangeId::Mexc, OperationKind::PlaceOrder)
            .with_param("symbol", "mxusdt")
            .with_param("side", "SELL")
            .with_param("orderType", "LIMIT")
            .with_param("quantity", "50")
            .with_param("price", "0.5")
            .with_param("clientOrderId", "mx-1");
        let req = mexc().build(&cmd, Some(&creds()), TS).unwrap();
        let query = req.url.split_once('?').unwrap().1;
        let (unsigned, signature) = query.rsplit_once("&signature=").unwrap();

        assert_eq!(
            unsigned,
            "symbol=MXUSDT&side=SELL&type=LIMIT&quantity=50&price=0.5\
             &newClientOrderId=mx-1&recvWindow=5000&timestamp=1700000000000"
        );
        assert_eq!(signature, sign_query_string("mx0-secret", unsigned));
        assert_eq!(req.header("X-MEXC-APIKEY"), Some("mx0-key"));
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_open_orders_require_symbol() {
        let cmd = NormalizedCommand::new(ExchangeId::Mexc, OperationKind::GetOpenOrders);
        let err = mexc().build(&cmd, Some(&creds()), TS).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn test_recv_window_from_endpoint() {
        let dialect = Mexc::new(Endpoint::new("https://api.mexc.com").with_recv_window(60000));
        let cmd = NormalizedCommand::new(ExchangeId::Mexc, OperationKind::GetAccountBalance);
        let req = dialect.build(&cmd, Some(&creds()), TS).unwrap();
        assert!(req.url.contains("recvWindow=60000&timestamp=1700000000000&signature="));
    }

    #[test]
    fn test_default_symbols_are_enumerated() {
        let raw = RawResponse::new(
            200,
            json!({"code": 0, "data": ["BTCUSDT", "MXUSDT"], "msg": null}).to_string(),
        );
        let cmd = NormalizedCommand::new(ExchangeId::Mexc, OperationKind::GetSymbols);
        assert_eq!(
            mexc().normalize(&cmd, &raw).unwrap(),
            json!([{"id": 1, "symbol": "BTCUSDT"}, {"id": 2, "symbol": "MXUSDT"}])
        );
    }

    #[test]
    fn test_error_code_mapping() {
        let cases = [
            (400, json!({"code": 700002, "msg": "Signature for this request is not valid."}), ErrorKind::AuthFailure),
            (400, json!({"code": 10072, "msg": "Api key info invalid"}), ErrorKind::AuthFailure),
            (400, json!({"code": 700003, "msg": "Timestamp for this request is outside of the recvWindow."}), ErrorKind::ClockSkew),
            (400, json!({"code": 30014, "msg": "Invalid symbol."}), ErrorKind::NotFound),
            (400, json!({"code": -2013, "msg": "Order does not exist."}), ErrorKind::NotFound),
            (429, json!({"code": 429, "msg": "Too many requests"}), ErrorKind::RateLimited),
            (400, json!({"code": 30004, "msg": "Insufficient position"}), ErrorKind::BadRequest),
            (400, json!({"code": 12345, "msg": "?"}), ErrorKind::UnknownUpstreamError),
        ];
        for (status, body, kind) in cases {
            let err = mexc()
                .unwrap_payload(&RawResponse::new(status, body.to_string()))
                .unwrap_err();
            assert_eq!(err.kind, kind, "{}", body);
        }
    }

    #[test]
    fn test_string_codes_are_understood() {
        let raw = RawResponse::new(400, r#"{"code":"700003","msg":"recvWindow"}"#);
        assert_eq!(mexc().unwrap_payload(&raw).unwrap_err().kind, ErrorKind::ClockSkew);
    }
}
