//! Binance spot (`/api/v3`).
//!
//! Signed endpoints carry `recvWindow`, `timestamp` and a hex HMAC
//! `signature` in the query string, with the key in `X-MBX-APIKEY`. Writes
//! are sent as query parameters as well; Binance accepts either form.

use serde_json::Value;

use exgw_core::types::{
    Credentials, ErrorKind, ExchangeId, NormalizedCommand, NormalizedError, NormalizedResult,
    OperationKind, OrderType, Timestamp,
};

use super::spot_v3::{self, push_order_ref, Route, SpotV3};
use crate::normalizer::{RawResponse, ResponseNormalizer};
use crate::request::{
    unsupported, Endpoint, HttpMethod, ParamReader, RequestBuilder, SignedRequest,
};

const SPOT: SpotV3 = SpotV3 {
    exchange: ExchangeId::Binance,
    api_key_header: "X-MBX-APIKEY",
    fixed_headers: &[],
};

/// Binance spot dialect.
#[derive(Debug, Clone)]
pub struct Binance {
    endpoint: Endpoint,
}

impl Binance {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    fn route(&self, command: &NormalizedCommand) -> Result<Route, NormalizedError> {
        use HttpMethod::*;
        use OperationKind::*;

        let p = ParamReader::new(command);
        let route = match command.operation {
            GetSymbols | GetExchangeInfo => Route::new(Get, "/api/v3/exchangeInfo", 20),
            GetOrderBook => {
                let mut r = Route::new(Get, "/api/v3/depth", 5);
                r.params
                    .push("symbol", p.symbol()?.as_str())
                    .push("limit", p.optional("limit").unwrap_or_else(|| "10".into()));
                r
            }
            GetTicker => {
                let mut r = Route::new(Get, "/api/v3/ticker/24hr", 2);
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
                    .push("type", spot_v3::order_type_code(order_type));
                if order_type == OrderType::Limit {
                    r.params.push(
                        "timeInForce",
                        p.optional("timeInForce").unwrap_or_else(|| "GTC".into()),
                    );
                }
                r.params
                    .push("quantity", quantity)
                    .push_opt("price", price)
                    .push("newClientOrderId", client_order_id);
                r
            }
            AmendOrder => {
                // keepPriority amends can only reduce quantity.
                let symbol = p.symbol()?;
                let order = p.order_ref()?;
                let (new_price, new_quantity) = p.amendment()?;
                if new_price.is_some() {
                    return Err(NormalizedError::bad_request(
                        "Binance amends support `newQuantity` only",
                    ));
                }
                let mut r = Route::new(Put, "/api/v3/order/amend/keepPriority", 4);
                r.params.push("symbol", symbol.as_str());
                push_order_ref(&mut r.params, order);
                r.params.push_opt("newQty", new_quantity);
                r
            }
            CancelOrder => {
                let mut r = Route::new(Delete, "/api/v3/order", 1);
                r.params.push("symbol", p.symbol()?.as_str());
                push_order_ref(&mut r.params, p.order_ref()?);
                r
            }
            GetOrderStatus => {
                let mut r = Route::new(Get, "/api/v3/order", 4);
                r.params.push("symbol", p.symbol()?.as_str());
                push_order_ref(&mut r.params, p.order_ref()?);
                r
            }
            GetOpenOrders => match p.optional_symbol() {
                Some(symbol) => {
                    let mut r = Route::new(Get, "/api/v3/openOrders", 6);
                    r.params.push("symbol", symbol.as_str());
                    r
                }
                None => Route::new(Get, "/api/v3/openOrders", 80),
            },
            GetAccountBalance => Route::new(Get, "/api/v3/account", 20),
            GetTradeHistory => {
                let mut r = Route::new(Get, "/api/v3/myTrades", 20);
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

/// Binance error code to [`ErrorKind`].
pub(crate) fn error_kind(code: i64, msg: &str, status: u16) -> ErrorKind {
    match code {
        -1021 => ErrorKind::ClockSkew,
        -1002 | -1022 | -2014 | -2015 => ErrorKind::AuthFailure,
        -1003 | -1015 => ErrorKind::RateLimited,
        -1121 | -2013 => ErrorKind::NotFound,
        -2011 if msg.contains("Unknown order") => ErrorKind::NotFound,
        -1000 | -1001 | -1006 | -1007 | -1008 => ErrorKind::UpstreamUnavailable,
        -1199..=-1100 | -1013 | -2010 | -2011 | -2021 | -2022 => ErrorKind::BadRequest,
        _ if status == 429 || status == 418 => ErrorKind::RateLimited,
        _ if status >= 500 => ErrorKind::UpstreamUnavailable,
        _ => ErrorKind::UnknownUpstreamError,
    }
}

impl RequestBuilder for Binance {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Binance
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
            return Err(unsupported(ExchangeId::Binance, command.operation));
        }
        let route = self.route(command)?;
        SPOT.assemble(&self.endpoint, command.operation, route, credentials, timestamp)
    }

    fn server_time_request(&self) -> SignedRequest {
        SPOT.time_request(&self.endpoint)
    }
}

impl ResponseNormalizer for Binance {
    fn is_throttled(&self, raw: &RawResponse) -> bool {
        if raw.status == 429 {
            return true;
        }
        raw.json()
            .as_ref()
            .and_then(spot_v3::error_code)
            .is_some_and(|(code, _)| code == -1003 || code == -1015)
    }

    fn unwrap_payload(&self, raw: &RawResponse) -> NormalizedResult {
        spot_v3::unwrap(ExchangeId::Binance, raw, error_kind)
    }

    fn symbol_names(&self, data: &Value) -> Option<Vec<String>> {
        spot_v3::symbols_array(data)?
            .iter()
            .map(|s| s.get("symbol").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    fn instruments<'a>(&self, data: &'a Value) -> Option<&'a Vec<Value>> {
        spot_v3::symbols_array(data)
    }

    fn server_time(&self, raw: &RawResponse) -> Option<Timestamp> {
        spot_v3::server_time(raw)
    }
}
