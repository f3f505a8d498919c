//! The normalized command: which exchange, which operation, which parameters.
//!
//! A [`NormalizedCommand`] is built once by the caller-facing layer and never
//! mutated afterwards. Parameters are kept in a sorted map so that iteration
//! order (and therefore anything derived from it) is deterministic; each
//! exchange dialect then picks the keys it needs in the order its signature
//! scheme prescribes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::order::{ExchangeId, ParseVocabularyError};
use super::outcome::NormalizedError;

/// Every operation the gateway can route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    GetSymbols,
    GetExchangeInfo,
    GetOrderBook,
    GetTicker,
    PlaceOrder,
    AmendOrder,
    CancelOrder,
    GetOrderStatus,
    GetOpenOrders,
    GetAccountBalance,
    GetTradeHistory,
}

impl OperationKind {
    /// All operations, in declaration order.
    pub const ALL: [OperationKind; 11] = [
        OperationKind::GetSymbols,
        OperationKind::GetExchangeInfo,
        OperationKind::GetOrderBook,
        OperationKind::GetTicker,
        OperationKind::PlaceOrder,
        OperationKind::AmendOrder,
        OperationKind::CancelOrder,
        OperationKind::GetOrderStatus,
        OperationKind::GetOpenOrders,
        OperationKind::GetAccountBalance,
        OperationKind::GetTradeHistory,
    ];

    /// Operations that change state on the exchange.
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            OperationKind::PlaceOrder | OperationKind::AmendOrder | OperationKind::CancelOrder
        )
    }

    /// Operations that must be signed with account credentials.
    pub const fn requires_auth(&self) -> bool {
        !matches!(
            self,
            OperationKind::GetSymbols
                | OperationKind::GetExchangeInfo
                | OperationKind::GetOrderBook
                | OperationKind::GetTicker
        )
    }

    /// Kebab-case route segment, e.g. `place-order`.
    pub const fn slug(&self) -> &'static str {
        match self {
            OperationKind::GetSymbols => "symbols",
            OperationKind::GetExchangeInfo => "exchange-info",
            OperationKind::GetOrderBook => "orderbook",
            OperationKind::GetTicker => "ticker",
            OperationKind::PlaceOrder => "place-order",
            OperationKind::AmendOrder => "amend-order",
            OperationKind::CancelOrder => "cancel-order",
            OperationKind::GetOrderStatus => "order-status",
            OperationKind::GetOpenOrders => "open-orders",
            OperationKind::GetAccountBalance => "balance",
            OperationKind::GetTradeHistory => "trades",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for OperationKind {
    type Err = ParseVocabularyError;

    /// Accepts either the route slug (`place-order`) or the variant name
    /// (`PlaceOrder`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        OperationKind::ALL
            .into_iter()
            .find(|op| op.slug() == trimmed || op.to_string() == trimmed)
            .ok_or_else(|| ParseVocabularyError {
                what: "operation",
                value: s.to_string(),
            })
    }
}

/// A parameter value: text or a JSON number.
///
/// Numbers are rendered as plain decimals (`0.1`, `5000`, `0.00000001`)
/// when placed on the wire, never in exponent form. Callers that need an
/// exact decimal representation (e.g. `"0.10"`) must send it as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Number(serde_json::Number),
}

impl ParamValue {
    /// The canonical wire form of the value.
    pub fn render(&self) -> String {
        match self {
            ParamValue::Text(s) => s.clone(),
            ParamValue::Number(n) => plain_decimal(&n.to_string()),
        }
    }
}

/// Expand exponent notation (`1e-8`, `2.5E+3`) into plain decimal digits.
/// Exchanges reject numbers in scientific notation.
fn plain_decimal(number: &str) -> String {
    let Some(e) = number.find(['e', 'E']) else {
        return number.to_string();
    };
    let Ok(exponent) = number[e + 1..].parse::<i64>() else {
        return number.to_string();
    };
    let (sign, mantissa) = match number[..e].strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", &number[..e]),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{}{}", int_part, frac_part);
    let point = int_part.len() as i64 + exponent;

    let (int_digits, frac_digits) = if point <= 0 {
        (
            "0".to_string(),
            format!("{}{}", "0".repeat(point.unsigned_abs() as usize), digits),
        )
    } else if point as usize >= digits.len() {
        (
            format!("{}{}", digits, "0".repeat(point as usize - digits.len())),
            String::new(),
        )
    } else {
        let (i, f) = digits.split_at(point as usize);
        (i.to_string(), f.to_string())
    };

    let int_digits = match int_digits.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };
    let frac_digits = frac_digits.trim_end_matches('0');
    if frac_digits.is_empty() {
        format!("{}{}", sign, int_digits)
    } else {
        format!("{}{}.{}", sign, int_digits, frac_digits)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Number(n.into())
    }
}

impl From<u64> for ParamValue {
    fn from(n: u64) -> Self {
        ParamValue::Number(n.into())
    }
}

/// An immutable, exchange-addressed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCommand {
    /// Target exchange.
    pub exchange: ExchangeId,
    /// What to do.
    pub operation: OperationKind,
    /// Caller-supplied parameters in the normalized vocabulary.
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl NormalizedCommand {
    /// Create a command with no parameters.
    pub fn new(exchange: ExchangeId, operation: OperationKind) -> Self {
        Self {
            exchange,
            operation,
            params: BTreeMap::new(),
        }
    }

    /// Parse a command from its textual route parts.
    ///
    /// Unknown exchanges and operations are `BadRequest` errors.
    pub fn parse(
        exchange: &str,
        operation: &str,
        params: BTreeMap<String, ParamValue>,
    ) -> Result<Self, NormalizedError> {
        let exchange = exchange
            .parse::<ExchangeId>()
            .map_err(|e| NormalizedError::bad_request(e.to_string()))?;
        let operation = operation
            .parse::<OperationKind>()
            .map_err(|e| NormalizedError::bad_request(e.to_string()))?;
        Ok(Self {
            exchange,
            operation,
            params,
        })
    }

    /// Builder-style parameter insertion.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Raw parameter lookup.
    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    /// Rendered parameter value; blank text counts as absent.
    pub fn text(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .map(ParamValue::render)
            .filter(|v| !v.trim().is_empty())
    }

    /// The identifier that makes a write idempotent upstream: the client
    /// order id if present, otherwise the exchange order id.
    pub fn idempotency_key(&self) -> Option<String> {
        self.text("clientOrderId").or_else(|| self.text("orderId"))
    }
}
