//! Exchange identifiers and the order vocabulary shared by every dialect:
//! side, order type, and symbol.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    /// MEXC spot (`/api/v3`).
    Mexc,
    /// Binance spot (`/api/v3`).
    Binance,
    /// Bitget spot (`/api/v2`).
    Bitget,
    /// Bybit unified trading (`/v5`).
    Bybit,
}

impl ExchangeId {
    /// Every supported exchange, in routing-table order.
    pub const ALL: [ExchangeId; 4] = [
        ExchangeId::Mexc,
        ExchangeId::Binance,
        ExchangeId::Bitget,
        ExchangeId::Bybit,
    ];

    /// Lowercase identifier used in routes and config sections.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Mexc => "mexc",
            ExchangeId::Binance => "binance",
            ExchangeId::Bitget => "bitget",
            ExchangeId::Bybit => "bybit",
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeId::Mexc => write!(f, "MEXC"),
            ExchangeId::Binance => write!(f, "Binance"),
            ExchangeId::Bitget => write!(f, "Bitget"),
            ExchangeId::Bybit => write!(f, "Bybit"),
        }
    }
}

/// Error returned when a string does not name a known exchange, side, or
/// order type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {what}: {value:?}")]
pub struct ParseVocabularyError {
    /// What was being parsed ("exchange", "side", ...).
    pub what: &'static str,
    /// The rejected input.
    pub value: String,
}

impl FromStr for ExchangeId {
    type Err = ParseVocabularyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mexc" => Ok(ExchangeId::Mexc),
            "binance" => Ok(ExchangeId::Binance),
            "bitget" => Ok(ExchangeId::Bitget),
            "bybit" => Ok(ExchangeId::Bybit),
            _ => Err(ParseVocabularyError {
                what: "exchange",
                value: s.to_string(),
            }),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy / long.
    Buy,
    /// Sell / short.
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

impl FromStr for Side {
    type Err = ParseVocabularyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            _ => Err(ParseVocabularyError {
                what: "side",
                value: s.to_string(),
            }),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Limit order with specified price.
    Limit,
    /// Market order, fills at best available price.
    Market,
    /// Post-only limit order (rejected if it would take liquidity).
    PostOnly,
}

impl OrderType {
    /// Whether the order type needs a limit price.
    pub const fn requires_price(&self) -> bool {
        !matches!(self, OrderType::Market)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "Limit"),
            OrderType::Market => write!(f, "Market"),
            OrderType::PostOnly => write!(f, "PostOnly"),
        }
    }
}

impl FromStr for OrderType {
    type Err = ParseVocabularyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "LIMIT" => Ok(OrderType::Limit),
            "MARKET" => Ok(OrderType::Market),
            "POSTONLY" | "LIMITMAKER" => Ok(OrderType::PostOnly),
            _ => Err(ParseVocabularyError {
                what: "order type",
                value: s.to_string(),
            }),
        }
    }
}

/// Trading pair symbol (e.g., "BTCUSDT").
///
/// Always stored upper-cased: every supported exchange addresses spot pairs
/// in upper case, while callers frequently send `btcusdt`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Symbol {
    /// Create a new symbol, normalizing case and surrounding whitespace.
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(s.as_ref().trim().to_ascii_uppercase())
    }

    /// The normalized symbol text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
