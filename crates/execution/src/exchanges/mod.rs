//! Exchange dialects.
//!
//! A dialect is everything the gateway knows about one exchange's REST API:
//! its endpoint table, signing scheme, response envelope, and error codes.
//! Dialects are stateless apart from their [`Endpoint`] and are shared by all
//! calls to that exchange.

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod mexc;
mod spot_v3;

use std::sync::Arc;

use exgw_core::types::ExchangeId;

use crate::normalizer::ResponseNormalizer;
use crate::request::{Endpoint, RequestBuilder};

pub use binance::Binance;
pub use bitget::Bitget;
pub use bybit::Bybit;
pub use mexc::Mexc;

/// Request building and response normalization for one exchange.
pub trait Dialect: RequestBuilder + ResponseNormalizer {}

impl<T: RequestBuilder + ResponseNormalizer> Dialect for T {}

/// The dialect for `exchange`, talking to `endpoint`.
pub fn dialect_for(exchange: ExchangeId, endpoint: Endpoint) -> Arc<dyn Dialect> {
    match exchange {
        ExchangeId::Binance => Arc::new(Binance::new(endpoint)),
        ExchangeId::Mexc => Arc::new(Mexc::new(endpoint)),
        ExchangeId::Bybit => Arc::new(Bybit::new(endpoint)),
        ExchangeId::Bitget => Arc::new(Bitget::new(endpoint)),
    }
}
