//! # exgw-execution
//!
//! Exchange connectivity for the gateway: request signing, per-exchange
//! dialects for MEXC, Binance, Bitget and Bybit, HTTP dispatch with bounded
//! retries and client-side rate limiting, response normalization, clock
//! offset tracking, and the [`gateway::Gateway`] that ties them together.

pub mod adapter;
pub mod clock;
pub mod dispatcher;
pub mod exchanges;
pub mod gateway;
pub mod normalizer;
pub mod rate_limiter;
pub mod request;
pub mod signing;

pub use adapter::{CallOutcome, CallState, ExchangeAdapter, RestAdapter};
pub use clock::{ClockSource, FixedClock, SystemClock};
pub use dispatcher::{Dispatcher, RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use gateway::Gateway;
pub use normalizer::{RawResponse, ResponseNormalizer, TransportError};
pub use request::{Endpoint, RequestBuilder, SignedRequest};
