//! Core types for the exchange gateway.
//!
//! Everything a caller needs to describe a request ([`NormalizedCommand`]) and
//! interpret its answer ([`NormalizedResult`], [`ErrorKind`]), plus the shared
//! exchange vocabulary and credential snapshot types.

pub mod command;
pub mod credentials;
pub mod order;
pub mod outcome;
pub mod timestamp;

// Re-export primary types for convenient access via `exgw_core::types::*`.
pub use command::{NormalizedCommand, OperationKind, ParamValue};
pub use credentials::{CredentialSource, CredentialStore, Credentials};
pub use order::{ExchangeId, OrderType, ParseVocabularyError, Side, Symbol};
pub use outcome::{ErrorKind, NormalizedError, NormalizedResult, ResultEnvelope};
pub use timestamp::Timestamp;
