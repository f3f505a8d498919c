//! API credentials and the secret collaborator that hands them out.
//!
//! Secrets never appear in `Debug` output. Each call receives its own cloned
//! snapshot from a [`CredentialSource`]; nothing in the request path holds a
//! mutable reference to shared credentials.

use std::collections::HashMap;
use std::fmt;

use super::order::ExchangeId;
use super::outcome::NormalizedError;

/// API key material for one exchange account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    /// Bitget requires an API passphrase in addition to key and secret.
    pub passphrase: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Key and secret both present.
    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Supplies per-exchange credentials at call time.
pub trait CredentialSource: Send + Sync {
    /// Snapshot of the credentials for `exchange`.
    ///
    /// Returns an `AuthFailure` error when none are configured.
    fn credentials(&self, exchange: ExchangeId) -> Result<Credentials, NormalizedError>;
}

/// In-memory credential table, typically populated from configuration.
#[derive(Default, Clone)]
pub struct CredentialStore {
    entries: HashMap<ExchangeId, Credentials>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register credentials; incomplete entries are ignored.
    pub fn insert(&mut self, exchange: ExchangeId, credentials: Credentials) {
        if credentials.is_complete() {
            self.entries.insert(exchange, credentials);
        }
    }

    pub fn with(mut self, exchange: ExchangeId, credentials: Credentials) -> Self {
        self.insert(exchange, credentials);
        self
    }

    pub fn contains(&self, exchange: ExchangeId) -> bool {
        self.entries.contains_key(&exchange)
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut configured: Vec<_> = self.entries.keys().collect();
        configured.sort();
        f.debug_struct("CredentialStore")
            .field("configured", &configured)
            .finish()
    }
}

impl CredentialSource for CredentialStore {
    fn credentials(&self, exchange: ExchangeId) -> Result<Credentials, NormalizedError> {
        self.entries.get(&exchange).cloned().ok_or_else(|| {
            NormalizedError::auth_failure(format!("no API credentials configured for {}", exchange))
        })
    }
}
