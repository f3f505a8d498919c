//! Logging and tracing initialization for the gateway.
//!
//! [`init_tracing`] installs a subscriber in one of two modes:
//! - **JSON mode** (`json = true`): one object per event with millisecond
//!   UTC timestamps, for log aggregation.
//! - **Pretty mode** (`json = false`): human-readable output for local runs.
//!
//! Both respect `RUST_LOG` (e.g., `RUST_LOG=exgw_execution=debug`).
//!
//! The [`SecretSanitizer`] layer flags events that carry API keys, secrets,
//! passphrases or signatures, which the request path must never log.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize the global tracing subscriber.
///
/// Returns an error if a global subscriber has already been installed.
///
/// # Examples
///
/// ```
/// exgw_core::logging::init_tracing(false).expect("first subscriber");
/// ```
pub fn init_tracing(json: bool) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(SecretSanitizer);

    if json {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(MillisecondTimer)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);

        registry.with(json_layer).try_init()
    } else {
        let pretty_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_span_events(FmtSpan::CLOSE);

        registry.with(pretty_layer).try_init()
    }
}

/// Millisecond UTC timer, matching the resolution of exchange timestamps.
#[derive(Debug, Clone)]
struct MillisecondTimer;

impl tracing_subscriber::fmt::time::FormatTime for MillisecondTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

/// A tracing layer that flags span and event fields resembling credentials.
///
/// It cannot rewrite fields already handed to sibling layers, so it emits a
/// warning naming the offending callsite instead. Patterns detected:
/// - Base64-like strings of 32+ characters (HMAC secrets, Bitget signatures)
/// - Hex strings of 40+ characters (Binance/Bybit/MEXC signatures)
/// - Fields named like credentials (`api_key`, `passphrase`, `signature`, ...)
#[derive(Debug, Clone)]
pub struct SecretSanitizer;

impl<S> Layer<S> for SecretSanitizer
where
    S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_new_span(
        &self,
        attrs: &span::Attributes<'_>,
        _id: &span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = SecretCheckVisitor::default();
        attrs.record(&mut visitor);
        if visitor.found_secret {
            tracing::warn!(
                span = attrs.metadata().name(),
                "potential secret recorded in span fields"
            );
        }
    }

    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = SecretCheckVisitor::default();
        event.record(&mut visitor);
        // The warning itself passes through this layer; its fields are clean.
        if visitor.found_secret {
            tracing::warn!(
                target_module = event.metadata().target(),
                "potential secret recorded in event fields"
            );
        }
    }
}

/// Visitor that checks field names and values for secret-like patterns.
#[derive(Default)]
struct SecretCheckVisitor {
    found_secret: bool,
}

/// Field names that always indicate secrets regardless of value.
const SENSITIVE_FIELD_NAMES: &[&str] = &[
    "api_key",
    "api_secret",
    "secret",
    "passphrase",
    "password",
    "signature",
    "sign",
    "x_mbx_apikey",
    "access_key",
];

impl SecretCheckVisitor {
    /// Check if a string value looks like an API key or secret.
    fn looks_like_secret(value: &str) -> bool {
        if value.len() < 32 {
            return false;
        }

        let alnum_count = value.chars().filter(|c| c.is_alphanumeric()).count();
        let ratio = alnum_count as f64 / value.len() as f64;

        // High-entropy alphanumeric strings of 32+ chars are suspicious.
        if ratio > 0.85 && value.len() >= 32 {
            // Check for base64-like pattern (letters, digits, +, /, =)
            let is_base64_like = value
                .chars()
                .all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=');
            if is_base64_like {
                return true;
            }

            // Check for hex-like pattern (40+ hex chars)
            if value.len() >= 40 && value.chars().all(|c| c.is_ascii_hexdigit()) {
                return true;
            }
        }

        false
    }
}

impl Visit for SecretCheckVisitor {
    fn record_debug(&mut self, field: &Field, _value: &dyn fmt::Debug) {
        if SENSITIVE_FIELD_NAMES.contains(&field.name()) {
            self.found_secret = true;
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if SENSITIVE_FIELD_NAMES.contains(&field.name()) {
            self.found_secret = true;
        } else if Self::looks_like_secret(value) {
            self.found_secret = true;
        }
    }
}
