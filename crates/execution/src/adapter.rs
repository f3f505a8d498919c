//! Per-call exchange adapter.
//!
//! An adapter is constructed for a single call with a snapshot of the
//! exchange's credentials and dropped when the call ends; nothing mutable is
//! shared between concurrent calls apart from the clock offset cache. Each
//! call walks a small state machine:
//!
//! ```text
//! Built -> Dispatched -> Succeeded
//!                     -> FailedRecoverable -> Dispatched -> ...   (dispatcher retry)
//!                     -> FailedRecoverable -> Built -> ...        (clock skew, once)
//!                     -> FailedTerminal
//! ```
//!
//! Throttling and transient transport failures are retried inside the
//! dispatcher with the same signed request; each retry is traced as
//! `FailedRecoverable -> Dispatched`. A `ClockSkew` rejection triggers exactly
//! one server-time probe and one rebuild; a second skew surfaces to the
//! caller.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use exgw_core::types::{
    Credentials, ErrorKind, ExchangeId, NormalizedCommand, NormalizedError, NormalizedResult,
    OperationKind,
};

use crate::clock::{offset_from_probe, ClockSource};
use crate::dispatcher::Dispatcher;
use crate::exchanges::Dialect;
use crate::normalizer::{classify_status, ResponseNormalizer};
use crate::request::RequestBuilder;

/// Lifecycle state of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// A signed request exists.
    Built,
    /// The request has been handed to the dispatcher.
    Dispatched,
    Succeeded,
    /// Failed in a way a retry can correct (throttling, transient transport
    /// failure, clock skew).
    FailedRecoverable,
    FailedTerminal,
}

/// Everything known about a finished call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// Final state: `Succeeded` or `FailedTerminal`.
    pub state: CallState,
    /// Every state entered, in order.
    pub transitions: Vec<CallState>,
    /// HTTP attempts made, retries included.
    pub dispatches: u32,
    /// Whether a clock refresh was performed.
    pub clock_refreshed: bool,
    pub result: NormalizedResult,
}

impl CallOutcome {
    /// A call rejected before any request was built.
    pub fn rejected(error: NormalizedError) -> Self {
        Self {
            state: CallState::FailedTerminal,
            transitions: vec![CallState::FailedTerminal],
            dispatches: 0,
            clock_refreshed: false,
            result: Err(error),
        }
    }
}

#[derive(Default)]
struct CallTrace {
    transitions: Vec<CallState>,
    dispatches: u32,
    clock_refreshed: bool,
}

impl CallTrace {
    fn enter(&mut self, state: CallState) {
        self.transitions.push(state);
    }

    /// Record a dispatch that took `attempts` tries. `Dispatched` is already
    /// entered for the first.
    fn dispatched(&mut self, attempts: u32) {
        self.dispatches += attempts;
        for _ in 1..attempts {
            self.enter(CallState::FailedRecoverable);
            self.enter(CallState::Dispatched);
        }
    }

    fn finish(self, result: NormalizedResult) -> CallOutcome {
        let state = if result.is_ok() {
            CallState::Succeeded
        } else {
            CallState::FailedTerminal
        };
        let mut transitions = self.transitions;
        transitions.push(state);
        CallOutcome {
            state,
            transitions,
            dispatches: self.dispatches,
            clock_refreshed: self.clock_refreshed,
            result,
        }
    }
}

/// Uniform interface over every exchange.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    fn supports(&self, operation: OperationKind) -> bool;

    /// Run one command to completion.
    async fn execute(&self, command: &NormalizedCommand) -> CallOutcome;

    /// Measure and store the exchange's clock offset.
    async fn refresh_clock(&self) -> Result<i64, NormalizedError>;
}

/// Adapter for the REST dialects.
pub struct RestAdapter {
    dialect: Arc<dyn Dialect>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn ClockSource>,
    credentials: Option<Credentials>,
}

impl RestAdapter {
    pub fn new(
        dialect: Arc<dyn Dialect>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn ClockSource>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            dialect,
            dispatcher,
            clock,
            credentials,
        }
    }
}

#[async_trait]
impl ExchangeAdapter for RestAdapter {
    fn exchange(&self) -> ExchangeId {
        self.dialect.exchange()
    }

    fn supports(&self, operation: OperationKind) -> bool {
        self.dialect.supports(operation)
    }

    async fn execute(&self, command: &NormalizedCommand) -> CallOutcome {
        let exchange = self.exchange();
        let mut trace = CallTrace::default();

        loop {
            let timestamp = self.clock.adjusted_now(exchange);
            let request = match self
                .dialect
                .build(command, self.credentials.as_ref(), timestamp)
            {
                Ok(request) => request,
                Err(err) => return trace.finish(Err(err)),
            };
            trace.enter(CallState::Built);

            trace.enter(CallState::Dispatched);
            let dispatched = self.dispatcher.send(&request, self.dialect.as_ref()).await;
            trace.dispatched(dispatched.attempts);

            let result = match dispatched.result {
                Ok(raw) => self.dialect.normalize(command, &raw),
                Err(err) => Err(err.normalize(request.is_write())),
            };

            match result {
                Err(err) if err.kind == ErrorKind::ClockSkew && !trace.clock_refreshed => {
                    trace.enter(CallState::FailedRecoverable);
                    trace.clock_refreshed = true;
                    warn!(
                        %exchange,
                        operation = %command.operation,
                        signed_at = ?request.signed_at,
                        "timestamp rejected, refreshing clock offset"
                    );
                    if let Err(probe) = self.refresh_clock().await {
                        warn!(%exchange, error = %probe, "clock refresh failed");
                        return trace.finish(Err(err));
                    }
                }
                result => return trace.finish(result),
            }
        }
    }

    async fn refresh_clock(&self) -> Result<i64, NormalizedError> {
        let exchange = self.exchange();
        let request = self.dialect.server_time_request();

        let sent = self.clock.now();
        let dispatched = self.dispatcher.send(&request, self.dialect.as_ref()).await;
        let received = self.clock.now();

        let raw = dispatched.result.map_err(|e| e.normalize(false))?;
        if !raw.is_success() {
            return Err(classify_status(&raw));
        }
        let server = self.dialect.server_time(&raw).ok_or_else(|| {
            NormalizedError::new(
                ErrorKind::UnknownUpstreamError,
                format!("{} server time response not understood", exchange),
            )
            .with_raw(raw.payload())
        })?;

        let offset = offset_from_probe(sent, received, server);
        self.clock.record_offset(exchange, offset);
        info!(
            %exchange,
            offset_ms = offset,
            round_trip_ms = received.signed_diff(&sent),
            "clock offset updated"
        );
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_appends_final_state() {
        let mut trace = CallTrace::default();
        trace.enter(CallState::Built);
        trace.enter(CallState::Dispatched);
        trace.dispatches = 1;
        let outcome = trace.finish(Ok(serde_json::json!({})));
        assert_eq!(outcome.state, CallState::Succeeded);
        assert_eq!(
            outcome.transitions,
            vec![CallState::Built, CallState::Dispatched, CallState::Succeeded]
        );
    }

    #[test]
    fn test_dispatcher_retries_are_traced() {
        let mut trace = CallTrace::default();
        trace.enter(CallState::Built);
        trace.enter(CallState::Dispatched);
        trace.dispatched(3);
        let outcome = trace.finish(Ok(serde_json::json!({})));
        assert_eq!(outcome.dispatches, 3);
        assert_eq!(
            outcome.transitions,
            vec![
                CallState::Built,
                CallState::Dispatched,
                CallState::FailedRecoverable,
                CallState::Dispatched,
                CallState::FailedRecoverable,
                CallState::Dispatched,
                CallState::Succeeded,
            ]
        );
    }

    #[test]
    fn test_build_failure_never_dispatches() {
        let outcome = CallTrace::default().finish(Err(NormalizedError::bad_request("x")));
        assert_eq!(outcome.state, CallState::FailedTerminal);
        assert_eq!(outcome.transitions, vec![CallState::FailedTerminal]);
        assert_eq!(outcome.dispatches, 0);
    }

    #[test]
    fn test_rejected_outcome() {
        let outcome = CallOutcome::rejected(NormalizedError::auth_failure("no keys"));
        assert_eq!(outcome.state, CallState::FailedTerminal);
        assert_eq!(outcome.result.unwrap_err().kind, ErrorKind::AuthFailure);
    }

    #[test]
    fn test_adapter_is_object_safe() {
        fn _assert_object_safe(_a: &dyn ExchangeAdapter) {}
    }
}
