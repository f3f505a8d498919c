//! The gateway: one entry point for every exchange.
//!
//! [`Gateway`] routes a [`NormalizedCommand`] to its exchange's dialect,
//! fetches a credential snapshot for signed operations, builds a per-call
//! [`RestAdapter`], and returns a [`NormalizedResult`]. Unknown or disabled
//! exchanges and unsupported operations are rejected before anything is
//! built or sent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use exgw_core::config::AppConfig;
use exgw_core::types::{
    CredentialSource, ErrorKind, ExchangeId, NormalizedCommand, NormalizedError,
    NormalizedResult,
};

use crate::adapter::{CallOutcome, ExchangeAdapter, RestAdapter};
use crate::clock::{ClockSource, SystemClock};
use crate::dispatcher::{Dispatcher, RetryPolicy};
use crate::exchanges::{dialect_for, Dialect};
use crate::normalizer::TransportError;
use crate::request::{Endpoint, RequestBuilder};

/// Routes normalized commands to exchange adapters.
pub struct Gateway {
    dialects: HashMap<ExchangeId, Arc<dyn Dialect>>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn ClockSource>,
    credentials: Arc<dyn CredentialSource>,
}

impl Gateway {
    /// An empty gateway; register exchanges with [`Gateway::with_dialect`].
    pub fn new(
        dispatcher: Dispatcher,
        clock: Arc<dyn ClockSource>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            dialects: HashMap::new(),
            dispatcher: Arc::new(dispatcher),
            clock,
            credentials,
        }
    }

    /// Gateway for every exchange enabled in `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let dispatcher = Dispatcher::new(RetryPolicy::from_config(&config.dispatch));
        let mut gateway = Self::new(
            dispatcher,
            Arc::new(SystemClock::new()),
            Arc::new(config.credential_store()),
        );
        for exchange in config.enabled_exchanges() {
            let endpoint = Endpoint::from_config(config.exchange(exchange));
            gateway = gateway.with_dialect(dialect_for(exchange, endpoint));
        }
        gateway
    }

    /// Register (or replace) an exchange.
    pub fn with_dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialects.insert(dialect.exchange(), dialect);
        self
    }

    /// Registered exchanges, sorted.
    pub fn exchanges(&self) -> Vec<ExchangeId> {
        let mut exchanges: Vec<_> = self.dialects.keys().copied().collect();
        exchanges.sort();
        exchanges
    }

    /// Execute `command` and return its normalized result.
    pub async fn execute(&self, command: &NormalizedCommand) -> NormalizedResult {
        self.execute_detailed(command).await.result
    }

    /// Execute `command`, reporting the call's state trace and attempt count.
    pub async fn execute_detailed(&self, command: &NormalizedCommand) -> CallOutcome {
        let started = Instant::now();
        let adapter = match self.adapter_for(command) {
            Ok(adapter) => adapter,
            Err(err) => {
                debug!(
                    exchange = %command.exchange,
                    operation = %command.operation,
                    error = %err,
                    "command rejected"
                );
                return CallOutcome::rejected(err);
            }
        };

        let outcome = adapter.execute(command).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match &outcome.result {
            Ok(_) => info!(
                exchange = %command.exchange,
                operation = %command.operation,
                dispatches = outcome.dispatches,
                clock_refreshed = outcome.clock_refreshed,
                latency_ms,
                "command succeeded"
            ),
            Err(err) => warn!(
                exchange = %command.exchange,
                operation = %command.operation,
                kind = %err.kind,
                dispatches = outcome.dispatches,
                clock_refreshed = outcome.clock_refreshed,
                latency_ms,
                error = %err.message,
                "command failed"
            ),
        }
        outcome
    }

    /// Execute `command` unless `token` is cancelled first.
    ///
    /// Cancelling drops the in-flight request. A cancelled write is reported
    /// as `UpstreamUnavailable` since it may already have reached the
    /// exchange.
    pub async fn execute_until_cancelled(
        &self,
        command: &NormalizedCommand,
        token: &CancellationToken,
    ) -> NormalizedResult {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(exchange = %command.exchange, operation = %command.operation, "command cancelled");
                Err(TransportError::Cancelled.normalize(command.operation.is_write()))
            }
            outcome = self.execute_detailed(command) => outcome.result,
        }
    }

    /// Measure and store `exchange`'s clock offset.
    pub async fn sync_clock(&self, exchange: ExchangeId) -> Result<i64, NormalizedError> {
        let dialect = self.dialect(exchange)?;
        RestAdapter::new(dialect, self.dispatcher.clone(), self.clock.clone(), None)
            .refresh_clock()
            .await
    }

    /// Refresh every registered exchange's clock offset.
    pub async fn sync_all_clocks(&self) -> Vec<(ExchangeId, Result<i64, NormalizedError>)> {
        let mut results = Vec::new();
        for exchange in self.exchanges() {
            let result = self.sync_clock(exchange).await;
            if let Err(err) = &result {
                warn!(%exchange, error = %err, "clock sync failed");
            }
            results.push((exchange, result));
        }
        results
    }

    /// Refresh clock offsets every `interval` until `token` is cancelled.
    pub fn spawn_clock_sync(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("clock sync task stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.sync_all_clocks().await;
                    }
                }
            }
        })
    }

    /// Cached clock offset for `exchange`.
    pub fn clock_offset_ms(&self, exchange: ExchangeId) -> i64 {
        self.clock.offset_ms(exchange)
    }

    fn dialect(&self, exchange: ExchangeId) -> Result<Arc<dyn Dialect>, NormalizedError> {
        self.dialects.get(&exchange).cloned().ok_or_else(|| {
            NormalizedError::bad_request(format!("exchange {} is not enabled", exchange))
        })
    }

    fn adapter_for(&self, command: &NormalizedCommand) -> Result<RestAdapter, NormalizedError> {
        let dialect = self.dialect(command.exchange)?;
        if !dialect.supports(command.operation) {
            return Err(NormalizedError::bad_request(format!(
                "{} does not support {}",
                command.exchange, command.operation
            )));
        }
        let credentials = if command.operation.requires_auth() {
            match self.credentials.credentials(command.exchange) {
                Ok(credentials) => Some(credentials),
                Err(missing) => {
                    // Malformed parameters outrank missing credentials.
                    let now = self.clock.adjusted_now(command.exchange);
                    return Err(match dialect.build(command, None, now) {
                        Err(invalid) if invalid.kind == ErrorKind::BadRequest => invalid,
                        _ => missing,
                    });
                }
            }
        } else {
            None
        };
        Ok(RestAdapter::new(
            dialect,
            self.dispatcher.clone(),
            self.clock.clone(),
            credentials,
        ))
    }
}
