//! Layered configuration for the exchange gateway.
//!
//! Configuration is loaded in layers with increasing priority:
//! 1. Compiled-in defaults (production REST URLs, Bybit testnet)
//! 2. TOML configuration file (if provided)
//! 3. Environment variable overrides (prefix `EXGW_`, nested with `__`)
//! 4. Specific env vars for API secrets (`BINANCE_API_KEY`, etc.)
//!
//! API keys, secrets and passphrases **must** come from environment variables,
//! never from configuration files, to prevent accidental check-in of
//! credentials.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::types::{CredentialStore, Credentials, ExchangeId};

// ── Default value functions ────────────────────────────────────────────

/// Default request timeout per attempt: 5 000 ms.
fn default_timeout_ms() -> u64 {
    5_000
}

/// Default receive window: 5 000 ms.
fn default_recv_window_ms() -> u64 {
    5_000
}

fn default_enabled() -> bool {
    true
}

/// Default dispatch attempts per call (first try included): 3.
fn default_max_attempts() -> u32 {
    3
}

/// Default initial retry backoff: 200 ms.
fn default_initial_backoff_ms() -> u64 {
    200
}

/// Default maximum retry backoff: 5 000 ms.
fn default_max_backoff_ms() -> u64 {
    5_000
}

/// Default clock-sync interval: 60 000 ms.
fn default_sync_interval_ms() -> u64 {
    60_000
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

/// Exchanges reject receive windows above one minute.
const MAX_RECV_WINDOW_MS: u64 = 60_000;

// ── Configuration structs ──────────────────────────────────────────────

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// MEXC connection settings.
    pub mexc: ExchangeConfig,
    /// Binance connection settings.
    pub binance: ExchangeConfig,
    /// Bitget connection settings.
    pub bitget: ExchangeConfig,
    /// Bybit connection settings.
    pub bybit: ExchangeConfig,
    /// Retry and backoff policy shared by all exchanges.
    pub dispatch: DispatchConfig,
    /// Server-time synchronisation.
    pub clock: ClockConfig,
    /// Outer HTTP service.
    pub server: ServerConfig,
}

/// Exchange connection configuration.
///
/// Secrets **must** come from environment variables, never config files. The
/// `#[serde(default)]` annotations ensure deserialization does not require
/// them in the TOML source.
#[derive(Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Whether the gateway routes to this exchange at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// API key, loaded from env var (e.g., `BINANCE_API_KEY`).
    #[serde(default)]
    pub api_key: String,
    /// API secret, loaded from env var (e.g., `BINANCE_API_SECRET`).
    #[serde(default)]
    pub api_secret: String,
    /// API passphrase, Bitget only (`BITGET_API_PASS`).
    #[serde(default)]
    pub passphrase: String,
    /// REST API base URL.
    pub rest_url: String,
    /// Tolerance between request timestamp and server time, in milliseconds.
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    /// Per-attempt request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl std::fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("enabled", &self.enabled)
            .field("has_credentials", &!self.api_key.is_empty())
            .field("rest_url", &self.rest_url)
            .field("recv_window_ms", &self.recv_window_ms)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Retry policy for the dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Total attempts per call including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles per retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for any single backoff, including `Retry-After` hints.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Server-time synchronisation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClockConfig {
    /// How often every enabled exchange's clock offset is re-probed.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
}

/// Outer HTTP service settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Emit JSON logs instead of pretty output.
    #[serde(default)]
    pub json_logs: bool,
}

impl AppConfig {
    /// Load configuration using layered sources.
    ///
    /// 1. Compiled-in defaults.
    /// 2. TOML file at `config_path` (if `Some`).
    /// 3. Environment variable overrides with prefix `EXGW_` and `__` as
    ///    the nesting separator (e.g., `EXGW_DISPATCH__MAX_ATTEMPTS=5`).
    /// 4. Secrets from dedicated env vars: `MEXC_API_KEY`, `MEXC_API_SECRET`,
    ///    `BINANCE_API_KEY`, `BINANCE_API_SECRET`, `BYBIT_API_KEY`,
    ///    `BYBIT_API_SECRET`, `BITGET_API_KEY`, `BITGET_API_SECRET`,
    ///    `BITGET_API_PASS`.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder()
            // ── Layer 1: compiled-in defaults ───────────────────────
            .set_default("mexc.rest_url", "https://api.mexc.com")?
            .set_default("mexc.recv_window_ms", 5000i64)?
            .set_default("binance.rest_url", "https://api.binance.com")?
            .set_default("binance.recv_window_ms", 5000i64)?
            .set_default("bitget.rest_url", "https://api.bitget.com")?
            .set_default("bitget.recv_window_ms", 5000i64)?
            // Bybit testnet with the wide window the SDK was configured with
            .set_default("bybit.rest_url", "https://api-testnet.bybit.com")?
            .set_default("bybit.recv_window_ms", 20000i64)?
            .set_default("dispatch.max_attempts", 3i64)?
            .set_default("dispatch.initial_backoff_ms", 200i64)?
            .set_default("dispatch.max_backoff_ms", 5000i64)?
            .set_default("clock.sync_interval_ms", 60000i64)?
            .set_default("server.bind_addr", "0.0.0.0:3000")?
            .set_default("server.json_logs", false)?;

        for exchange in ExchangeId::ALL {
            let section = exchange.as_str();
            builder = builder
                .set_default(format!("{section}.enabled"), true)?
                .set_default(format!("{section}.timeout_ms"), 5000i64)?
                .set_default(format!("{section}.api_key"), "")?
                .set_default(format!("{section}.api_secret"), "")?
                .set_default(format!("{section}.passphrase"), "")?;
        }

        // ── Layer 2: TOML file ─────────────────────────────────────
        if let Some(path) = config_path {
            let path_str = path
                .to_str()
                .context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }

        // ── Layer 3: env var overrides (EXGW_ prefix) ──────────────
        // The prefix separator is set explicitly because the `config` crate
        // otherwise reuses the nesting separator (`EXGW__...`).
        builder = builder.add_source(
            Environment::with_prefix("EXGW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        // ── Layer 4: dedicated secret env vars ─────────────────────
        for exchange in ExchangeId::ALL {
            let prefix = exchange.as_str().to_ascii_uppercase();
            let section = cfg.exchange_mut(exchange);
            if let Ok(v) = std::env::var(format!("{prefix}_API_KEY")) {
                section.api_key = v;
            }
            if let Ok(v) = std::env::var(format!("{prefix}_API_SECRET")) {
                section.api_secret = v;
            }
        }
        if let Ok(v) = std::env::var("BITGET_API_PASS") {
            cfg.bitget.passphrase = v;
        }

        cfg.validate()?;

        Ok(cfg)
    }

    /// Settings for one exchange.
    pub fn exchange(&self, exchange: ExchangeId) -> &ExchangeConfig {
        match exchange {
            ExchangeId::Mexc => &self.mexc,
            ExchangeId::Binance => &self.binance,
            ExchangeId::Bitget => &self.bitget,
            ExchangeId::Bybit => &self.bybit,
        }
    }

    fn exchange_mut(&mut self, exchange: ExchangeId) -> &mut ExchangeConfig {
        match exchange {
            ExchangeId::Mexc => &mut self.mexc,
            ExchangeId::Binance => &mut self.binance,
            ExchangeId::Bitget => &mut self.bitget,
            ExchangeId::Bybit => &mut self.bybit,
        }
    }

    /// Exchanges with `enabled = true`.
    pub fn enabled_exchanges(&self) -> Vec<ExchangeId> {
        ExchangeId::ALL
            .into_iter()
            .filter(|ex| self.exchange(*ex).enabled)
            .collect()
    }

    /// Credential table built from the loaded secrets. Exchanges without a
    /// key/secret pair are simply absent.
    pub fn credential_store(&self) -> CredentialStore {
        let mut store = CredentialStore::new();
        for exchange in ExchangeId::ALL {
            let section = self.exchange(exchange);
            let mut creds = Credentials::new(&section.api_key, &section.api_secret);
            if !section.passphrase.is_empty() {
                creds = creds.with_passphrase(&section.passphrase);
            }
            store.insert(exchange, creds);
        }
        store
    }

    /// Validate configuration invariants.
    fn validate(&self) -> Result<()> {
        for exchange in ExchangeId::ALL {
            let section = self.exchange(exchange);
            if section.recv_window_ms == 0 || section.recv_window_ms > MAX_RECV_WINDOW_MS {
                bail!(
                    "{} recv_window_ms must be between 1 and {} (got {})",
                    exchange,
                    MAX_RECV_WINDOW_MS,
                    section.recv_window_ms
                );
            }
            if section.timeout_ms == 0 {
                bail!("{} timeout_ms must be positive", exchange);
            }
        }
        if !self.bitget.api_key.is_empty() && self.bitget.passphrase.is_empty() {
            bail!("Bitget API key is set but BITGET_API_PASS is missing");
        }
        if self.dispatch.max_attempts == 0 {
            bail!("dispatch.max_attempts must be at least 1");
        }
        if self.dispatch.initial_backoff_ms > self.dispatch.max_backoff_ms {
            bail!("dispatch.initial_backoff_ms exceeds dispatch.max_backoff_ms");
        }
        Ok(())
    }
}
