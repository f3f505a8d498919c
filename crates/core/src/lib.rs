//! # exgw-core
//!
//! Shared types and ambient services for the multi-exchange gateway.
//!
//! This crate holds the caller-facing vocabulary (normalized commands,
//! results and the error taxonomy), credential snapshots, millisecond
//! wall-clock timestamps, layered configuration, and the logging setup used
//! by every other crate in the workspace.

pub mod config;
pub mod logging;
pub mod types;
