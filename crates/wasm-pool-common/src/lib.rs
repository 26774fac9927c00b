//! Common types, errors, and configuration for wasm-pool.
//!
//! This crate provides shared functionality used across the wasm-pool workspace:
//! - Error types using `thiserror`, classified into fatal, cancellation and
//!   sandbox-fault families
//! - Configuration structures for the engine, executions and pools
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EngineConfig, ExecutionConfig, PoolConfig, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError, ToolEntry};
pub use error::{CancelReason, FAULT_EXIT_CODE, RuntimeError};
