//! Per-run execution context and store management.
//!
//! This module provides:
//! - [`SandboxContext`]: Per-run state accessible from host functions
//! - [`LogLevel`]: Severity of guest log messages
//! - [`SandboxLimiter`]: Linear memory cap

use wasmtime::{ResourceLimiter, Store};
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use crate::args::EffectiveLimits;
use wasm_pool_common::RuntimeError;

/// Per-run execution context.
///
/// Holds all state specific to a single sandboxed execution. A fresh context
/// and store are created for every run and dropped when it completes.
pub struct SandboxContext {
    /// WASI preview 1 context (argv, stdio, clocks, randomness).
    wasi: WasiP1Ctx,

    /// Memory growth limit.
    limiter: SandboxLimiter,

    /// Unique run identifier for tracing.
    pub request_id: String,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl SandboxContext {
    /// Create a new context around a built WASI context.
    pub fn new(request_id: String, wasi: WasiP1Ctx, max_memory_bytes: usize) -> Self {
        Self {
            wasi,
            limiter: SandboxLimiter::new(max_memory_bytes),
            request_id,
        }
    }

    /// The WASI context, for host function registration.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }
}

/// Raised inside the guest when linear memory would grow past the limit.
#[derive(Debug, thiserror::Error)]
#[error("memory growth to {desired} bytes exceeds the limit of {limit} bytes")]
pub struct MemoryLimitHit {
    /// Requested size in bytes.
    pub desired: usize,
    /// Configured limit in bytes.
    pub limit: usize,
}

/// Caps linear memory. Growth past the cap traps with [`MemoryLimitHit`].
#[derive(Debug)]
pub struct SandboxLimiter {
    max_memory_bytes: usize,
}

impl SandboxLimiter {
    /// Create a limiter allowing at most `max_memory_bytes` per memory.
    pub fn new(max_memory_bytes: usize) -> Self {
        Self { max_memory_bytes }
    }
}

impl ResourceLimiter for SandboxLimiter {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > self.max_memory_bytes {
            return Err(wasmtime::Error::new(MemoryLimitHit {
                desired,
                limit: self.max_memory_bytes,
            }));
        }
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        _desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(true)
    }
}

/// Create a new Wasmtime store for one run.
///
/// Applies the fuel budget when metering is enabled and, when epoch
/// interruption is enabled, makes the guest yield to the executor on every
/// tick so the run can be aborted by dropping its future.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    context: SandboxContext,
    limits: &EffectiveLimits,
) -> Result<Store<SandboxContext>, RuntimeError> {
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limiter);

    if engine.config().fuel_metering {
        store
            .set_fuel(limits.max_fuel)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    if engine.config().epoch_interruption {
        store.set_epoch_deadline(1);
        store.epoch_deadline_async_yield_and_update(1);
    }

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<SandboxContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<SandboxContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}
