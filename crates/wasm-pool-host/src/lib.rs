//! Host capability shim for wasm-pool sandboxes.
//!
//! This crate provides the host side of a sandbox: the narrow set of
//! functions a guest tool may import, and the [`WasiHost`] environment that
//! wires them into an [`Instantiator`](wasm_pool_core::Instantiator).
//!
//! # Capabilities
//!
//! - **WASI preview 1** (always): argv, environment, stdio, clocks,
//!   randomness and `proc_exit`, with no filesystem or network access
//! - [`logging`]: `env::log` structured logging from guest code (opt-in)
//!
//! Capability sets are declared with [`HostCapabilities`] and validated when
//! the host is constructed.

pub mod capabilities;
pub mod linker;
pub mod logging;

use wasmtime::Linker;
use wasmtime_wasi::WasiCtxBuilder;

use wasm_pool_common::RuntimeError;
use wasm_pool_core::{HostEnvironment, SandboxContext};

pub use capabilities::HostCapabilities;
pub use linker::register_all;
pub use logging::LoggingHost;

/// The standard [`HostEnvironment`]: WASI preview 1 plus the enabled extras.
#[derive(Debug, Clone)]
pub struct WasiHost {
    capabilities: HostCapabilities,
}

impl WasiHost {
    /// Create a host exposing `capabilities`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Initialization`] if the capability set is invalid.
    pub fn new(capabilities: HostCapabilities) -> Result<Self, RuntimeError> {
        capabilities.validate()?;
        Ok(Self { capabilities })
    }

    /// The capabilities this host exposes.
    pub fn capabilities(&self) -> &HostCapabilities {
        &self.capabilities
    }
}

impl Default for WasiHost {
    fn default() -> Self {
        Self {
            capabilities: HostCapabilities::minimal(),
        }
    }
}

impl HostEnvironment for WasiHost {
    fn build_runtime(&self, linker: &mut Linker<SandboxContext>) -> Result<(), RuntimeError> {
        register_all(linker, &self.capabilities)
    }

    fn build_config(&self) -> WasiCtxBuilder {
        let mut builder = WasiCtxBuilder::new();
        for (key, value) in &self.capabilities.env {
            builder.env(key, value);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_host_is_minimal() {
        let host = WasiHost::default();
        assert!(host.capabilities().wasi);
        assert!(!host.capabilities().guest_log);
    }

    #[test]
    fn test_new_rejects_invalid_capabilities() {
        let caps = HostCapabilities {
            wasi: false,
            ..HostCapabilities::minimal()
        };
        let result = WasiHost::new(caps);
        assert!(matches!(result, Err(RuntimeError::Initialization { .. })));
    }
}
