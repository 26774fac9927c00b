//! Host function registration.
//!
//! Wires the capabilities in a [`HostCapabilities`] onto a module linker.

use tracing::{debug, warn};
use wasmtime::{Caller, Linker};

use wasm_pool_common::RuntimeError;
use wasm_pool_core::SandboxContext;

use crate::HostCapabilities;
use crate::logging::{LoggingHost, level_from_i32};

/// Register every host function `caps` grants.
///
/// - `wasi_snapshot_preview1::*` when `caps.wasi` is set
/// - `env::log` when `caps.guest_log` is set
///
/// # Errors
///
/// Returns an error if the capability set is invalid or registration fails.
pub fn register_all(
    linker: &mut Linker<SandboxContext>,
    caps: &HostCapabilities,
) -> Result<(), RuntimeError> {
    caps.validate()?;

    register_wasi(linker)?;
    if caps.guest_log {
        register_logging(linker)?;
    }

    debug!(guest_log = caps.guest_log, "Host functions registered");
    Ok(())
}

/// Register WASI preview 1.
pub fn register_wasi(linker: &mut Linker<SandboxContext>) -> Result<(), RuntimeError> {
    wasmtime_wasi::preview1::add_to_linker_async(linker, SandboxContext::wasi_mut).map_err(
        |e| RuntimeError::initialization(format!("Failed to register WASI preview 1: {e}")),
    )
}

/// Register `env::log(level: i32, ptr: i32, len: i32)`.
///
/// # Memory Protocol
///
/// The guest passes:
/// - `level`: Log level (0=debug, 1=info, 2=warn, 3=error)
/// - `ptr`: Pointer to the UTF-8 message in its exported `memory`
/// - `len`: Length of the message in bytes
///
/// Bad pointers are logged on the host and the call is ignored.
pub fn register_logging(linker: &mut Linker<SandboxContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, SandboxContext>, level: i32, ptr: i32, len: i32| {
                if ptr < 0 || len < 0 {
                    warn!(ptr, len, "Invalid pointer or length (negative value)");
                    return;
                }

                let Some(memory) = caller
                    .get_export("memory")
                    .and_then(wasmtime::Extern::into_memory)
                else {
                    warn!("Memory export not found in guest module");
                    return;
                };

                #[allow(clippy::cast_sign_loss)]
                let message = {
                    let data = memory.data(&caller);
                    let start = ptr as usize;
                    let Some(end) = start.checked_add(len as usize) else {
                        warn!(ptr, len, "Pointer + length overflow");
                        return;
                    };

                    let Some(bytes) = data.get(start..end) else {
                        warn!(start, end, memory_size = data.len(), "Memory access out of bounds");
                        return;
                    };

                    String::from_utf8_lossy(bytes).into_owned()
                };

                LoggingHost::log(caller.data(), level_from_i32(level), &message);
            },
        )
        .map_err(|e| {
            RuntimeError::initialization(format!("Failed to register log function: {e}"))
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_pool_common::EngineConfig;
    use wasm_pool_core::WasmEngine;

    fn linker() -> Linker<SandboxContext> {
        let engine = WasmEngine::new(&EngineConfig {
            epoch_interruption: false,
            ..Default::default()
        })
        .unwrap();
        Linker::new(engine.inner())
    }

    const LOG_IMPORT: &str = r#"
        (module
            (import "env" "log" (func (param i32 i32 i32)))
            (memory (export "memory") 1)
            (func (export "_start")))
    "#;

    #[test]
    fn test_register_all_minimal() {
        let mut linker = linker();
        assert!(register_all(&mut linker, &HostCapabilities::minimal()).is_ok());

        let module = wasmtime::Module::new(linker.engine(), LOG_IMPORT).unwrap();
        assert!(linker.instantiate_pre(&module).is_err());
    }

    #[test]
    fn test_register_all_with_logging() {
        let mut linker = linker();
        let caps = HostCapabilities::builder().enable_guest_log().build();
        assert!(register_all(&mut linker, &caps).is_ok());

        let module = wasmtime::Module::new(linker.engine(), LOG_IMPORT).unwrap();
        assert!(linker.instantiate_pre(&module).is_ok());
    }

    #[test]
    fn test_register_all_rejects_invalid() {
        let mut linker = linker();
        let caps = HostCapabilities {
            wasi: false,
            ..HostCapabilities::minimal()
        };
        assert!(register_all(&mut linker, &caps).is_err());
    }
}
