//! Sandbox instance execution.
//!
//! A [`SandboxInstance`] is a module that has been compiled, linked against its
//! host shim and pre-instantiated. Every [`run`](SandboxInstance::run):
//!
//! 1. Builds a fresh WASI context and store from the run request
//! 2. Instantiates the module into that store
//! 3. Calls the `_start` command, racing it against cancellation and timeout
//! 4. Maps the outcome to an exit status or a sandbox fault

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use wasmtime::{InstancePre, Store, Trap};
use wasmtime_wasi::I32Exit;

use wasm_pool_common::{ExecutionConfig, RuntimeError};

use crate::args::{EffectiveLimits, RunArgs};
use crate::module::ENTRY_POINT;
use crate::store::{
    MemoryLimitHit, SandboxContext, calculate_fuel_consumed, create_store, get_remaining_fuel,
};
use crate::{CompiledModule, HostEnvironment, RunContext, WasmEngine};

/// A module ready to run any number of times.
///
/// # Thread Safety
///
/// `SandboxInstance` holds no per-run state and can be shared across tasks.
/// Each run uses its own [`Store`], so a fault in one run cannot affect another.
pub struct SandboxInstance {
    module: Arc<str>,
    host: Arc<dyn HostEnvironment>,
    engine: WasmEngine,
    compiled: Arc<CompiledModule>,
    pre: InstancePre<SandboxContext>,
}

impl SandboxInstance {
    pub(crate) fn new(
        module: Arc<str>,
        host: Arc<dyn HostEnvironment>,
        engine: WasmEngine,
        compiled: Arc<CompiledModule>,
        pre: InstancePre<SandboxContext>,
    ) -> Self {
        Self {
            module,
            host,
            engine,
            compiled,
            pre,
        }
    }

    /// Module name.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The compiled module this instance runs.
    pub fn compiled(&self) -> &CompiledModule {
        &self.compiled
    }

    /// Run the module once.
    ///
    /// Returns the tool's exit status: the value passed to `proc_exit`, or `0`
    /// when `_start` returns normally.
    ///
    /// If `ctx` ends or the timeout passes while the guest runs, the execution
    /// is abandoned at its next yield point (every epoch tick when epoch
    /// interruption is enabled, otherwise only at host calls).
    ///
    /// # Errors
    ///
    /// Returns a sandbox fault (see [`RuntimeError::is_sandbox_fault`]) if the
    /// guest traps, exceeds a limit, or is aborted.
    #[instrument(skip_all, fields(module = %self.module, request_id = tracing::field::Empty))]
    pub async fn run(
        &self,
        ctx: &RunContext,
        args: &RunArgs,
        defaults: &ExecutionConfig,
    ) -> Result<u32, RuntimeError> {
        let limits = args.limits.resolve(defaults);
        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());

        let mut wasi = self.host.build_config();
        args.apply(&self.module, &mut wasi);
        let context = SandboxContext::new(request_id, wasi.build_p1(), limits.max_memory_bytes);

        let mut store = create_store(&self.engine, context, &limits)?;
        let initial_fuel = get_remaining_fuel(&store).unwrap_or(0);
        let start = Instant::now();

        debug!(argc = args.args.len() + 1, "Starting execution");

        let result = tokio::select! {
            biased;
            reason = ctx.done() => Err(RuntimeError::ExecutionCancelled { reason }),
            result = self.execute_with_timeout(&mut store, &limits) => result,
        };

        let fuel_consumed = calculate_fuel_consumed(initial_fuel, &store);
        let duration = start.elapsed();

        match &result {
            Ok(code) => info!(
                exit_code = code,
                duration_ms = duration.as_millis(),
                fuel_consumed,
                "Execution completed"
            ),
            Err(e) => warn!(
                error = %e,
                duration_ms = duration.as_millis(),
                fuel_consumed,
                "Execution faulted"
            ),
        }

        result
    }

    async fn execute_with_timeout(
        &self,
        store: &mut Store<SandboxContext>,
        limits: &EffectiveLimits,
    ) -> Result<u32, RuntimeError> {
        let Some(timeout) = limits.timeout else {
            return self.execute(store, limits).await;
        };

        tokio::time::timeout(timeout, self.execute(store, limits))
            .await
            .unwrap_or_else(|_| Err(timeout_error(timeout)))
    }

    async fn execute(
        &self,
        store: &mut Store<SandboxContext>,
        limits: &EffectiveLimits,
    ) -> Result<u32, RuntimeError> {
        let instance = self
            .pre
            .instantiate_async(&mut *store)
            .await
            .map_err(|e| match classify_fault(&e, limits) {
                RuntimeError::Trap { message, .. } => RuntimeError::instantiation_failed(message),
                other => other,
            })?;

        let func = instance
            .get_typed_func::<(), ()>(&mut *store, ENTRY_POINT)
            .map_err(|e| RuntimeError::instantiation_failed(format!("{ENTRY_POINT}: {e}")))?;

        match func.call_async(&mut *store, ()).await {
            Ok(()) => Ok(0),
            Err(e) => match exit_status(&e) {
                Some(code) => Ok(code),
                None => Err(classify_fault(&e, limits)),
            },
        }
    }
}

/// The status passed to `proc_exit`, if that is how the guest stopped.
#[allow(clippy::cast_sign_loss)]
fn exit_status(error: &wasmtime::Error) -> Option<u32> {
    error.downcast_ref::<I32Exit>().map(|exit| exit.0 as u32)
}

/// Map an execution error to the matching sandbox fault.
fn classify_fault(error: &wasmtime::Error, limits: &EffectiveLimits) -> RuntimeError {
    if error.downcast_ref::<MemoryLimitHit>().is_some() {
        return RuntimeError::MemoryLimitExceeded {
            limit_bytes: limits.max_memory_bytes,
        };
    }

    let trap = error.downcast_ref::<Trap>();
    if trap.is_some_and(|t| *t == Trap::OutOfFuel) {
        return RuntimeError::FuelExhausted;
    }

    RuntimeError::trap(format!("{error:#}"), trap.map(|t| format!("{t:?}")))
}

#[allow(clippy::cast_possible_truncation)]
fn timeout_error(timeout: Duration) -> RuntimeError {
    RuntimeError::ExecutionTimeout {
        duration_ms: timeout.as_millis() as u64,
    }
}

impl std::fmt::Debug for SandboxInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxInstance")
            .field("module", &self.module)
            .field("compiled", &self.compiled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> EffectiveLimits {
        EffectiveLimits {
            max_fuel: 1000,
            timeout: None,
            max_memory_bytes: 65536,
        }
    }

    #[test]
    fn test_exit_status() {
        let err = wasmtime::Error::new(I32Exit(3));
        assert_eq!(exit_status(&err), Some(3));

        let err = wasmtime::Error::new(Trap::UnreachableCodeReached);
        assert_eq!(exit_status(&err), None);
    }

    #[test]
    fn test_classify_out_of_fuel() {
        let err = wasmtime::Error::new(Trap::OutOfFuel);
        assert!(matches!(
            classify_fault(&err, &limits()),
            RuntimeError::FuelExhausted
        ));
    }

    #[test]
    fn test_classify_memory_limit() {
        let err = wasmtime::Error::new(MemoryLimitHit {
            desired: 131_072,
            limit: 65536,
        });
        assert!(matches!(
            classify_fault(&err, &limits()),
            RuntimeError::MemoryLimitExceeded { limit_bytes: 65536 }
        ));
    }

    #[test]
    fn test_classify_trap() {
        let err = wasmtime::Error::new(Trap::MemoryOutOfBounds);
        let fault = classify_fault(&err, &limits());

        assert!(fault.is_sandbox_fault());
        assert!(matches!(
            fault,
            RuntimeError::Trap { code: Some(ref c), .. } if c == "MemoryOutOfBounds"
        ));
    }

    #[test]
    fn test_timeout_error() {
        let err = timeout_error(Duration::from_millis(250));
        assert!(matches!(
            err,
            RuntimeError::ExecutionTimeout { duration_ms: 250 }
        ));
    }
}
