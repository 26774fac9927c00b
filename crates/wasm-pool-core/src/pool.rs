//! Concurrency-bounded execution of one sandboxed tool.
//!
//! [`InstancePool`] goes through two states. It starts uninitialized; a
//! successful [`init`](InstancePool::init) compiles the module (through the
//! shared cache), validates its host shim and fixes the concurrency limit.
//! From then on every [`run`](InstancePool::run) waits for one of `max` slots,
//! executes, and gives the slot back on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

use wasm_pool_common::{EngineConfig, ExecutionConfig, RuntimeError};

use crate::args::{OutputCapture, RunArgs};
use crate::{CompilationCache, Instantiator, RunContext, SandboxInstance};

/// A pool running one module with at most `max` concurrent executions.
///
/// # Example
///
/// ```ignore
/// let pool = InstancePool::new(Instantiator::new("ffprobe", WasiHost::default(), FFPROBE_WASM));
/// pool.init(&RunContext::background(), 4).await?;
///
/// let stdout = pool.capture();
/// let args = RunArgs::new(["-show_streams", "/in/file"])
///     .stdout(OutputBinding::Capture(stdout.clone()));
/// let status = pool.run(&RunContext::with_timeout(Duration::from_secs(30)), args).await?;
/// ```
pub struct InstancePool {
    instantiator: Instantiator,
    cache: Option<Arc<CompilationCache>>,
    engine_config: EngineConfig,
    execution: ExecutionConfig,
    state: OnceCell<Ready>,
    active: Arc<AtomicUsize>,
}

/// State of an initialized pool. Never changes once set.
struct Ready {
    max: usize,
    slots: Arc<Semaphore>,
    instance: SandboxInstance,
}

/// Holds a concurrency slot and the active count for one execution.
///
/// Dropping it releases both, whichever way the execution ends.
struct Slot {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Slot {
    fn new(permit: OwnedSemaphorePermit, active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            _permit: permit,
            active,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InstancePool {
    /// Create an uninitialized pool using the process-wide compilation cache.
    pub fn new(instantiator: Instantiator) -> Self {
        Self {
            instantiator,
            cache: None,
            engine_config: EngineConfig::default(),
            execution: ExecutionConfig::default(),
            state: OnceCell::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Use `cache` instead of the process-wide cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<CompilationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Engine configuration used if this pool initializes the process-wide cache.
    #[must_use]
    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Default limits for each run.
    #[must_use]
    pub fn with_execution_config(mut self, config: ExecutionConfig) -> Self {
        self.execution = config;
        self
    }

    /// Prepare the pool for runs.
    ///
    /// Initializes the compilation cache if needed, builds the sandbox instance
    /// (compiling the module at most once per process) and sets the limit.
    ///
    /// Calling `init` on a ready pool is a no-op that returns `Ok`; the first
    /// limit stays in force. Concurrent calls are serialized and `run` never
    /// sees a half-initialized pool. A failed `init` leaves the pool
    /// uninitialized.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::Initialization`] if `max` is zero or above
    ///   [`Semaphore::MAX_PERMITS`], the ctx has already ended, or the host shim
    ///   does not satisfy the module
    /// - [`RuntimeError::CompilationFailed`] if the bytecode does not compile
    #[instrument(skip(self, ctx), fields(module = %self.instantiator.module()))]
    pub async fn init(&self, ctx: &RunContext, max: usize) -> Result<(), RuntimeError> {
        if max == 0 {
            return Err(RuntimeError::initialization(
                "Concurrency limit must be at least 1",
            ));
        }
        if max > Semaphore::MAX_PERMITS {
            return Err(RuntimeError::initialization(format!(
                "Concurrency limit {max} exceeds the maximum of {}",
                Semaphore::MAX_PERMITS
            )));
        }

        if let Some(ready) = self.state.get() {
            if ready.max != max {
                warn!(
                    current = ready.max,
                    requested = max,
                    "Pool already initialized, keeping current limit"
                );
            }
            return Ok(());
        }

        if let Some(reason) = ctx.err() {
            return Err(RuntimeError::initialization(format!(
                "Initialization aborted: {reason}"
            )));
        }

        self.state
            .get_or_try_init(|| async {
                let cache = match &self.cache {
                    Some(cache) => Arc::clone(cache),
                    None => CompilationCache::init_global(&self.engine_config)?,
                };

                let instance = self.instantiator.build(&cache).await?;

                info!(max, "Instance pool ready");

                Ok::<_, RuntimeError>(Ready {
                    max,
                    slots: Arc::new(Semaphore::new(max)),
                    instance,
                })
            })
            .await?;

        Ok(())
    }

    /// Run the tool once with `args`.
    ///
    /// Waits for a free slot unless `ctx` ends first. Waiters are served in
    /// arrival order.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::PoolNotInitialized`] before a successful `init`
    /// - [`RuntimeError::AcquireCancelled`] if `ctx` ended before a slot freed up;
    ///   no slot is taken
    /// - a sandbox fault if the tool trapped, hit a limit or was aborted; the
    ///   pool remains usable
    #[instrument(skip_all, fields(module = %self.instantiator.module()))]
    pub async fn run(&self, ctx: &RunContext, args: RunArgs) -> Result<u32, RuntimeError> {
        let ready = self.ready()?;

        let slot = self.acquire(ready, ctx).await?;
        debug!(active = self.active(), max = ready.max, "Slot acquired");

        let result = ready.instance.run(ctx, &args, &self.execution).await;

        drop(slot);
        debug!(active = self.active(), "Slot released");

        result
    }

    async fn acquire(&self, ready: &Ready, ctx: &RunContext) -> Result<Slot, RuntimeError> {
        if let Some(reason) = ctx.err() {
            return Err(RuntimeError::AcquireCancelled { reason });
        }

        let permit = tokio::select! {
            biased;
            reason = ctx.done() => return Err(RuntimeError::AcquireCancelled { reason }),
            permit = Arc::clone(&ready.slots).acquire_owned() => permit.map_err(|_| {
                RuntimeError::initialization("Instance pool semaphore closed")
            })?,
        };

        Ok(Slot::new(permit, Arc::clone(&self.active)))
    }

    fn ready(&self) -> Result<&Ready, RuntimeError> {
        self.state
            .get()
            .ok_or_else(|| RuntimeError::PoolNotInitialized {
                module: self.instantiator.module().to_string(),
            })
    }

    /// Create an output buffer sized by the execution config.
    pub fn capture(&self) -> OutputCapture {
        OutputCapture::new(self.execution.max_output_bytes)
    }

    /// Module name.
    pub fn module(&self) -> &str {
        self.instantiator.module()
    }

    /// Returns `true` once `init` has succeeded.
    pub fn is_ready(&self) -> bool {
        self.state.initialized()
    }

    /// The concurrency limit, or `None` before `init`.
    pub fn max(&self) -> Option<usize> {
        self.state.get().map(|r| r.max)
    }

    /// Number of executions currently holding a slot.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of free slots, or `None` before `init`.
    pub fn available(&self) -> Option<usize> {
        self.state.get().map(|r| r.slots.available_permits())
    }
}

impl std::fmt::Debug for InstancePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstancePool")
            .field("module", &self.module())
            .field("max", &self.max())
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}
