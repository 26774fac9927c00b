//! Descriptors for building sandbox instances.
//!
//! An [`Instantiator`] says how to build a sandbox for one module: its name,
//! the [`HostEnvironment`] that wires host capabilities and per-run WASI
//! configuration, and the raw bytecode. It never changes after construction
//! and is shared by reference across every run of a pool.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, instrument};
use wasmtime::Linker;
use wasmtime_wasi::WasiCtxBuilder;

use wasm_pool_common::RuntimeError;

use crate::module::ENTRY_POINT;
use crate::store::SandboxContext;
use crate::{CompilationCache, SandboxInstance};

/// Host side of a sandbox: the capability shim and per-run configuration.
///
/// Implementations must be deterministic. Registration failures are treated
/// as fatal setup errors because they cannot differ between runs.
pub trait HostEnvironment: Send + Sync + 'static {
    /// Register every host function the module may import.
    fn build_runtime(&self, linker: &mut Linker<SandboxContext>) -> Result<(), RuntimeError>;

    /// Start a fresh WASI configuration for one run.
    ///
    /// The pool adds argv and stdio bindings on top of whatever this returns.
    fn build_config(&self) -> WasiCtxBuilder {
        WasiCtxBuilder::new()
    }
}

/// Immutable recipe for building a [`SandboxInstance`].
#[derive(Clone)]
pub struct Instantiator {
    module: Arc<str>,
    host: Arc<dyn HostEnvironment>,
    source: Bytes,
}

impl Instantiator {
    /// Create an instantiator for `source`, exposing `host` to the guest.
    ///
    /// `module` is used in logs and as the guest's `argv[0]`.
    pub fn new(
        module: impl Into<Arc<str>>,
        host: impl HostEnvironment,
        source: impl Into<Bytes>,
    ) -> Self {
        Self {
            module: module.into(),
            host: Arc::new(host),
            source: source.into(),
        }
    }

    /// Module name.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Raw bytecode.
    pub fn source(&self) -> &Bytes {
        &self.source
    }

    /// Build a ready sandbox instance.
    ///
    /// Fetches (or compiles once) the module through `cache`, registers the
    /// host shim on a fresh linker and pre-instantiates, which checks every
    /// import up front.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::CompilationFailed`] if the bytecode does not compile
    /// - [`RuntimeError::Initialization`] if host registration fails, an import
    ///   is unsatisfied or the module has no `_start` command
    #[instrument(skip(self, cache), fields(module = %self.module))]
    pub async fn build(&self, cache: &CompilationCache) -> Result<SandboxInstance, RuntimeError> {
        let compiled = cache.get_or_compile(&self.source).await?;

        if !compiled.exports_command(ENTRY_POINT) {
            return Err(RuntimeError::initialization(format!(
                "Module '{}' does not export a '{ENTRY_POINT}' command",
                self.module
            )));
        }

        let mut linker = Linker::new(cache.engine().inner());
        self.host.build_runtime(&mut linker).map_err(|e| {
            RuntimeError::initialization(format!(
                "Host shim registration failed for '{}': {e}",
                self.module
            ))
        })?;

        let pre = linker
            .instantiate_pre(compiled.as_module())
            .map_err(|e| {
                RuntimeError::initialization(format!(
                    "Module '{}' imports are not satisfied by the host shim: {e}",
                    self.module
                ))
            })?;

        info!(
            content_hash = %compiled.content_hash(),
            imports = compiled.imports().len(),
            "Sandbox instance ready"
        );

        Ok(SandboxInstance::new(
            Arc::clone(&self.module),
            Arc::clone(&self.host),
            cache.engine().clone(),
            compiled,
            pre,
        ))
    }
}

impl std::fmt::Debug for Instantiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instantiator")
            .field("module", &self.module)
            .field("source_len", &self.source.len())
            .finish_non_exhaustive()
    }
}
