//! Process-wide compilation cache.
//!
//! [`CompilationCache`] owns the [`WasmEngine`] and maps bytecode identity
//! (content hash) to the compiled module. Each distinct bytecode is compiled at
//! most once: concurrent callers for the same hash wait on a per-key cell while
//! callers for other hashes proceed independently.
//!
//! A single shared instance is available through [`CompilationCache::init_global`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use wasm_pool_common::{EngineConfig, RuntimeError};

use crate::module::content_hash;
use crate::{CompiledModule, WasmEngine};

static GLOBAL_CACHE: OnceLock<Result<Arc<CompilationCache>, String>> = OnceLock::new();

/// Compiled module store keyed by content hash.
///
/// Entries are never evicted; the set of embedded tools is small and fixed.
pub struct CompilationCache {
    engine: WasmEngine,
    entries: DashMap<String, Arc<OnceCell<Arc<CompiledModule>>>>,
    compilations: AtomicU64,
}

impl CompilationCache {
    /// Create a cache with its own engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created.
    pub fn new(config: &EngineConfig) -> Result<Self, RuntimeError> {
        Ok(Self::with_engine(WasmEngine::new(config)?))
    }

    /// Create a cache around an existing engine.
    pub fn with_engine(engine: WasmEngine) -> Self {
        Self {
            engine,
            entries: DashMap::new(),
            compilations: AtomicU64::new(0),
        }
    }

    /// Initialize the process-wide cache, or return it if already initialized.
    ///
    /// The configuration of the first call wins; later calls ignore theirs. A
    /// failed first initialization is remembered and reported to every caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine could not be created.
    pub fn init_global(config: &EngineConfig) -> Result<Arc<Self>, RuntimeError> {
        let cache = GLOBAL_CACHE.get_or_init(|| {
            info!("Initializing global compilation cache");
            Self::new(config)
                .map(Arc::new)
                .map_err(|e| e.to_string())
        });

        match cache {
            Ok(cache) => {
                if cache.engine.config() != config {
                    debug!("Global compilation cache already initialized with another engine config");
                }
                Ok(Arc::clone(cache))
            }
            Err(reason) => Err(RuntimeError::initialization(format!(
                "Global compilation cache unavailable: {reason}"
            ))),
        }
    }

    /// The process-wide cache, if [`init_global`](Self::init_global) succeeded.
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL_CACHE.get().and_then(|c| c.as_ref().ok()).cloned()
    }

    /// Return the compiled module for `bytes`, compiling it on first use.
    ///
    /// Compilation runs on the blocking thread pool. A failure is not cached:
    /// the next waiting caller for the same bytes retries the compilation.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::CompilationFailed`] if the bytes do not compile.
    #[instrument(skip(self, bytes), fields(bytes_len = bytes.len()))]
    pub async fn get_or_compile(&self, bytes: &Bytes) -> Result<Arc<CompiledModule>, RuntimeError> {
        let hash = content_hash(bytes);

        let cell = self
            .entries
            .entry(hash.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(module) = cell.get() {
            debug!(content_hash = %hash, "Compilation cache hit");
            return Ok(Arc::clone(module));
        }

        let module = cell
            .get_or_try_init(|| async {
                debug!(content_hash = %hash, "Compilation cache miss");
                self.compilations.fetch_add(1, Ordering::Relaxed);

                let engine = self.engine.inner().clone();
                let bytes = bytes.clone();
                let hash = hash.clone();
                let compiled = tokio::task::spawn_blocking(move || {
                    CompiledModule::from_bytes(&engine, &bytes, hash)
                })
                .await
                .map_err(|e| {
                    RuntimeError::compilation_failed(format!("Compilation task failed: {e}"))
                })??;
                Ok::<_, RuntimeError>(Arc::new(compiled))
            })
            .await?;

        Ok(Arc::clone(module))
    }

    /// Returns `true` if `bytes` have already been compiled.
    pub fn contains(&self, bytes: &[u8]) -> bool {
        self.entries
            .get(&content_hash(bytes))
            .is_some_and(|cell| cell.initialized())
    }

    /// Number of compile steps executed, including failed ones.
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Number of compiled modules held.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().initialized()).count()
    }

    /// Returns `true` if nothing has been compiled yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The engine every cached module belongs to.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }
}

impl std::fmt::Debug for CompilationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationCache")
            .field("modules", &self.len())
            .field("compilations", &self.compilations())
            .finish_non_exhaustive()
    }
}
