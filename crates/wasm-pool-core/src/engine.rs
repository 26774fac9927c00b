//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the runtime. It is:
//! - Thread-safe and shared by every module compiled through the cache
//! - Configured for async execution so runs can be raced against cancellation
//! - Set up with fuel metering and epoch interruption for resource limiting

use std::sync::Arc;
use std::thread;

use tracing::{debug, info};
use wasmtime::{Config, Engine, EngineWeak, InstanceAllocationStrategy, PoolingAllocationConfig};

use wasm_pool_common::{EngineConfig, RuntimeError};

/// Thread-safe WebAssembly engine wrapper.
///
/// Compiled modules are only valid for the engine that compiled them, so one
/// engine is owned by each compilation cache and shared by every pool using it.
///
/// # Configuration
///
/// The engine is configured with:
/// - **Async Support**: Executions are futures that can be dropped mid-flight
/// - **Fuel Metering**: Deterministic CPU limiting (optional)
/// - **Epoch Interruption**: A background ticker advances the epoch so running
///   guests periodically yield back to the executor (optional)
/// - **Pooling Allocator**: Pre-reserved instance slots (optional)
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// When epoch interruption is enabled this also starts the epoch ticker
    /// thread, which exits once the last clone of the engine is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is invalid or the ticker
    /// thread cannot be spawned.
    pub fn new(config: &EngineConfig) -> Result<Self, RuntimeError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.async_support(true);
        wasmtime_config.consume_fuel(config.fuel_metering);
        wasmtime_config.epoch_interruption(config.epoch_interruption);
        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        if config.epoch_interruption {
            spawn_epoch_ticker(engine.weak(), config)?;
        }

        info!(
            fuel_metering = config.fuel_metering,
            epoch_interruption = config.epoch_interruption,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check if the pooling allocator is enabled.
    pub fn is_pooling_enabled(&self) -> bool {
        self.config.pooling_allocator
    }
}

/// Advance the engine epoch every `epoch_tick_ms` until the engine is gone.
fn spawn_epoch_ticker(engine: EngineWeak, config: &EngineConfig) -> Result<(), RuntimeError> {
    let tick = config.epoch_tick();

    thread::Builder::new()
        .name("wasm-pool-epoch".into())
        .spawn(move || {
            loop {
                thread::sleep(tick);
                let Some(engine) = engine.upgrade() else {
                    debug!("Engine dropped, epoch ticker exiting");
                    break;
                };
                engine.increment_epoch();
            }
        })
        .map_err(|e| RuntimeError::invalid_config(format!("Failed to spawn epoch ticker: {e}")))?;

    Ok(())
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("fuel_metering", &self.config.fuel_metering)
            .field("epoch_interruption", &self.config.epoch_interruption)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation_default() {
        let config = EngineConfig::default();
        let engine = WasmEngine::new(&config).unwrap();

        assert!(!engine.is_pooling_enabled());
        assert!(engine.config().epoch_interruption);
    }

    #[test]
    fn test_engine_creation_pooling() {
        let config = EngineConfig {
            pooling_allocator: true,
            max_instances: 4,
            instance_memory_mb: 16,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();
        assert!(engine.is_pooling_enabled());
    }

    #[test]
    fn test_engine_without_epochs() {
        let config = EngineConfig {
            epoch_interruption: false,
            fuel_metering: false,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();
        assert!(!engine.config().epoch_interruption);
    }

    #[test]
    fn test_engine_debug() {
        let config = EngineConfig::default();
        let engine = WasmEngine::new(&config).unwrap();

        let debug_str = format!("{engine:?}");
        assert!(debug_str.contains("WasmEngine"));
        assert!(debug_str.contains("epoch_interruption"));
    }
}
