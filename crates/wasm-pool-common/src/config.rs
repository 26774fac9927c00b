//! Configuration structures for wasm-pool.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings shared by every cached module
//! - [`ExecutionConfig`]: Default per-run limits (fuel, memory, timeout, output)
//! - [`PoolConfig`]: Concurrency limit for instance pools

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-run execution defaults.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Instance pool defaults.
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Wasmtime engine configuration.
///
/// The engine is owned by the compilation cache, so these settings are fixed by
/// whichever caller initializes the cache first.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for instance creation.
    ///
    /// Pooling reserves virtual memory for `max_instances` slots up front.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the allocator pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per allocator slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable fuel metering.
    ///
    /// When enabled, every store receives `ExecutionConfig::max_fuel` units.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Enable epoch-based interruption.
    ///
    /// Required for timeouts and cancellation to preempt guest code that never
    /// calls into the host.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,

    /// Interval between epoch ticks in milliseconds.
    #[serde(default = "defaults::epoch_tick_ms")]
    pub epoch_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            fuel_metering: defaults::fuel_metering(),
            epoch_interruption: defaults::epoch_interruption(),
            epoch_tick_ms: defaults::epoch_tick_ms(),
        }
    }
}

impl EngineConfig {
    /// Get the epoch tick interval as a `Duration`.
    pub fn epoch_tick(&self) -> Duration {
        Duration::from_millis(self.epoch_tick_ms.max(1))
    }
}

/// Per-run execution defaults.
///
/// Individual runs may override any of these through `ResourceLimits`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per run.
    ///
    /// Ignored unless `EngineConfig::fuel_metering` is enabled.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Execution timeout in milliseconds, `0` for no timeout.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum linear memory in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// Capacity of each captured output stream in bytes.
    ///
    /// Output past the capacity is truncated and the guest's write fails with
    /// `EIO`; the run is not aborted.
    #[serde(default = "defaults::max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            timeout_ms: defaults::timeout_ms(),
            max_memory_mb: defaults::max_memory_mb(),
            max_output_bytes: defaults::max_output_bytes(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`, or `None` when unlimited.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Get the memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Instance pool defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Maximum number of concurrently executing instances per pool.
    #[serde(default = "defaults::max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: defaults::max_concurrency(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        64
    }

    pub const fn instance_memory_mb() -> u32 {
        256
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn epoch_tick_ms() -> u64 {
        1
    }

    pub const fn max_fuel() -> u64 {
        10_000_000_000
    }

    pub const fn timeout_ms() -> u64 {
        0
    }

    pub const fn max_memory_mb() -> u32 {
        256
    }

    pub const fn max_output_bytes() -> usize {
        4 * 1024 * 1024
    }

    pub const fn max_concurrency() -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(!config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 64);
        assert!(config.engine.fuel_metering);
        assert!(config.engine.epoch_interruption);
        assert_eq!(config.engine.epoch_tick_ms, 1);

        assert_eq!(config.execution.max_fuel, 10_000_000_000);
        assert_eq!(config.execution.timeout_ms, 0);
        assert_eq!(config.execution.max_memory_mb, 256);
        assert_eq!(config.pool.max_concurrency, 1);
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.engine, deserialized.engine);
        assert_eq!(config.execution.max_fuel, deserialized.execution.max_fuel);
    }

    #[test]
    fn test_execution_timeout() {
        let config = ExecutionConfig {
            timeout_ms: 500,
            ..Default::default()
        };
        assert_eq!(config.timeout(), Some(Duration::from_millis(500)));

        let unlimited = ExecutionConfig::default();
        assert_eq!(unlimited.timeout(), None);
    }

    #[test]
    fn test_memory_bytes() {
        let config = ExecutionConfig {
            max_memory_mb: 2,
            ..Default::default()
        };
        assert_eq!(config.max_memory_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_epoch_tick_never_zero() {
        let config = EngineConfig {
            epoch_tick_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.epoch_tick(), Duration::from_millis(1));
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"pool": {"max_concurrency": 4}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.pool.max_concurrency, 4);
        assert!(config.engine.epoch_interruption);
        assert_eq!(config.execution.max_output_bytes, 4 * 1024 * 1024);
    }
}
