//! Error types for wasm-pool.
//!
//! [`RuntimeError`] covers the whole lifecycle of a pooled execution. Variants
//! fall into three families:
//!
//! - **Fatal**: [`RuntimeError::Initialization`],
//!   [`RuntimeError::CompilationFailed`], [`RuntimeError::PoolNotInitialized`] and
//!   [`RuntimeError::InvalidConfig`]. They indicate a broken build artifact or
//!   host setup and should abort startup of the dependent subsystem.
//! - **Cancellation**: [`RuntimeError::AcquireCancelled`] and
//!   [`RuntimeError::ExecutionCancelled`]. The caller's context ended, before or
//!   after a concurrency slot was taken.
//! - **Sandbox faults**: traps, resource-limit violations and aborted executions.
//!   They are isolated to one run; the pool stays usable.

use thiserror::Error;

/// Exit status reported alongside any error returned by a run.
///
/// The numeric status of a failed run carries no meaning; callers must inspect
/// the error. Zero is used because it is what a run that never reached
/// `proc_exit` reports.
pub const FAULT_EXIT_CODE: u32 = 0;

/// Why a caller stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The context was cancelled explicitly.
    Cancelled,
    /// The context deadline passed.
    DeadlineExceeded,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "context cancelled"),
            CancelReason::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// Top-level runtime errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Pool or instantiator setup failed (invalid limit, host shim
    /// registration, unsatisfied imports, missing entry point).
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Description of the failure.
        reason: String,
    },

    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// The pool was used before a successful `init`.
    #[error("Instance pool for '{module}' is not initialized")]
    PoolNotInitialized {
        /// Module the pool runs.
        module: String,
    },

    /// The context ended while waiting for a concurrency slot.
    #[error("Slot acquisition aborted: {reason}")]
    AcquireCancelled {
        /// Why the wait ended.
        reason: CancelReason,
    },

    /// A fresh instance could not be created for this run.
    #[error("Instantiation failed: {reason}")]
    InstantiationFailed {
        /// Description of the failure.
        reason: String,
    },

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },

    /// Execution exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// Linear memory growth exceeded the configured limit.
    #[error("Memory limit exceeded: {limit_bytes} bytes")]
    MemoryLimitExceeded {
        /// The memory limit in bytes.
        limit_bytes: usize,
    },

    /// Execution exceeded the configured timeout.
    #[error("Execution timeout after {duration_ms}ms")]
    ExecutionTimeout {
        /// The timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// The context ended while the tool was running.
    #[error("Execution aborted: {reason}")]
    ExecutionCancelled {
        /// Why execution was aborted.
        reason: CancelReason,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `Initialization` error.
    pub fn initialization(reason: impl Into<String>) -> Self {
        Self::Initialization {
            reason: reason.into(),
        }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiationFailed` error.
    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::InstantiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Trap {
            message: message.into(),
            code,
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors that indicate a broken setup and must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Initialization { .. }
                | Self::CompilationFailed { .. }
                | Self::PoolNotInitialized { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// Returns `true` if the caller's context ended, while waiting for a slot
    /// or while the tool was running.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::AcquireCancelled { .. } | Self::ExecutionCancelled { .. }
        )
    }

    /// Returns `true` if the sandboxed tool itself failed.
    ///
    /// These errors are contained to a single run.
    pub fn is_sandbox_fault(&self) -> bool {
        matches!(
            self,
            Self::InstantiationFailed { .. }
                | Self::Trap { .. }
                | Self::FuelExhausted
                | Self::MemoryLimitExceeded { .. }
                | Self::ExecutionTimeout { .. }
                | Self::ExecutionCancelled { .. }
        )
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            Self::FuelExhausted | Self::MemoryLimitExceeded { .. } | Self::ExecutionTimeout { .. }
        )
    }

    /// The exit status reported for a run that ended with this error.
    pub fn exit_code(&self) -> u32 {
        FAULT_EXIT_CODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::compilation_failed("bad magic");
        assert_eq!(err.to_string(), "Compilation failed: bad magic");

        let err = RuntimeError::FuelExhausted;
        assert_eq!(err.to_string(), "Fuel exhausted: CPU limit exceeded");

        let err = RuntimeError::AcquireCancelled {
            reason: CancelReason::DeadlineExceeded,
        };
        assert_eq!(
            err.to_string(),
            "Slot acquisition aborted: context deadline exceeded"
        );
    }

    #[test]
    fn test_is_fatal() {
        assert!(RuntimeError::initialization("max must be >= 1").is_fatal());
        assert!(RuntimeError::compilation_failed("x").is_fatal());
        assert!(
            RuntimeError::PoolNotInitialized {
                module: "ffmpeg".into()
            }
            .is_fatal()
        );
        assert!(RuntimeError::invalid_config("fuel").is_fatal());
        assert!(!RuntimeError::FuelExhausted.is_fatal());
        assert!(
            !RuntimeError::AcquireCancelled {
                reason: CancelReason::Cancelled
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_is_sandbox_fault() {
        assert!(RuntimeError::trap("unreachable", None).is_sandbox_fault());
        assert!(RuntimeError::FuelExhausted.is_sandbox_fault());
        assert!(RuntimeError::instantiation_failed("oom").is_sandbox_fault());
        assert!(
            RuntimeError::ExecutionCancelled {
                reason: CancelReason::Cancelled
            }
            .is_sandbox_fault()
        );
        assert!(!RuntimeError::initialization("x").is_sandbox_fault());
        assert!(
            !RuntimeError::PoolNotInitialized {
                module: "ffmpeg".into()
            }
            .is_sandbox_fault()
        );
    }

    #[test]
    fn test_is_resource_limit() {
        assert!(RuntimeError::FuelExhausted.is_resource_limit());
        assert!(RuntimeError::MemoryLimitExceeded { limit_bytes: 1024 }.is_resource_limit());
        assert!(RuntimeError::ExecutionTimeout { duration_ms: 100 }.is_resource_limit());
        assert!(!RuntimeError::trap("x", None).is_resource_limit());
    }

    #[test]
    fn test_is_cancelled() {
        let err = RuntimeError::AcquireCancelled {
            reason: CancelReason::Cancelled,
        };
        assert!(err.is_cancelled());

        let err = RuntimeError::ExecutionCancelled {
            reason: CancelReason::Cancelled,
        };
        assert!(err.is_cancelled());
        assert!(err.is_sandbox_fault());

        assert!(!RuntimeError::FuelExhausted.is_cancelled());
        assert!(!RuntimeError::ExecutionTimeout { duration_ms: 10 }.is_cancelled());
    }

    #[test]
    fn test_exit_code_is_sentinel() {
        assert_eq!(RuntimeError::FuelExhausted.exit_code(), FAULT_EXIT_CODE);
        assert_eq!(
            RuntimeError::trap("x", None).exit_code(),
            FAULT_EXIT_CODE
        );
    }
}
