//! Sandboxed, concurrency-bounded execution of WebAssembly tools.
//!
//! This crate runs command-style WebAssembly modules (WASI preview 1) inside
//! isolated Wasmtime stores instead of native processes:
//! - [`CompilationCache`]: Process-wide compiled module store, one compile per bytecode
//! - [`Instantiator`]: Immutable recipe for a sandbox (name, host shim, bytecode)
//! - [`SandboxInstance`]: A linked, pre-instantiated module, run once per request
//! - [`InstancePool`]: Concurrency limit and cancellation around a sandbox
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompilationCache                      │
//! │  (Process-wide, thread-safe)                            │
//! │  - WasmEngine + epoch ticker                            │
//! │  - content hash -> CompiledModule                       │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │           InstancePool (one per tool)                   │
//! │  - Semaphore with `max` slots                           │
//! │  - SandboxInstance built from an Instantiator           │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<SandboxContext> + Instance             │
//! │  (Per-run, isolated)                                    │
//! │  - WASI argv / stdio / clocks                           │
//! │  - Fuel, memory and time limits                         │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod args;
pub mod cache;
pub mod context;
pub mod engine;
pub mod instance;
pub mod instantiator;
pub mod module;
pub mod pool;
pub mod store;

pub use args::{InputBinding, OutputBinding, OutputCapture, ResourceLimits, RunArgs};
pub use cache::CompilationCache;
pub use context::{CancelHandle, RunContext};
pub use engine::WasmEngine;
pub use instance::SandboxInstance;
pub use instantiator::{HostEnvironment, Instantiator};
pub use module::CompiledModule;
pub use pool::InstancePool;
pub use store::{LogLevel, SandboxContext};
