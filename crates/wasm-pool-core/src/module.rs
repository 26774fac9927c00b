//! WebAssembly module compilation.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's [`Module`]
//! carrying the content hash that identifies its bytecode. Modules are normally
//! obtained through [`CompilationCache`](crate::CompilationCache) rather than
//! compiled directly.

use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{info, instrument};
use wasmtime::{Engine, ExternType, Module};

use wasm_pool_common::RuntimeError;

/// Name of the WASI command entry point.
pub const ENTRY_POINT: &str = "_start";

/// A compiled WebAssembly module.
///
/// # Thread Safety
///
/// `CompiledModule` is thread-safe and can be shared across any number of
/// concurrent instances; each instantiation gets its own store.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Module,

    /// SHA-256 of the source Wasm bytes, hex encoded.
    content_hash: String,
}

impl CompiledModule {
    /// Compile a core module from WebAssembly bytes.
    ///
    /// `content_hash` must be [`content_hash`]`(bytes)`; callers that key a
    /// cache by it pass the value they already computed.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a WebAssembly binary or fail to
    /// compile for this engine.
    #[instrument(skip(engine, bytes, content_hash), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(
        engine: &Engine,
        bytes: &[u8],
        content_hash: String,
    ) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::from_binary(engine, bytes).map_err(|e| {
            RuntimeError::compilation_failed(format!("Core module compilation failed: {e}"))
        })?;

        let duration = start.elapsed();

        info!(
            content_hash = %content_hash,
            duration_ms = duration.as_millis(),
            "Core module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
        })
    }

    /// Get the content hash of the source Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get the inner Wasmtime module.
    pub fn as_module(&self) -> &Module {
        &self.inner
    }

    /// Returns `true` if the module exports a `() -> ()` function named `name`.
    pub fn exports_command(&self, name: &str) -> bool {
        match self.inner.get_export(name) {
            Some(ExternType::Func(ty)) => ty.params().len() == 0 && ty.results().len() == 0,
            _ => false,
        }
    }

    /// Names of all imports as `module::name`.
    pub fn imports(&self) -> Vec<String> {
        self.inner
            .imports()
            .map(|i| format!("{}::{}", i.module(), i.name()))
            .collect()
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: file too small",
            ));
        }

        if &bytes[0..4] != b"\0asm" {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: bad magic number",
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute the identity of a bytecode blob.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WasmEngine;
    use wasm_pool_common::EngineConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig {
            epoch_interruption: false,
            ..Default::default()
        })
        .unwrap()
    }

    fn compile(engine: &WasmEngine, bytes: &[u8]) -> Result<CompiledModule, RuntimeError> {
        CompiledModule::from_bytes(engine.inner(), bytes, content_hash(bytes))
    }

    #[test]
    fn test_validate_wasm_header_valid() {
        assert!(CompiledModule::validate_wasm_header(MINIMAL_WASM).is_ok());
    }

    #[test]
    fn test_validate_wasm_header_too_small() {
        let result = CompiledModule::validate_wasm_header(&[0x00, 0x61]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_wasm_header_bad_magic() {
        let bad_wasm = &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        let result = CompiledModule::validate_wasm_header(bad_wasm);
        assert!(result.is_err());
    }

    #[test]
    fn test_content_hash() {
        let hash1 = content_hash(b"hello");
        let hash2 = content_hash(b"hello");
        let hash3 = content_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_module_compilation() {
        let engine = engine();
        let module = compile(&engine, MINIMAL_WASM).unwrap();

        assert_eq!(module.content_hash(), content_hash(MINIMAL_WASM));
        assert!(!module.exports_command(ENTRY_POINT));
        assert!(module.imports().is_empty());
    }

    #[test]
    fn test_truncated_module_fails() {
        let engine = engine();
        let truncated = &[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0x01];

        let result = compile(&engine, truncated);
        assert!(matches!(
            result,
            Err(RuntimeError::CompilationFailed { .. })
        ));
    }

    #[test]
    fn test_module_debug() {
        let engine = engine();
        let module = compile(&engine, MINIMAL_WASM).unwrap();

        let debug_str = format!("{module:?}");
        assert!(debug_str.contains("CompiledModule"));
        assert!(debug_str.contains("content_hash"));
    }
}
