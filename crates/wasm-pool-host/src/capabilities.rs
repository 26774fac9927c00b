//! Host capability sets.
//!
//! A [`HostCapabilities`] value declares which host functions a guest tool
//! may import. Anything not granted here is not linked, so a module that
//! imports it fails at pool initialization rather than at run time.

use wasm_pool_common::RuntimeError;

/// Host functions and fixed configuration exposed to a guest.
///
/// Nothing is granted beyond WASI preview 1 unless requested. WASI itself
/// carries no filesystem preopens and no sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCapabilities {
    /// Link `wasi_snapshot_preview1`. Every command module needs it.
    pub wasi: bool,

    /// Link `env::log` for structured logging from guest code.
    pub guest_log: bool,

    /// Environment variables visible to every run, before per-run variables.
    pub env: Vec<(String, String)>,
}

impl HostCapabilities {
    /// WASI only.
    pub fn minimal() -> Self {
        Self {
            wasi: true,
            guest_log: false,
            env: Vec::new(),
        }
    }

    /// Start from [`minimal`](Self::minimal).
    pub fn builder() -> HostCapabilitiesBuilder {
        HostCapabilitiesBuilder::default()
    }

    /// Check that the set can host a command module.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Initialization`] if WASI is disabled or an
    /// environment variable has an empty name or a name containing `=`.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if !self.wasi {
            return Err(RuntimeError::initialization(
                "Host capabilities must include WASI preview 1",
            ));
        }

        if let Some((key, _)) = self
            .env
            .iter()
            .find(|(key, _)| key.is_empty() || key.contains('='))
        {
            return Err(RuntimeError::initialization(format!(
                "Invalid environment variable name: '{key}'"
            )));
        }

        Ok(())
    }
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self::minimal()
    }
}

/// Builder for [`HostCapabilities`].
#[derive(Debug, Default)]
pub struct HostCapabilitiesBuilder {
    inner: HostCapabilities,
}

impl HostCapabilitiesBuilder {
    /// Enable `env::log`.
    #[must_use]
    pub fn enable_guest_log(mut self) -> Self {
        self.inner.guest_log = true;
        self
    }

    /// Add a fixed environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.env.push((key.into(), value.into()));
        self
    }

    /// Build the capability set.
    #[must_use]
    pub fn build(self) -> HostCapabilities {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal() {
        let caps = HostCapabilities::minimal();
        assert!(caps.wasi);
        assert!(!caps.guest_log);
        assert!(caps.env.is_empty());
        assert!(caps.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let caps = HostCapabilities::builder()
            .enable_guest_log()
            .env("LANG", "C")
            .env("TZ", "UTC")
            .build();

        assert!(caps.wasi);
        assert!(caps.guest_log);
        assert_eq!(caps.env.len(), 2);
        assert_eq!(caps.env[0], ("LANG".to_string(), "C".to_string()));
        assert!(caps.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_wasi() {
        let caps = HostCapabilities {
            wasi: false,
            ..HostCapabilities::minimal()
        };
        assert!(matches!(
            caps.validate(),
            Err(RuntimeError::Initialization { .. })
        ));
    }

    #[test]
    fn test_validate_env_names() {
        let caps = HostCapabilities::builder().env("", "x").build();
        assert!(caps.validate().is_err());

        let caps = HostCapabilities::builder().env("A=B", "x").build();
        assert!(caps.validate().is_err());
    }
}
