//! Configuration file structures for wasm-pool.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ToolEntry`]: A WebAssembly tool run through its own instance pool

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// fuel_metering = true
/// epoch_interruption = true
///
/// [runtime.execution]
/// timeout_ms = 30_000
/// max_memory_mb = 512
///
/// [runtime.pool]
/// max_concurrency = 2
///
/// [[tools]]
/// name = "ffprobe"
/// path = "./tools/ffprobe.wasm"
/// max_concurrency = 4
/// guest_log = true
/// env = { AV_LOG_FORCE_NOCOLOR = "1" }
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine, execution and pool settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Tools available to run.
    #[serde(default)]
    pub tools: Vec<ToolEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), tools = config.tools.len(), "Config file loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or a tool entry is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a tool by name.
    pub fn tool(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.iter().find(|t| t.name == name)
    }

    fn validate(&self) -> Result<(), ConfigFileError> {
        if self.runtime.pool.max_concurrency == 0 {
            return Err(ConfigFileError::Invalid {
                message: "runtime.pool.max_concurrency must be at least 1".into(),
            });
        }

        for (i, tool) in self.tools.iter().enumerate() {
            if tool.max_concurrency == Some(0) {
                return Err(ConfigFileError::Invalid {
                    message: format!("tool '{}': max_concurrency must be at least 1", tool.name),
                });
            }
            if self.tools[..i].iter().any(|t| t.name == tool.name) {
                return Err(ConfigFileError::Invalid {
                    message: format!("duplicate tool name '{}'", tool.name),
                });
            }
        }

        Ok(())
    }
}

/// A tool entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolEntry {
    /// Unique name, also passed to the tool as `argv[0]`.
    pub name: String,

    /// Path to the WebAssembly module file.
    pub path: String,

    /// Concurrency limit for this tool, overriding `runtime.pool.max_concurrency`.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Link `env::log` for this tool.
    #[serde(default)]
    pub guest_log: bool,

    /// Environment variables visible to every run of this tool.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },

    /// The file parsed but holds inconsistent values.
    #[error("Invalid config file: {message}")]
    Invalid { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert!(config.tools.is_empty());
        assert_eq!(config.runtime.pool.max_concurrency, 1);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.engine]
            fuel_metering = false
            epoch_tick_ms = 5

            [runtime.execution]
            timeout_ms = 30_000
            max_memory_mb = 512

            [runtime.pool]
            max_concurrency = 2

            [[tools]]
            name = "ffprobe"
            path = "./tools/ffprobe.wasm"
            max_concurrency = 4
            guest_log = true
            env = { LANG = "C" }

            [[tools]]
            name = "ffmpeg"
            path = "./tools/ffmpeg.wasm"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert!(!config.runtime.engine.fuel_metering);
        assert_eq!(config.runtime.engine.epoch_tick_ms, 5);
        assert_eq!(config.runtime.execution.timeout_ms, 30_000);
        assert_eq!(config.runtime.pool.max_concurrency, 2);
        assert_eq!(config.tools.len(), 2);
        assert_eq!(config.tool("ffprobe").unwrap().max_concurrency, Some(4));
        assert_eq!(config.tool("ffmpeg").unwrap().max_concurrency, None);
        assert!(config.tool("ffprobe").unwrap().guest_log);
        assert_eq!(config.tool("ffprobe").unwrap().env["LANG"], "C");
        assert!(config.tool("ffmpeg").unwrap().env.is_empty());
        assert!(config.tool("missing").is_none());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let toml = r#"
            [[tools]]
            name = "ffprobe"
            path = "./ffprobe.wasm"
            max_concurrency = 0
        "#;

        let result = ConfigFile::from_toml(toml);
        assert!(matches!(result, Err(ConfigFileError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_duplicate_tools() {
        let toml = r#"
            [[tools]]
            name = "ffprobe"
            path = "./a.wasm"

            [[tools]]
            name = "ffprobe"
            path = "./b.wasm"
        "#;

        let result = ConfigFile::from_toml(toml);
        assert!(matches!(result, Err(ConfigFileError::Invalid { .. })));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigFile::from_file("/nonexistent/wasm-pool.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}
