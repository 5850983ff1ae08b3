//! Configuration file structures for the wasm-runner.
//!
//! A runner is configured by a TOML file with two tables:
//! - `[engine]`: [`EngineConfig`]
//! - `[function]`: [`RunnerConfig`]

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{EngineConfig, RunnerConfig, RuntimeError};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [engine]
/// pooling_allocator = true
/// max_instances = 64
///
/// [function]
/// name = "echo"
/// root = "/srv/functions"
/// args = ["--verbose"]
/// timeout_ms = 500
/// replicas = 8
/// log_prefix = true
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// The served function.
    pub function: RunnerConfig,
}

impl ConfigFile {
    /// Read and validate a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML for
    /// this structure, or describes an invalid function.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::from_toml(&content)?;
        tracing::debug!(
            path = %path.display(),
            function = %config.function.name,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigFileError::Parse`] for malformed input and
    /// [`ConfigFileError::Invalid`] if the `[function]` table fails
    /// [`RunnerConfig::validate`] or asks for more replicas than the engine
    /// can run.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.message().to_string(),
        })?;
        config.function.validate()?;
        config.engine.check_replicas(config.function.replicas)?;
        Ok(config)
    }
}

/// Errors raised while loading a [`ConfigFile`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("Cannot read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The contents are not valid TOML for [`ConfigFile`].
    #[error("Malformed config file: {message}")]
    Parse { message: String },

    /// The contents parsed but describe an unusable function.
    #[error(transparent)]
    Invalid(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [function]
            name = "echo"
            root = "/srv/functions"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.function.name, "echo");
        // Defaults applied
        assert_eq!(config.function.replicas, 4);
        assert_eq!(config.function.timeout_ms, 0);
        assert!(!config.engine.pooling_allocator);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [engine]
            pooling_allocator = true
            max_instances = 64
            fuel_metering = true

            [function]
            name = "resize"
            root = "/srv/functions"
            args = ["--width", "128"]
            timeout_ms = 500
            log_prefix = false
            replicas = 8
            entry_point = "run"
            max_fuel = 5_000_000
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert!(config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 64);
        assert!(config.engine.fuel_metering);
        assert_eq!(config.function.args, vec!["--width", "128"]);
        assert_eq!(config.function.timeout_ms, 500);
        assert!(!config.function.log_prefix);
        assert_eq!(config.function.replicas, 8);
        assert_eq!(config.function.entry_point, "run");
        assert_eq!(config.function.max_fuel, 5_000_000);
    }

    #[test]
    fn test_missing_function_table() {
        let result = ConfigFile::from_toml("[engine]\npooling_allocator = true\n");
        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_function_rejected() {
        let toml = r#"
            [function]
            name = "echo"
            root = "/srv/functions"
            replicas = 0
        "#;

        let result = ConfigFile::from_toml(toml);
        assert!(matches!(
            result,
            Err(ConfigFileError::Invalid(RuntimeError::Capacity { requested: 0, .. }))
        ));
    }

    #[test]
    fn test_replicas_beyond_pool_rejected() {
        let toml = r#"
            [engine]
            pooling_allocator = true
            max_instances = 4

            [function]
            name = "echo"
            root = "/srv/functions"
            replicas = 8
        "#;

        let result = ConfigFile::from_toml(toml);
        assert!(matches!(
            result,
            Err(ConfigFileError::Invalid(RuntimeError::Capacity { requested: 8, max: 4 }))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.toml");
        std::fs::write(&path, "[function]\nname = \"echo\"\nroot = \"/srv\"\n").unwrap();

        let config = ConfigFile::from_file(&path).unwrap();
        assert_eq!(config.function.bin_path(), Path::new("/srv/bin/echo"));
    }

    #[test]
    fn test_from_missing_file() {
        let result = ConfigFile::from_file("/nonexistent/wasm-runner.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}
