//! Configuration structures for the wasm-runner.
//!
//! This module defines configuration options for the two layers of a runner:
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, fuel metering)
//! - [`RunnerConfig`]: The function being served (name, args, root, timeout, replicas)
//!
//! Both are immutable once the runner has completed its warm start.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Default number of concurrent invocation slots.
pub const DEFAULT_REPLICAS: u32 = 4;

/// Maximum number of concurrent invocation slots.
pub const MAX_REPLICAS: u32 = 65_535;

const BIN_DIR: &str = "bin";
const DATA_DIR: &str = "data";
const RUN_DIR: &str = "run";

/// Wasmtime engine configuration.
///
/// These settings affect the engine shared by every invocation of the function.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for high-performance instance creation.
    ///
    /// When enabled, memory is pre-allocated for a pool of instances,
    /// reducing instantiation time from ~1ms to ~10µs.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable fuel metering.
    ///
    /// When enabled, every invocation is limited by [`RunnerConfig::max_fuel`].
    #[serde(default)]
    pub fuel_metering: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            fuel_metering: false,
        }
    }
}

impl EngineConfig {
    /// Largest replica count this engine can run concurrently.
    ///
    /// The pooling allocator refuses instances beyond `max_instances`.
    pub fn replica_limit(&self) -> u32 {
        if self.pooling_allocator {
            self.max_instances.min(MAX_REPLICAS)
        } else {
            MAX_REPLICAS
        }
    }

    /// Check that `replicas` is a valid count and fits [`Self::replica_limit`].
    pub fn check_replicas(&self, replicas: u32) -> Result<(), RuntimeError> {
        validate_replicas(replicas)?;

        let max = self.replica_limit();
        if replicas > max {
            return Err(RuntimeError::Capacity {
                requested: replicas,
                max,
            });
        }
        Ok(())
    }
}

/// Startup configuration of the served function.
///
/// The module root is laid out as:
///
/// ```text
/// <root>/bin/<name>     compiled once at warm start
/// <root>/data/<name>/   optional shared read-only inputs
/// <root>/run/<name>/    function root holding one sandbox per slot
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Function display name; also the file name under `bin/`.
    pub name: String,

    /// Arguments passed to the module after the command name.
    #[serde(default)]
    pub args: Vec<String>,

    /// Module root directory.
    pub root: PathBuf,

    /// Execution timeout in milliseconds. `0` disables the watchdog.
    #[serde(default)]
    pub timeout_ms: u64,

    /// Prefix relayed diagnostic lines with `<name>:<slot>`.
    #[serde(default = "defaults::log_prefix")]
    pub log_prefix: bool,

    /// Initial number of concurrent invocation slots.
    #[serde(default = "defaults::replicas")]
    pub replicas: u32,

    /// Name of the entry export.
    #[serde(default = "defaults::entry_point")]
    pub entry_point: String,

    /// Fuel granted to each invocation when fuel metering is enabled.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,
}

impl RunnerConfig {
    /// Create a configuration for `name` under `root` with default settings.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            root: root.into(),
            timeout_ms: 0,
            log_prefix: defaults::log_prefix(),
            replicas: defaults::replicas(),
            entry_point: defaults::entry_point(),
            max_fuel: defaults::max_fuel(),
        }
    }

    /// Set the module arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the initial replica count.
    #[must_use]
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Set the log-prefix mode.
    #[must_use]
    pub fn with_log_prefix(mut self, log_prefix: bool) -> Self {
        self.log_prefix = log_prefix;
        self
    }

    /// The watchdog timeout, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Path of the function bytecode.
    pub fn bin_path(&self) -> PathBuf {
        self.root.join(BIN_DIR).join(&self.name)
    }

    /// Path of the shared data directory (may not exist).
    pub fn data_root(&self) -> PathBuf {
        self.root.join(DATA_DIR).join(&self.name)
    }

    /// Path of the function root holding the per-slot sandboxes.
    pub fn run_root(&self) -> PathBuf {
        self.root.join(RUN_DIR).join(&self.name)
    }

    /// Check the configuration before warm start.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.name.is_empty() {
            return Err(RuntimeError::invalid_config("function name must not be empty"));
        }

        // The name becomes a single path component under bin/, data/ and run/.
        let mut components = Path::new(&self.name).components();
        let single_normal = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_normal {
            return Err(RuntimeError::invalid_config(format!(
                "function name '{}' must be a single path component",
                self.name
            )));
        }

        if self.entry_point.is_empty() {
            return Err(RuntimeError::invalid_config("entry point must not be empty"));
        }

        validate_replicas(self.replicas)
    }
}

/// Check that a replica count lies in `[1, MAX_REPLICAS]`.
pub fn validate_replicas(replicas: u32) -> Result<(), RuntimeError> {
    if (1..=MAX_REPLICAS).contains(&replicas) {
        Ok(())
    } else {
        Err(RuntimeError::Capacity {
            requested: replicas,
            max: MAX_REPLICAS,
        })
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn log_prefix() -> bool {
        true
    }

    pub const fn replicas() -> u32 {
        super::DEFAULT_REPLICAS
    }

    pub fn entry_point() -> String {
        "_start".to_string()
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_config() {
        let config = EngineConfig::default();

        assert!(!config.pooling_allocator);
        assert_eq!(config.max_instances, 1000);
        assert_eq!(config.instance_memory_mb, 64);
        assert!(!config.fuel_metering);
    }

    #[test]
    fn test_runner_config_defaults() {
        let config = RunnerConfig::new("echo", "/srv/functions");

        assert_eq!(config.replicas, DEFAULT_REPLICAS);
        assert_eq!(config.entry_point, "_start");
        assert!(config.log_prefix);
        assert!(config.args.is_empty());
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_runner_config_paths() {
        let config = RunnerConfig::new("echo", "/srv/functions");

        assert_eq!(config.bin_path(), PathBuf::from("/srv/functions/bin/echo"));
        assert_eq!(config.data_root(), PathBuf::from("/srv/functions/data/echo"));
        assert_eq!(config.run_root(), PathBuf::from("/srv/functions/run/echo"));
    }

    #[test]
    fn test_runner_config_timeout() {
        let config = RunnerConfig::new("echo", "/srv").with_timeout(Duration::from_millis(500));

        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.timeout(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        assert!(RunnerConfig::new("", "/srv").validate().is_err());
        assert!(RunnerConfig::new("a/b", "/srv").validate().is_err());
        assert!(RunnerConfig::new("..", "/srv").validate().is_err());
        assert!(RunnerConfig::new(".", "/srv").validate().is_err());
        assert!(RunnerConfig::new("echo", "/srv").validate().is_ok());
    }

    #[test]
    fn test_validate_replicas() {
        assert!(validate_replicas(1).is_ok());
        assert!(validate_replicas(MAX_REPLICAS).is_ok());
        assert!(matches!(
            validate_replicas(0),
            Err(RuntimeError::Capacity { requested: 0, .. })
        ));
        assert!(matches!(
            validate_replicas(MAX_REPLICAS + 1),
            Err(RuntimeError::Capacity { .. })
        ));
    }

    #[test]
    fn test_pooling_caps_replicas() {
        let plain = EngineConfig::default();
        assert_eq!(plain.replica_limit(), MAX_REPLICAS);
        assert!(plain.check_replicas(5000).is_ok());

        let pooled = EngineConfig {
            pooling_allocator: true,
            max_instances: 16,
            ..Default::default()
        };
        assert_eq!(pooled.replica_limit(), 16);
        assert!(pooled.check_replicas(16).is_ok());
        assert!(matches!(
            pooled.check_replicas(17),
            Err(RuntimeError::Capacity {
                requested: 17,
                max: 16
            })
        ));
        assert!(pooled.check_replicas(0).is_err());
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"name": "echo", "root": "/srv", "timeout_ms": 250}"#;
        let config: RunnerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.name, "echo");
        assert_eq!(config.timeout_ms, 250);
        // Default values for unspecified fields
        assert_eq!(config.replicas, DEFAULT_REPLICAS);
        assert_eq!(config.max_fuel, 10_000_000);
    }
}
