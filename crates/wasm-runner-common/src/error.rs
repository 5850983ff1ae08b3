//! Error types for the wasm-runner.
//!
//! [`RuntimeError`] covers the whole lifecycle of a function: warm start
//! (load, compile, function root setup), per-invocation failures (sandbox,
//! host bindings, instantiation, execution, timeout, output) and pool scaling.

use std::io;

use thiserror::Error;

/// Top-level runtime errors.
///
/// Warm-start failures ([`RuntimeError::is_fatal`]) prevent the runner from
/// serving any request. Every other variant is scoped to a single invocation
/// or a single scale request and is returned to the caller.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The function bytecode could not be read.
    #[error("Failed to load module '{path}': {source}")]
    Load {
        /// Path the bytecode was read from.
        path: String,
        #[source]
        source: io::Error,
    },

    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    Compile {
        /// Description of the compilation failure.
        reason: String,
    },

    /// A function root or sandbox directory could not be prepared.
    #[error("Directory setup failed for '{path}': {source}")]
    DirectorySetup {
        /// The directory being prepared.
        path: String,
        #[source]
        source: io::Error,
    },

    /// A sandbox directory could not be removed after the invocation.
    #[error("Sandbox teardown failed for '{path}': {source}")]
    SandboxTeardown {
        /// The sandbox directory that was left behind.
        path: String,
        #[source]
        source: io::Error,
    },

    /// A host-call bridge failed to extend the import set.
    #[error("Import binding '{bridge}' failed: {reason}")]
    ImportBinding {
        /// Name of the bridge (e.g. `wasi`, `gpu`).
        bridge: String,
        /// Description of the binding failure.
        reason: String,
    },

    /// The module could not be instantiated against the host environment.
    #[error("Instantiation failed: {reason}")]
    Instantiation {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// The designated entry export is missing or has the wrong signature.
    #[error("Entry point '{entry}' not found")]
    EntryNotFound {
        /// Name of the entry export.
        entry: String,
    },

    /// Execution exceeded the configured timeout and was torn down.
    #[error("Execution timeout after {duration_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// The entry export trapped or exited with a failure status.
    #[error("Execution failed: {reason}")]
    Execution {
        /// Description of the failure.
        reason: String,
    },

    /// Execution exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// The output sink rejected the captured stdout bytes.
    #[error("Failed to write function output: {0}")]
    Write(#[source] io::Error),

    /// The request input stream could not be read.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A scale request is outside the supported capacity range.
    #[error("Invalid replica count {requested}: must be between 1 and {max}")]
    Capacity {
        /// The requested replica count.
        requested: u32,
        /// The maximum supported replica count.
        max: u32,
    },

    /// The slot pool was closed while waiting for a slot.
    #[error("Slot pool is closed")]
    PoolClosed,

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `Load` error.
    pub fn load(path: impl Into<String>, source: io::Error) -> Self {
        Self::Load {
            path: path.into(),
            source,
        }
    }

    /// Create a new `Compile` error.
    pub fn compile(reason: impl Into<String>) -> Self {
        Self::Compile {
            reason: reason.into(),
        }
    }

    /// Create a new `DirectorySetup` error.
    pub fn directory_setup(path: impl Into<String>, source: io::Error) -> Self {
        Self::DirectorySetup {
            path: path.into(),
            source,
        }
    }

    /// Create a new `SandboxTeardown` error.
    pub fn sandbox_teardown(path: impl Into<String>, source: io::Error) -> Self {
        Self::SandboxTeardown {
            path: path.into(),
            source,
        }
    }

    /// Create a new `ImportBinding` error.
    pub fn import_binding(bridge: impl Into<String>, reason: impl ToString) -> Self {
        Self::ImportBinding {
            bridge: bridge.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl ToString) -> Self {
        Self::Instantiation {
            reason: reason.to_string(),
        }
    }

    /// Create a new `EntryNotFound` error.
    pub fn entry_not_found(entry: impl Into<String>) -> Self {
        Self::EntryNotFound {
            entry: entry.into(),
        }
    }

    /// Create a new `Execution` error.
    pub fn execution(reason: impl ToString) -> Self {
        Self::Execution {
            reason: reason.to_string(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` for warm-start failures that leave the runner unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Load { .. } | Self::Compile { .. } | Self::InvalidConfig { .. }
        )
    }

    /// Returns `true` if this error indicates the watchdog tore the instance down.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::FuelExhausted | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::entry_not_found("_start");
        assert_eq!(err.to_string(), "Entry point '_start' not found");

        let err = RuntimeError::Timeout { duration_ms: 50 };
        assert_eq!(err.to_string(), "Execution timeout after 50ms");

        let err = RuntimeError::Capacity {
            requested: 70_000,
            max: 65_535,
        };
        assert_eq!(
            err.to_string(),
            "Invalid replica count 70000: must be between 1 and 65535"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "closed");
        let runtime_err: RuntimeError = io_err.into();

        assert!(matches!(runtime_err, RuntimeError::Io(_)));
    }

    #[test]
    fn test_is_fatal() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert!(RuntimeError::load("/srv/bin/echo", missing).is_fatal());
        assert!(RuntimeError::compile("bad magic").is_fatal());
        assert!(!RuntimeError::Timeout { duration_ms: 1 }.is_fatal());
        assert!(!RuntimeError::instantiation("unknown import").is_fatal());
    }

    #[test]
    fn test_is_resource_limit() {
        assert!(RuntimeError::FuelExhausted.is_resource_limit());
        assert!(RuntimeError::Timeout { duration_ms: 100 }.is_resource_limit());
        assert!(RuntimeError::Timeout { duration_ms: 100 }.is_timeout());
        assert!(!RuntimeError::execution("trap").is_resource_limit());
    }

    #[test]
    fn test_import_binding_names_bridge() {
        let err = RuntimeError::import_binding("gpu", "device unavailable");
        assert_eq!(
            err.to_string(),
            "Import binding 'gpu' failed: device unavailable"
        );
    }
}
