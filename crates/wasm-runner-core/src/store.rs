//! Per-invocation host environment and store management.
//!
//! This module provides:
//! - [`HostEnvironment`]: What the module sees: virtual root, argv, env, stdio
//! - [`InvocationContext`]: Per-invocation state accessible from host functions
//! - [`LogEntry`] and [`LogLevel`]: Structured logging from guest code

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use wasmtime::{Store, Trap, UpdateDeadline};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::WasmEngine;
use wasm_runner_common::{RunnerConfig, RuntimeError};

/// Upper bound on the bytes captured from each of stdout and stderr.
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024 * 1024;

/// Guest path at which the shared data directory is mounted read-only.
pub const DATA_MOUNT: &str = "/data";

/// Per-invocation host environment descriptor.
///
/// The sandbox directory becomes the module's `/`. Standard output and
/// standard error are captured in memory; standard input is either the
/// request body or empty.
pub struct HostEnvironment {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    root: PathBuf,
    data: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    stdout: MemoryOutputPipe,
    stderr: MemoryOutputPipe,
}

impl HostEnvironment {
    /// Create an environment running `program` with `root` as its virtual root.
    ///
    /// `PWD` is set to `/`.
    pub fn new(program: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: vec![("PWD".to_string(), "/".to_string())],
            root: root.into(),
            data: None,
            stdin: None,
            stdout: MemoryOutputPipe::new(MAX_CAPTURE_BYTES),
            stderr: MemoryOutputPipe::new(MAX_CAPTURE_BYTES),
        }
    }

    /// Append arguments after the program name.
    #[must_use]
    pub fn with_args(mut self, args: &[String]) -> Self {
        self.args.extend_from_slice(args);
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Use `bytes` as standard input.
    #[must_use]
    pub fn with_stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    /// Mount `dir` read-only at [`DATA_MOUNT`].
    #[must_use]
    pub fn with_data_mount(mut self, dir: Option<&Path>) -> Self {
        self.data = dir.map(Path::to_path_buf);
        self
    }

    /// The full argument vector, starting with the program name.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// The environment variables exposed to the module.
    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// Bytes the module has written to standard output so far.
    pub fn stdout(&self) -> Vec<u8> {
        self.stdout.contents().to_vec()
    }

    /// Bytes the module has written to standard error so far.
    pub fn stderr(&self) -> Vec<u8> {
        self.stderr.contents().to_vec()
    }

    /// Build the WASI context. Standard input is consumed by the first call.
    fn build_wasi(&mut self) -> Result<WasiP1Ctx, RuntimeError> {
        let stdin = MemoryInputPipe::new(self.stdin.take().unwrap_or_default());
        let mut builder = WasiCtxBuilder::new();

        builder
            .stdin(stdin)
            .stdout(self.stdout.clone())
            .stderr(self.stderr.clone());

        for arg in self.argv() {
            builder.arg(arg);
        }
        for (key, value) in &self.envs {
            builder.env(key, value);
        }

        builder
            .preopened_dir(&self.root, "/", DirPerms::all(), FilePerms::all())
            .map_err(|e| {
                RuntimeError::directory_setup(
                    self.root.display().to_string(),
                    std::io::Error::other(e.to_string()),
                )
            })?;

        if let Some(data) = &self.data {
            builder
                .preopened_dir(data, DATA_MOUNT, DirPerms::READ, FilePerms::READ)
                .map_err(|e| {
                    RuntimeError::directory_setup(
                        data.display().to_string(),
                        std::io::Error::other(e.to_string()),
                    )
                })?;
        }

        Ok(builder.build_p1())
    }
}

impl std::fmt::Debug for HostEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEnvironment")
            .field("argv", &self.argv())
            .field("root", &self.root)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

/// Per-invocation execution context.
///
/// Host functions can access this context through the [`wasmtime::Caller`] API.
pub struct InvocationContext {
    /// WASI preview1 context.
    wasi: WasiP1Ctx,

    /// Unique invocation identifier for tracing.
    pub invocation_id: String,

    /// Slot the invocation runs in.
    pub slot: u16,

    /// Logs collected from guest host calls.
    pub logs: Vec<LogEntry>,
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,

    /// Log message content.
    pub message: String,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl InvocationContext {
    /// Create a new context for `slot` around a built WASI context.
    pub fn new(slot: u16, wasi: WasiP1Ctx) -> Self {
        Self {
            wasi,
            invocation_id: uuid::Uuid::new_v4().to_string(),
            slot,
            logs: Vec::new(),
        }
    }

    /// The WASI context, as required by the preview1 linker.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Add a log entry.
    pub fn log(&mut self, level: LogLevel, message: String) {
        self.logs.push(LogEntry { level, message });
    }

    /// Render collected guest logs as diagnostic lines.
    pub fn render_logs(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.logs {
            out.extend_from_slice(format!("{} {}\n", entry.level, entry.message).as_bytes());
        }
        out
    }
}

/// Create the store for one invocation.
///
/// The store traps at its next epoch check once `kill` is set; see
/// [`Watchdog`](crate::watchdog::Watchdog).
///
/// # Errors
///
/// Returns an error if the WASI context cannot be built or fuel cannot be set.
pub fn create_store(
    engine: &WasmEngine,
    config: &RunnerConfig,
    env: &mut HostEnvironment,
    slot: u16,
    kill: Arc<AtomicBool>,
) -> Result<Store<InvocationContext>, RuntimeError> {
    let context = InvocationContext::new(slot, env.build_wasi()?);
    let mut store = Store::new(engine.inner(), context);

    if engine.is_fuel_metered() {
        store
            .set_fuel(config.max_fuel)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    // Any epoch increment reaches the deadline; only a killed store traps.
    store.set_epoch_deadline(1);
    store.epoch_deadline_callback(move |_| {
        if kill.load(Ordering::Acquire) {
            Err(Trap::Interrupt.into())
        } else {
            Ok(UpdateDeadline::Continue(1))
        }
    });

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<InvocationContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<InvocationContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_runner_common::EngineConfig;

    fn context() -> InvocationContext {
        let wasi = WasiCtxBuilder::new().build_p1();
        InvocationContext::new(0, wasi)
    }

    #[test]
    fn test_argv_starts_with_program() {
        let env = HostEnvironment::new("echo", "/tmp/run/echo/0")
            .with_args(&["-n".to_string(), "hello".to_string()]);

        assert_eq!(env.argv(), vec!["echo", "-n", "hello"]);
    }

    #[test]
    fn test_env_has_working_directory() {
        let env = HostEnvironment::new("echo", "/tmp").with_env("LANG", "C");

        assert_eq!(env.envs()[0], ("PWD".to_string(), "/".to_string()));
        assert_eq!(env.envs()[1], ("LANG".to_string(), "C".to_string()));
    }

    #[test]
    fn test_context_logging() {
        let mut ctx = context();

        ctx.log(LogLevel::Info, "Hello".into());
        ctx.log(LogLevel::Error, "World".into());

        assert_eq!(ctx.logs.len(), 2);
        assert_eq!(ctx.logs[0].level, LogLevel::Info);
        assert_eq!(ctx.render_logs(), b"INFO Hello\nERROR World\n");
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
        assert_eq!(LogLevel::Info.to_string(), "INFO");
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_store_creation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let config = RunnerConfig::new("echo", dir.path());
        let mut env = HostEnvironment::new("echo", dir.path());

        let store = create_store(&engine, &config, &mut env, 3, Arc::default()).unwrap();
        assert_eq!(store.data().slot, 3);
    }

    #[test]
    fn test_store_fuel() {
        let dir = tempfile::tempdir().unwrap();
        let engine = WasmEngine::new(&EngineConfig {
            fuel_metering: true,
            ..Default::default()
        })
        .unwrap();
        let config = RunnerConfig {
            max_fuel: 1000,
            ..RunnerConfig::new("echo", dir.path())
        };
        let mut env = HostEnvironment::new("echo", dir.path());

        let store = create_store(&engine, &config, &mut env, 0, Arc::default()).unwrap();
        assert_eq!(get_remaining_fuel(&store), Some(1000));
    }

    #[test]
    fn test_store_rejects_missing_root() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let config = RunnerConfig::new("echo", "/nonexistent");
        let mut env = HostEnvironment::new("echo", "/nonexistent/run/echo/0");

        let result = create_store(&engine, &config, &mut env, 0, Arc::default());
        assert!(matches!(result, Err(RuntimeError::DirectorySetup { .. })));
    }
}
