//! Core Wasmtime runtime for wasm-runner.
//!
//! This crate runs one deployed function:
//! - [`WasmEngine`]: Configured Wasmtime engine with epoch interruption
//! - [`CompiledModule`]: The function's module, compiled once at warm start
//! - [`SandboxManager`]: Per-slot virtual root directories
//! - [`SlotPool`]: Bounded concurrency with stable slot identifiers
//! - [`InstanceRunner`]: One invocation from environment setup to output
//! - [`LogRelay`]: Diagnostic output forwarded to the process log
//! - [`FunctionRunner`]: The facade tying the above together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   FunctionRunner                        │
//! │  (Warm start: engine, module, function root, pool)      │
//! └─────────────────────────────────────────────────────────┘
//!                            │ acquire slot
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            SlotPool + SandboxManager                    │
//! │  (One slot id, one <root>/run/<name>/<slot> directory)  │
//! └─────────────────────────────────────────────────────────┘
//!                            │ spawn_blocking
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        Store<InvocationContext> + Instance              │
//! │  (Per-request, isolated)                                │
//! │  - WASI preview1 and host bindings                      │
//! │  - Watchdog timeout                                     │
//! │  - Captured stdout and stderr                           │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod bindings;
pub mod engine;
pub mod instance;
pub mod module;
pub mod pool;
pub mod relay;
pub mod request;
pub mod runner;
pub mod sandbox;
pub mod store;
pub mod watchdog;

pub use bindings::HostBindings;
pub use engine::WasmEngine;
pub use instance::InstanceRunner;
pub use module::CompiledModule;
pub use pool::{SlotGuard, SlotPool};
pub use relay::{LogRelay, RELAY_TARGET};
pub use request::{FunctionRequest, InvocationResult};
pub use runner::FunctionRunner;
pub use sandbox::{SandboxDir, SandboxManager};
pub use store::{DATA_MOUNT, HostEnvironment, InvocationContext, LogEntry, LogLevel};
pub use watchdog::Watchdog;
