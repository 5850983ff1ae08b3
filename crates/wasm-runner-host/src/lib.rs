//! Host-call bridges for wasm-runner.
//!
//! WASI preview1 is linked by the core runner itself. This crate provides
//! the extra imports a function may use on top of it:
//!
//! - [`logging`]: `env::log`, level-tagged guest messages relayed with the
//!   invocation's diagnostics
//!
//! Bridges implement [`HostBindings`](wasm_runner_core::HostBindings) and
//! are passed to the runner at warm start; [`default_bindings`] returns all
//! of them.

pub mod linker;
pub mod logging;

pub use linker::{GuestLogBindings, default_bindings, register_logging};
pub use logging::LoggingHost;
