//! Extension point for host-call bridges.
//!
//! WASI preview1 is always linked. Additional bridges, such as a GPU bridge,
//! implement [`HostBindings`] and are linked into every invocation before
//! the module is instantiated.

use wasmtime::Linker;

use crate::store::InvocationContext;

/// A set of host functions the module may import.
pub trait HostBindings: Send + Sync {
    /// Short name used in logs and in [`ImportBinding`] errors.
    ///
    /// [`ImportBinding`]: wasm_runner_common::RuntimeError::ImportBinding
    fn name(&self) -> &str;

    /// Define this bridge's host functions on `linker`.
    fn link(&self, linker: &mut Linker<InvocationContext>) -> wasmtime::Result<()>;
}
