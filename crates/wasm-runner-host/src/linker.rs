//! Host function registration for Wasmtime linkers.

use std::sync::Arc;

use tracing::warn;
use wasm_runner_core::HostBindings;
use wasm_runner_core::store::InvocationContext;
use wasmtime::{Caller, Linker};

use crate::logging::{LoggingHost, level_from_i32};

/// The `env::log` bridge.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuestLogBindings;

impl HostBindings for GuestLogBindings {
    fn name(&self) -> &str {
        "log"
    }

    fn link(&self, linker: &mut Linker<InvocationContext>) -> wasmtime::Result<()> {
        register_logging(linker)
    }
}

/// Every bridge this crate provides, ready for
/// [`FunctionRunner::new`](wasm_runner_core::FunctionRunner::new).
pub fn default_bindings() -> Vec<Arc<dyn HostBindings>> {
    vec![Arc::new(GuestLogBindings)]
}

/// Register the logging host function.
///
/// Registers `env::log(level: i32, ptr: i32, len: i32)`.
///
/// # Memory Protocol
///
/// The guest passes:
/// - `level`: Log level (0=debug, 1=info, 2=warn, 3=error)
/// - `ptr`: Pointer to the message string in the exported `memory`
/// - `len`: Length of the message in bytes (UTF-8)
///
/// Calls with an invalid range are dropped with a warning; they never trap.
///
/// # Errors
///
/// Returns an error if `env::log` is already defined on `linker`.
pub fn register_logging(linker: &mut Linker<InvocationContext>) -> wasmtime::Result<()> {
    linker.func_wrap(
        "env",
        "log",
        |mut caller: Caller<'_, InvocationContext>, level: i32, ptr: i32, len: i32| {
            let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
                warn!(ptr, len, "Invalid pointer or length (negative value)");
                return;
            };

            let Some(memory) = caller
                .get_export("memory")
                .and_then(wasmtime::Extern::into_memory)
            else {
                warn!("Memory export not found in guest module");
                return;
            };

            // Owned so the borrow of guest memory ends before data_mut().
            let message = {
                let data = memory.data(&caller);
                let Some(bytes) = start.checked_add(len).and_then(|end| data.get(start..end))
                else {
                    warn!(start, len, memory_size = data.len(), "Memory access out of bounds");
                    return;
                };
                String::from_utf8_lossy(bytes).into_owned()
            };

            LoggingHost::log(caller.data_mut(), level_from_i32(level), &message);
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_runner_common::EngineConfig;
    use wasm_runner_core::WasmEngine;

    #[test]
    fn test_register_logging() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let mut linker = Linker::new(engine.inner());

        assert!(register_logging(&mut linker).is_ok());
    }

    #[test]
    fn test_double_registration_fails() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let mut linker = Linker::new(engine.inner());

        GuestLogBindings.link(&mut linker).unwrap();
        assert!(GuestLogBindings.link(&mut linker).is_err());
    }

    #[test]
    fn test_default_bindings() {
        let bindings = default_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].name(), "log");
    }
}
