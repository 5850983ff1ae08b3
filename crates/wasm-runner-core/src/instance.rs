//! WebAssembly instance lifecycle management.
//!
//! [`InstanceRunner`] drives one invocation from start to finish:
//!
//! 1. Read the request input and build the host environment
//! 2. Link WASI preview1 and the registered host bindings
//! 3. Instantiate the module with a fresh store
//! 4. Call the entry export under the watchdog
//! 5. Relay diagnostics and write standard output to the sink
//!
//! The runner is synchronous. It is called from a blocking task and never
//! touches the slot pool or the sandbox directory itself.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};
use wasmtime::{Linker, Trap};
use wasmtime_wasi::I32Exit;

use crate::bindings::HostBindings;
use crate::relay::LogRelay;
use crate::request::{FunctionRequest, InvocationResult};
use crate::store::{
    HostEnvironment, InvocationContext, calculate_fuel_consumed, create_store, get_remaining_fuel,
};
use crate::watchdog::Watchdog;
use crate::{CompiledModule, WasmEngine};
use wasm_runner_common::{RunnerConfig, RuntimeError};

/// Bridge name reported when linking WASI preview1 fails.
const WASI_BRIDGE: &str = "wasi";

/// Per-invocation executor for one function.
///
/// # Thread Safety
///
/// `InstanceRunner` is shared across blocking tasks. Each invocation builds
/// its own linker and [`Store`](wasmtime::Store), so no guest state survives
/// from one invocation to the next.
pub struct InstanceRunner {
    engine: WasmEngine,
    module: Arc<CompiledModule>,
    config: Arc<RunnerConfig>,
    bindings: Vec<Arc<dyn HostBindings>>,
    relay: LogRelay,
    handle: Handle,
}

impl InstanceRunner {
    /// Create an executor for `module`.
    ///
    /// `handle` hosts the watchdog and relay tasks.
    pub fn new(
        engine: WasmEngine,
        module: Arc<CompiledModule>,
        config: Arc<RunnerConfig>,
        bindings: Vec<Arc<dyn HostBindings>>,
        handle: Handle,
    ) -> Self {
        let relay = LogRelay::new(handle.clone(), config.log_prefix);

        Self {
            engine,
            module,
            config,
            bindings,
            relay,
            handle,
        }
    }

    /// Build the import set for one invocation.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ImportBinding`] naming the bridge that failed.
    pub fn link(&self) -> Result<Linker<InvocationContext>, RuntimeError> {
        let mut linker = Linker::new(self.engine.inner());

        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, InvocationContext::wasi_mut)
            .map_err(|e| RuntimeError::import_binding(WASI_BRIDGE, e))?;

        for bridge in &self.bindings {
            bridge
                .link(&mut linker)
                .map_err(|e| RuntimeError::import_binding(bridge.name(), e))?;
        }

        Ok(linker)
    }

    /// Run the function once in `sandbox`.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot be built, the imports
    /// cannot be satisfied, the entry export is missing, the call traps or
    /// times out, or the output sink rejects the captured bytes.
    #[instrument(skip_all, fields(function = %self.config.name, slot = slot))]
    pub fn execute(
        &self,
        slot: u16,
        sandbox: &Path,
        data: Option<&Path>,
        request: FunctionRequest,
    ) -> Result<InvocationResult, RuntimeError> {
        let start = Instant::now();
        let name = self.config.name.as_str();

        debug!(
            process = name,
            args = ?self.config.args,
            timeout_ms = self.config.timeout_ms,
            "Running function"
        );

        let FunctionRequest {
            input,
            mut output,
            diagnostics: diagnostics_sink,
        } = request;
        let stdin = match input {
            Some(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                buf
            }
            None => Vec::new(),
        };

        let mut env = HostEnvironment::new(name, sandbox)
            .with_args(&self.config.args)
            .with_stdin(stdin)
            .with_data_mount(data);

        let kill = Arc::new(AtomicBool::new(false));
        let mut store = create_store(&self.engine, &self.config, &mut env, slot, Arc::clone(&kill))?;
        let invocation_id = store.data().invocation_id.clone();

        let linker = self.link()?;
        let instance = linker
            .instantiate(&mut store, self.module.inner())
            .map_err(RuntimeError::instantiation)?;

        let entry = instance
            .get_typed_func::<(), ()>(&mut store, &self.config.entry_point)
            .map_err(|_| RuntimeError::entry_not_found(&self.config.entry_point))?;

        let initial_fuel = get_remaining_fuel(&store).unwrap_or(0);
        let watchdog = self.config.timeout().map(|timeout| {
            Watchdog::arm(
                &self.handle,
                timeout,
                self.engine.clone(),
                Arc::clone(&kill),
                format!("{name}:{slot}"),
            )
        });

        let outcome = entry.call(&mut store, ());
        let timed_out = watchdog.is_some_and(Watchdog::disarm);

        let fuel_consumed = if self.engine.is_fuel_metered() {
            calculate_fuel_consumed(initial_fuel, &store)
        } else {
            0
        };

        let mut diagnostics = env.stderr();
        diagnostics.extend(store.data().render_logs());

        // Tears the instance down.
        drop(store);

        let status = classify(outcome, timed_out, self.config.timeout_ms);
        self.relay.schedule(name, slot, diagnostics.clone());

        if let Some(mut sink) = diagnostics_sink {
            if let Err(e) = sink.write_all(&diagnostics).and_then(|()| sink.flush()) {
                warn!(error = %e, "Failed to write diagnostics");
            }
        }

        if let Err(e) = status {
            warn!(error = %e, "Function failed");
            return Err(e);
        }

        let stdout = env.stdout();
        output
            .write_all(&stdout)
            .and_then(|()| output.flush())
            .map_err(RuntimeError::Write)?;

        let duration = start.elapsed();
        info!(
            fuel_consumed = fuel_consumed,
            "Took {} us ( {} ms )",
            duration.as_micros(),
            duration.as_millis()
        );

        Ok(InvocationResult {
            invocation_id,
            slot,
            duration,
            output_len: stdout.len(),
            fuel_consumed,
            diagnostics,
        })
    }

    /// The function configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The compiled module.
    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    /// The diagnostic relay.
    pub fn relay(&self) -> &LogRelay {
        &self.relay
    }
}

impl std::fmt::Debug for InstanceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bindings: Vec<&str> = self.bindings.iter().map(|b| b.name()).collect();
        f.debug_struct("InstanceRunner")
            .field("function", &self.config.name)
            .field("bindings", &bindings)
            .finish_non_exhaustive()
    }
}

/// Map the entry call's outcome to the invocation status.
///
/// A timeout is reported only when the watchdog fired and the call was
/// interrupted by it. `proc_exit` with status 0 is a normal return.
fn classify(
    outcome: wasmtime::Result<()>,
    timed_out: bool,
    timeout_ms: u64,
) -> Result<(), RuntimeError> {
    let Err(err) = outcome else {
        return Ok(());
    };

    if timed_out && is_interrupt(&err) {
        return Err(RuntimeError::Timeout {
            duration_ms: timeout_ms,
        });
    }

    if let Some(exit) = err.downcast_ref::<I32Exit>() {
        return match exit.0 {
            0 => Ok(()),
            code => Err(RuntimeError::execution(format!(
                "exited with status {code}"
            ))),
        };
    }

    if is_out_of_fuel(&err) {
        return Err(RuntimeError::FuelExhausted);
    }

    Err(RuntimeError::execution(format!("{err:#}")))
}

fn is_interrupt(error: &wasmtime::Error) -> bool {
    error.downcast_ref::<Trap>() == Some(&Trap::Interrupt)
}

/// Check if an error is due to fuel exhaustion.
fn is_out_of_fuel(error: &wasmtime::Error) -> bool {
    error
        .downcast_ref::<Trap>()
        .is_some_and(|trap| *trap == Trap::OutOfFuel)
}
