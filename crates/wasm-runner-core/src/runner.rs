//! The function runner facade.
//!
//! [`FunctionRunner`] owns everything a deployed function needs: the
//! compiled module, the sandbox manager, the slot pool and the executor.
//! Construction performs the warm start; [`FunctionRunner::run`] serves one
//! request.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{info, instrument, warn};

use crate::bindings::HostBindings;
use crate::instance::InstanceRunner;
use crate::pool::{SlotGuard, SlotPool};
use crate::request::{FunctionRequest, InvocationResult};
use crate::sandbox::SandboxManager;
use crate::{CompiledModule, WasmEngine};
use wasm_runner_common::{EngineConfig, RunnerConfig, RuntimeError};

/// A warm, ready-to-serve function.
///
/// # Example
///
/// ```ignore
/// let config = RunnerConfig::new("echo", "/srv/functions/echo");
/// let runner = FunctionRunner::new(&EngineConfig::default(), config, Vec::new())?;
///
/// let request = FunctionRequest::new(std::io::stdout()).with_input(std::io::stdin());
/// let result = runner.run(request).await?;
/// ```
pub struct FunctionRunner {
    config: Arc<RunnerConfig>,
    engine_config: EngineConfig,
    sandboxes: Arc<SandboxManager>,
    pool: SlotPool,
    executor: Arc<InstanceRunner>,
}

impl FunctionRunner {
    /// Warm-start a function from `<root>/bin/<name>`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the bytecode cannot
    /// be read or compiled, or the function root cannot be prepared.
    #[instrument(skip_all, fields(function = %config.name))]
    pub fn new(
        engine_config: &EngineConfig,
        config: RunnerConfig,
        bindings: Vec<Arc<dyn HostBindings>>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let engine = WasmEngine::new(engine_config)?;
        let module = CompiledModule::load(engine.inner(), config.bin_path())?;

        Self::with_module(engine, module, config, bindings)
    }

    /// Warm-start a function around an already compiled module.
    ///
    /// `module` must have been compiled by `engine`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, asks for more
    /// replicas than `engine` can instantiate, no Tokio runtime is available,
    /// or the function root cannot be prepared.
    pub fn with_module(
        engine: WasmEngine,
        module: CompiledModule,
        config: RunnerConfig,
        bindings: Vec<Arc<dyn HostBindings>>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let engine_config = engine.config().clone();
        engine_config.check_replicas(config.replicas)?;

        let handle = Handle::try_current().map_err(|_| {
            RuntimeError::invalid_config("FunctionRunner must be created inside a Tokio runtime")
        })?;

        let sandboxes = Arc::new(SandboxManager::establish(&config)?);
        let pool = SlotPool::new(config.replicas)?;

        info!(
            replicas = config.replicas,
            timeout_ms = config.timeout_ms,
            content_hash = %module.content_hash(),
            run_root = %sandboxes.run_root().display(),
            "Function ready"
        );

        let config = Arc::new(config);
        let executor = Arc::new(InstanceRunner::new(
            engine,
            Arc::new(module),
            Arc::clone(&config),
            bindings,
            handle,
        ));

        Ok(Self {
            config,
            engine_config,
            sandboxes,
            pool,
            executor,
        })
    }

    /// Serve one request.
    ///
    /// Waits for a free slot, then runs the module in a blocking task inside
    /// a fresh sandbox directory. The slot is held until the sandbox has been
    /// removed, even if the returned future is dropped early.
    ///
    /// # Errors
    ///
    /// Returns the invocation's failure, or [`RuntimeError::PoolClosed`]
    /// if the runner was shut down while waiting for a slot.
    pub async fn run(&self, request: FunctionRequest) -> Result<InvocationResult, RuntimeError> {
        let slot = self.pool.acquire().await?;

        let executor = Arc::clone(&self.executor);
        let sandboxes = Arc::clone(&self.sandboxes);

        tokio::task::spawn_blocking(move || run_in_slot(&executor, &sandboxes, slot, request))
            .await
            .map_err(|e| RuntimeError::execution(format!("Invocation task failed: {e}")))?
    }

    /// Current number of slots.
    pub fn read_scale(&self) -> u32 {
        self.pool.capacity()
    }

    /// Grow the slot pool to `replicas`.
    ///
    /// Requests below the current capacity are accepted and leave the pool
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Capacity`] if `replicas` is 0 or above
    /// [`EngineConfig::replica_limit`].
    pub fn scale(&self, replicas: u32) -> Result<(), RuntimeError> {
        self.engine_config.check_replicas(replicas)?;
        self.pool.grow_to(replicas)?;

        info!(function = %self.config.name, replicas = self.pool.capacity(), "Scaled");
        Ok(())
    }

    /// Stop handing out slots. Pending and future requests fail with
    /// [`RuntimeError::PoolClosed`]; running invocations finish.
    pub fn shutdown(&self) {
        self.pool.close();
    }

    /// Wait until diagnostics of finished invocations have been relayed.
    pub async fn drain_logs(&self) {
        self.executor.relay().drain().await;
    }

    /// The function configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The compiled module.
    pub fn module(&self) -> &CompiledModule {
        self.executor.module()
    }

    /// The sandbox manager.
    pub fn sandboxes(&self) -> &SandboxManager {
        &self.sandboxes
    }

    /// The slot pool.
    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }
}

impl std::fmt::Debug for FunctionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRunner")
            .field("function", &self.config.name)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Body of one invocation's blocking task.
///
/// The slot is released only after the sandbox is gone.
fn run_in_slot(
    executor: &InstanceRunner,
    sandboxes: &SandboxManager,
    slot: SlotGuard,
    request: FunctionRequest,
) -> Result<InvocationResult, RuntimeError> {
    let sandbox = sandboxes.prepare(slot.id())?;

    let result = executor.execute(slot.id(), sandbox.path(), sandboxes.data_dir(), request);
    let teardown = sandbox.remove();
    slot.release();

    match (result, teardown) {
        (Ok(result), Ok(())) => Ok(result),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown)) => {
            warn!(error = %teardown, "Sandbox left behind after failed invocation");
            Err(e)
        }
    }
}
