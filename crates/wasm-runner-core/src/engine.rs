//! The shared Wasmtime engine.
//!
//! One [`WasmEngine`] exists per function. Every invocation compiles against
//! it and runs on it from a blocking thread, so it is configured for
//! synchronous calls. Epoch interruption is always compiled in: it is how
//! the watchdog reaches into a running instance.

use std::sync::Arc;

use tracing::{debug, info};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, OptLevel, PoolingAllocationConfig};

use wasm_runner_common::{EngineConfig, RuntimeError};

const MIB: usize = 1024 * 1024;

/// Cheaply cloneable handle to the function's engine.
///
/// Holds no per-invocation state. Clones share the same epoch counter, which
/// the [`Watchdog`](crate::watchdog::Watchdog) advances when a timeout fires.
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Build the engine described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if Wasmtime rejects the
    /// settings, for example a pooling allocator that cannot reserve its
    /// memory.
    pub fn new(config: &EngineConfig) -> Result<Self, RuntimeError> {
        let engine = Engine::new(&wasmtime_config(config)).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            pooling_allocator = config.pooling_allocator,
            fuel_metering = config.fuel_metering,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// The underlying Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// The settings this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Advance the epoch.
    ///
    /// Every running store reaches its deadline and checks its own kill
    /// flag. Stores whose flag is clear keep running.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Whether stores are fuelled.
    pub fn is_fuel_metered(&self) -> bool {
        self.config.fuel_metering
    }

    /// Whether instances come from the pooling allocator.
    pub fn is_pooling_enabled(&self) -> bool {
        self.config.pooling_allocator
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("fuel_metering", &self.config.fuel_metering)
            .finish_non_exhaustive()
    }
}

fn wasmtime_config(config: &EngineConfig) -> Config {
    let mut wasmtime = Config::new();
    wasmtime
        .epoch_interruption(true)
        .consume_fuel(config.fuel_metering)
        .cranelift_opt_level(OptLevel::Speed);

    if config.pooling_allocator {
        debug!(
            max_instances = config.max_instances,
            instance_memory_mb = config.instance_memory_mb,
            "Using pooling allocator"
        );
        wasmtime.allocation_strategy(InstanceAllocationStrategy::Pooling(pooling(config)));
    }

    wasmtime
}

/// One memory and one table per instance, `max_instances` of each.
fn pooling(config: &EngineConfig) -> PoolingAllocationConfig {
    let mut pool = PoolingAllocationConfig::default();
    pool.total_core_instances(config.max_instances)
        .total_memories(config.max_instances)
        .total_tables(config.max_instances)
        .max_memory_size(config.instance_memory_mb as usize * MIB);
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::Store;

    #[test]
    fn test_default_engine() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();

        assert!(!engine.is_pooling_enabled());
        assert!(!engine.is_fuel_metered());
        assert!(format!("{engine:?}").contains("fuel_metering: false"));
    }

    #[test]
    fn test_pooling_engine() {
        let engine = WasmEngine::new(&EngineConfig {
            pooling_allocator: true,
            max_instances: 8,
            ..Default::default()
        })
        .unwrap();

        assert!(engine.is_pooling_enabled());
    }

    #[test]
    fn test_fuel_requires_metering() {
        let plain = WasmEngine::new(&EngineConfig::default()).unwrap();
        assert!(Store::new(plain.inner(), ()).set_fuel(10).is_err());

        let metered = WasmEngine::new(&EngineConfig {
            fuel_metering: true,
            ..Default::default()
        })
        .unwrap();
        assert!(Store::new(metered.inner(), ()).set_fuel(10).is_ok());
    }

    #[test]
    fn test_clones_share_epoch() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let clone = engine.clone();

        clone.increment_epoch();
        assert!(Arc::ptr_eq(&engine.engine, &clone.engine));
    }
}
