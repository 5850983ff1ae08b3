//! Wall-clock timeout enforcement.
//!
//! A [`Watchdog`] is armed right before the entry export is called. If the
//! timeout elapses first, a task on the runtime sets the invocation's kill
//! flag and bumps the engine epoch; the store traps at its next epoch check
//! and the instance is torn down when the store is dropped.
//!
//! Dropping the watchdog disarms it. A firing that races a call which has
//! already returned only sets a flag nobody reads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::WasmEngine;

/// An armed timeout for one invocation.
#[derive(Debug)]
pub struct Watchdog {
    kill: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Watchdog {
    /// Arm a watchdog that kills the store watching `kill` after `timeout`.
    pub fn arm(
        handle: &Handle,
        timeout: Duration,
        engine: WasmEngine,
        kill: Arc<AtomicBool>,
        label: String,
    ) -> Self {
        let flag = Arc::clone(&kill);
        let task = handle.spawn(async move {
            tokio::time::sleep(timeout).await;

            flag.store(true, Ordering::Release);
            warn!(
                function = %label,
                timeout_ms = timeout.as_millis(),
                "Function was killed by ExecTimeout"
            );
            engine.increment_epoch();
        });

        Self { kill, task }
    }

    /// Check whether the timeout has elapsed.
    pub fn fired(&self) -> bool {
        self.kill.load(Ordering::Acquire)
    }

    /// Disarm the watchdog, returning whether it had already fired.
    pub fn disarm(self) -> bool {
        self.fired()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_runner_common::EngineConfig;

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_watchdog_fires_after_timeout() {
        let kill = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::arm(
            &Handle::current(),
            Duration::from_millis(10),
            engine(),
            Arc::clone(&kill),
            "test:0".into(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(watchdog.fired());
        assert!(kill.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_disarmed_watchdog_never_fires() {
        let kill = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::arm(
            &Handle::current(),
            Duration::from_millis(20),
            engine(),
            Arc::clone(&kill),
            "test:0".into(),
        );

        assert!(!watchdog.disarm());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!kill.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_disarm_after_firing_is_harmless() {
        let kill = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::arm(
            &Handle::current(),
            Duration::from_millis(1),
            engine(),
            Arc::clone(&kill),
            "test:0".into(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(watchdog.disarm());
    }
}
