//! Asynchronous relay of captured diagnostics to the process log.
//!
//! Each invocation's diagnostic bytes are split on newlines and emitted
//! through `tracing` under the `function` target, in order, from a task of
//! their own. Lines from different invocations may interleave.

use std::borrow::Cow;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Log target used for relayed function output.
pub const RELAY_TARGET: &str = "function";

/// Forwards diagnostic output to the process log sink.
#[derive(Debug, Clone)]
pub struct LogRelay {
    handle: Handle,
    prefix: bool,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl LogRelay {
    /// Create a relay spawning onto `handle`.
    ///
    /// With `prefix` set, every line is prefixed with `<function>:<slot>`.
    pub fn new(handle: Handle, prefix: bool) -> Self {
        Self {
            handle,
            prefix,
            pending: Arc::default(),
        }
    }

    /// Check whether lines are prefixed.
    pub fn is_prefixed(&self) -> bool {
        self.prefix
    }

    /// Relay `diagnostics` in the background. Never blocks the caller.
    ///
    /// Returns `false` when there is nothing to relay.
    pub fn schedule(&self, function: &str, slot: u16, diagnostics: Vec<u8>) -> bool {
        if diagnostics.is_empty() {
            return false;
        }

        let source = format!("{function}:{slot}");
        let prefix = self.prefix;
        let task = self.handle.spawn(async move {
            debug!(source = %source, "Started logging from function");
            for line in format_lines(&source, &diagnostics, prefix) {
                info!(target: RELAY_TARGET, "{line}");
            }
        });

        let mut pending = self.pending.lock();
        pending.retain(|task| !task.is_finished());
        pending.push(task);
        true
    }

    /// Wait for every relay scheduled so far to finish.
    pub async fn drain(&self) {
        let tasks = std::mem::take(&mut *self.pending.lock());
        for task in tasks {
            // Only fails if the runtime is shutting down.
            let _ = task.await;
        }
    }
}

/// Split `bytes` into lines, prefixing each with `source` when asked.
///
/// A trailing newline does not produce an empty final line; `\r\n` endings
/// are trimmed; invalid UTF-8 is replaced.
pub fn format_lines(source: &str, bytes: &[u8], prefix: bool) -> Vec<String> {
    split_lines(bytes)
        .map(|line| {
            if prefix {
                format!("{source}: {line}")
            } else {
                line.into_owned()
            }
        })
        .collect()
}

fn split_lines(bytes: &[u8]) -> impl Iterator<Item = Cow<'_, str>> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let empty = bytes.is_empty();

    body.split(|&b| b == b'\n')
        .filter(move |_| !empty)
        .map(|line| String::from_utf8_lossy(line.strip_suffix(b"\r").unwrap_or(line)))
}
