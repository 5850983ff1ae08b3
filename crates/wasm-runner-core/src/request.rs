//! Invocation input and result types.

use std::io::{Read, Write};
use std::time::Duration;

/// One invocation's input stream and output sink.
///
/// Decoding a transport request into a `FunctionRequest` is the front-end's
/// job. The runner reads the input to its end and closes it before the
/// module starts; the module's standard output is written to the sink once
/// the entry export returns successfully.
///
/// Diagnostics reach the optional diagnostics sink whatever the outcome,
/// which is the only way to see them when the invocation fails.
pub struct FunctionRequest {
    pub(crate) input: Option<Box<dyn Read + Send>>,
    pub(crate) output: Box<dyn Write + Send>,
    pub(crate) diagnostics: Option<Box<dyn Write + Send>>,
}

impl FunctionRequest {
    /// Create a request without input, writing output to `output`.
    pub fn new(output: impl Write + Send + 'static) -> Self {
        Self {
            input: None,
            output: Box::new(output),
            diagnostics: None,
        }
    }

    /// Attach an input stream, exposed to the module as standard input.
    #[must_use]
    pub fn with_input(mut self, input: impl Read + Send + 'static) -> Self {
        self.input = Some(Box::new(input));
        self
    }

    /// Copy the invocation's diagnostics to `sink`, on success and failure.
    #[must_use]
    pub fn with_diagnostics(mut self, sink: impl Write + Send + 'static) -> Self {
        self.diagnostics = Some(Box::new(sink));
        self
    }

    /// Check whether the request carries an input stream.
    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }
}

impl std::fmt::Debug for FunctionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRequest")
            .field("has_input", &self.has_input())
            .field("has_diagnostics", &self.diagnostics.is_some())
            .finish_non_exhaustive()
    }
}

/// Outcome of a successful invocation.
///
/// Failures are reported as [`RuntimeError`](wasm_runner_common::RuntimeError).
/// Their diagnostics are relayed to the process log and written to the
/// request's diagnostics sink, if it has one.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    /// Unique invocation identifier.
    pub invocation_id: String,

    /// Slot the invocation ran in.
    pub slot: u16,

    /// Wall-clock time from environment setup to output written.
    pub duration: Duration,

    /// Bytes written to the output sink.
    pub output_len: usize,

    /// Fuel consumed, when fuel metering is enabled.
    pub fuel_consumed: u64,

    /// Captured standard error followed by guest log lines.
    pub diagnostics: Vec<u8>,
}
