//! Function bytecode loading and compilation.
//!
//! The served function is compiled exactly once, at warm start, from
//! `<root>/bin/<name>`. The resulting [`CompiledModule`] is immutable and
//! every slot instantiates the same one.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use tracing::{info, instrument};
use wasmtime::{Engine, ExternType, Module};

use wasm_runner_common::RuntimeError;

const WASM_MAGIC: &[u8; 4] = b"\0asm";
const WASM_VERSION: &[u8; 4] = &[0x01, 0x00, 0x00, 0x00];

/// The function's compiled code.
#[derive(Clone)]
pub struct CompiledModule {
    module: Module,
    content_hash: String,
    source_len: usize,
}

impl CompiledModule {
    /// Read and compile the bytecode at `path`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Load`] if the file cannot be read,
    /// [`RuntimeError::Compile`] if it is not a valid core module.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let bytes =
            std::fs::read(path).map_err(|e| RuntimeError::load(path.display().to_string(), e))?;

        Self::from_bytes(engine, &bytes)
    }

    /// Compile a binary core module.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Compile`] if the header is wrong or Wasmtime
    /// rejects the module.
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        check_header(bytes)?;
        Self::compile(engine, bytes)
    }

    /// Compile a module written in the WebAssembly text format.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Compile`] if the text does not parse or
    /// validate.
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        Self::compile(engine, wat.as_bytes())
    }

    fn compile(engine: &Engine, source: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();
        let module =
            Module::new(engine, source).map_err(|e| RuntimeError::compile(format!("{e:#}")))?;
        let content_hash = content_hash(source);

        info!(
            content_hash = %content_hash,
            source_len = source.len(),
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(Self {
            module,
            content_hash,
            source_len: source.len(),
        })
    }

    /// Hex digest of the source bytes, used to tell deployments apart in logs.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Size of the source the module was compiled from.
    pub fn source_len(&self) -> usize {
        self.source_len
    }

    /// The Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.module
    }

    /// Whether the module exports a function called `name`.
    pub fn has_export(&self, name: &str) -> bool {
        matches!(self.module.get_export(name), Some(ExternType::Func(_)))
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .field("source_len", &self.source_len)
            .finish_non_exhaustive()
    }
}

/// Accept only version 1 binary core modules.
fn check_header(bytes: &[u8]) -> Result<(), RuntimeError> {
    let Some((magic, rest)) = bytes.split_first_chunk::<4>() else {
        return Err(RuntimeError::compile("not a WebAssembly binary: file too small"));
    };
    if magic != WASM_MAGIC {
        return Err(RuntimeError::compile("not a WebAssembly binary: bad magic number"));
    }
    match rest.first_chunk::<4>() {
        Some(version) if version == WASM_VERSION => Ok(()),
        Some(_) => Err(RuntimeError::compile("unsupported WebAssembly binary version")),
        None => Err(RuntimeError::compile("not a WebAssembly binary: file too small")),
    }
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
