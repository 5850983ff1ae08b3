//! Per-slot sandbox directories.
//!
//! [`SandboxManager`] owns the function root `<root>/run/<name>` and hands
//! out one [`SandboxDir`] per invocation, named by slot id. Entries of the
//! shared data directory `<root>/data/<name>/` are symlinked into every
//! sandbox so concurrent slots share read-only inputs while their writes stay
//! isolated.
//!
//! ```text
//! <root>/run/<name>/
//! ├── 0/              slot 0, live while its invocation runs
//! │   ├── model.bin -> <root>/data/<name>/model.bin
//! │   └── out.txt     written by the module
//! └── 1/
//!     └── model.bin -> <root>/data/<name>/model.bin
//! ```

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use wasm_runner_common::{RunnerConfig, RuntimeError};

/// Owner of the function root and of every live sandbox directory.
#[derive(Debug)]
pub struct SandboxManager {
    /// Absolute function root.
    run_root: PathBuf,

    /// Absolute shared data directory, when one exists.
    data_dir: Option<PathBuf>,

    /// Live sandbox directories by slot id.
    live: Arc<DashMap<u16, PathBuf>>,
}

impl SandboxManager {
    /// Establish the function root for `config`.
    ///
    /// Stale contents from a previous process are removed and the root is
    /// recreated, then resolved to an absolute path that anchors every
    /// sandbox. The shared data directory is recorded if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::DirectorySetup`] if the root cannot be
    /// established. The runner cannot serve any request in that case.
    #[instrument(skip(config), fields(function = %config.name))]
    pub fn establish(config: &RunnerConfig) -> Result<Self, RuntimeError> {
        let run_root = config.run_root();
        let setup_err = |e| RuntimeError::directory_setup(run_root.display().to_string(), e);

        if run_root.exists() {
            debug!(path = %run_root.display(), "Removing stale function root");
            fs::remove_dir_all(&run_root).map_err(setup_err)?;
        }
        fs::create_dir_all(&run_root).map_err(setup_err)?;
        let run_root = fs::canonicalize(&run_root).map_err(setup_err)?;

        let data_root = config.data_root();
        let data_dir = match fs::metadata(&data_root) {
            Ok(meta) if meta.is_dir() => Some(fs::canonicalize(&data_root).map_err(|e| {
                RuntimeError::directory_setup(data_root.display().to_string(), e)
            })?),
            Ok(_) => {
                warn!(path = %data_root.display(), "Shared data path is not a directory, ignoring");
                None
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(RuntimeError::directory_setup(
                    data_root.display().to_string(),
                    e,
                ));
            }
        };

        info!(
            run_root = %run_root.display(),
            data_dir = ?data_dir,
            "Function root established"
        );

        Ok(Self {
            run_root,
            data_dir,
            live: Arc::new(DashMap::new()),
        })
    }

    /// Create a fresh sandbox directory for `slot`.
    ///
    /// A directory left behind for the same slot is removed first. On
    /// success the returned guard owns the directory; dropping it without
    /// calling [`SandboxDir::remove`] still removes it.
    ///
    /// The shared-data links point outside the sandbox, so the guest cannot
    /// follow them; they exist for host-side inspection. Guests read shared
    /// data through the read-only mount at [`DATA_MOUNT`](crate::DATA_MOUNT).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::DirectorySetup`] if the slot already has a
    /// live sandbox, or if the directory or its shared-data links cannot be
    /// created.
    pub fn prepare(&self, slot: u16) -> Result<SandboxDir, RuntimeError> {
        let path = self.slot_path(slot);
        let setup_err = |e| RuntimeError::directory_setup(path.display().to_string(), e);

        if self.live.contains_key(&slot) {
            return Err(setup_err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("slot {slot} already has a live sandbox"),
            )));
        }

        if path.exists() {
            debug!(slot, "Removing stale sandbox directory");
            fs::remove_dir_all(&path).map_err(setup_err)?;
        }
        fs::create_dir(&path).map_err(setup_err)?;

        self.live.insert(slot, path.clone());
        let sandbox = SandboxDir {
            slot,
            path,
            live: Arc::clone(&self.live),
            removed: false,
        };

        // The guard cleans up if linking fails halfway
        self.link_shared_data(&sandbox.path)?;

        debug!(slot, path = %sandbox.path.display(), "Sandbox prepared");
        Ok(sandbox)
    }

    /// Symlink every entry of the shared data directory into `dir`.
    fn link_shared_data(&self, dir: &Path) -> Result<(), RuntimeError> {
        let Some(data_dir) = &self.data_dir else {
            return Ok(());
        };
        let data_err = |e| RuntimeError::directory_setup(data_dir.display().to_string(), e);

        for entry in fs::read_dir(data_dir).map_err(data_err)? {
            let entry = entry.map_err(data_err)?;
            let link = dir.join(entry.file_name());
            symlink(entry.path(), &link)
                .map_err(|e| RuntimeError::directory_setup(link.display().to_string(), e))?;
        }

        Ok(())
    }

    /// The absolute function root.
    pub fn run_root(&self) -> &Path {
        &self.run_root
    }

    /// The absolute shared data directory, if one was found at startup.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Directory used by `slot`.
    pub fn slot_path(&self, slot: u16) -> PathBuf {
        self.run_root.join(slot.to_string())
    }

    /// Check whether `slot` currently has a live sandbox.
    pub fn is_live(&self, slot: u16) -> bool {
        self.live.contains_key(&slot)
    }

    /// Number of live sandboxes.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// A live sandbox directory owned by one invocation.
#[derive(Debug)]
pub struct SandboxDir {
    slot: u16,
    path: PathBuf,
    live: Arc<DashMap<u16, PathBuf>>,
    removed: bool,
}

impl SandboxDir {
    /// The slot this sandbox belongs to.
    pub fn slot(&self) -> u16 {
        self.slot
    }

    /// Absolute path of the sandbox.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recursively remove the sandbox.
    ///
    /// Symlinked shared inputs are unlinked, never followed.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::SandboxTeardown`] if the directory could not
    /// be removed. The slot is released for reuse either way; the next
    /// [`SandboxManager::prepare`] for it clears what was left behind.
    pub fn remove(mut self) -> Result<(), RuntimeError> {
        self.removed = true;
        self.live.remove(&self.slot);

        fs::remove_dir_all(&self.path)
            .map_err(|e| RuntimeError::sandbox_teardown(self.path.display().to_string(), e))?;

        debug!(slot = self.slot, "Sandbox removed");
        Ok(())
    }
}

impl Drop for SandboxDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }

        self.live.remove(&self.slot);
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(slot = self.slot, error = %e, "Failed to remove sandbox directory");
        }
    }
}
