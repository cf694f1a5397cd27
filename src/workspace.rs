//! Job-scoped working directory.
//!
//! A [`Workspace`] owns one directory per job. Stages ask it for paths
//! ([`Workspace::allocate`]) and for self-deleting temp files
//! ([`Workspace::scoped_temp`]). The [`TeardownGuard`] ties the directory's
//! lifetime to the job driver: unless the guard is told which files to keep,
//! dropping it removes the whole tree, on success, error, panic or
//! cancellation alike.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::error::{OverwatchError, Result};

#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    torn_down: AtomicBool,
}

impl Workspace {
    /// Creates (or clears and recreates) `<base>/<job_id>`.
    pub fn prepare(base: &Path, job_id: &str) -> Result<Self> {
        validate_name(job_id)?;
        let dir = base.join(job_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "workspace prepared");
        Ok(Self {
            dir,
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path for `name` inside the workspace without creating it.
    pub fn allocate(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Returns a handle whose drop deletes the file at `name`.
    pub fn scoped_temp(&self, name: &str) -> Result<ScopedTemp> {
        Ok(ScopedTemp {
            path: self.allocate(name)?,
        })
    }

    /// Writes `contents` to `name` via a sibling temp file and a rename, so
    /// readers never observe a partially written file.
    pub fn write_atomic(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let target = self.allocate(name)?;
        let staging = self.allocate(&format!("{name}.partial"))?;
        std::fs::write(&staging, contents)?;
        if let Err(err) = std::fs::rename(&staging, &target) {
            let _ = std::fs::remove_file(&staging);
            return Err(err.into());
        }
        Ok(target)
    }

    /// Removes every entry in the workspace except the named files.
    pub fn release_temporaries(&self, keep: &[&str]) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if keep.iter().any(|k| name == **k) {
                continue;
            }
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Removes the entire workspace tree. Safe to call more than once.
    pub fn teardown(&self) -> Result<()> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                debug!(dir = %self.dir.display(), "workspace torn down");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                self.torn_down.store(false, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(OverwatchError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid workspace entry name `{name}`"),
        ))),
    }
}

/// A workspace file that is deleted when the handle is dropped.
#[derive(Debug)]
pub struct ScopedTemp {
    path: PathBuf,
}

impl ScopedTemp {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedTemp {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "failed to remove temp file"),
        }
    }
}

/// Tears the workspace down on drop unless [`TeardownGuard::keep`] ran.
pub struct TeardownGuard {
    workspace: Arc<Workspace>,
    armed: bool,
}

impl TeardownGuard {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            armed: true,
        }
    }

    /// Releases every temp artifact except `files` and disarms the guard.
    /// If the release fails the guard stays armed and tears the tree down.
    pub fn keep(mut self, files: &[&str]) -> Result<()> {
        self.workspace.release_temporaries(files)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if self.armed
            && let Err(err) = self.workspace.teardown()
        {
            warn!(dir = %self.workspace.dir().display(), error = %err, "workspace teardown failed");
        }
    }
}
