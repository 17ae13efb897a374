//! Per-run scratch workspace.
//!
//! Each run assembles the output filesystem tree in a uniquely named
//! directory under the system temp dir. The name carries a random run id so
//! rapid repeated invocations never collide, and creation force-removes any
//! stale directory at the same path so a crashed prior run cannot corrupt a
//! new one.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Mutable staging directory owned by exactly one run.
///
/// The directory is removed on drop if [`cleanup`](Self::cleanup) has not
/// already run, so every exit path (including panics) releases it.
#[derive(Debug)]
pub struct ScratchWorkspace {
    path: PathBuf,
    cleaned: bool,
}

impl ScratchWorkspace {
    /// Create a fresh workspace under `base_dir` named with a new run id.
    pub fn create(base_dir: &Path) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        Self::create_with_id(base_dir, &run_id)
    }

    /// Create a workspace with a caller-supplied run id.
    pub fn create_with_id(base_dir: &Path, run_id: &str) -> Result<Self> {
        let path = base_dir.join(format!("wimswap-build-{run_id}"));
        if path.exists() {
            fs::remove_dir_all(&path).with_context(|| {
                format!(
                    "removing stale scratch directory before recreation '{}'",
                    path.display()
                )
            })?;
        }
        fs::create_dir_all(&path)
            .with_context(|| format!("creating scratch directory '{}'", path.display()))?;
        Ok(Self {
            path,
            cleaned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the workspace tree.
    ///
    /// Callers treat a failure here as non-fatal; the drop guard will not
    /// retry once this has been attempted.
    pub fn cleanup(&mut self) -> Result<()> {
        self.cleaned = true;
        if self.path.exists() {
            fs::remove_dir_all(&self.path).with_context(|| {
                format!("removing scratch directory '{}'", self.path.display())
            })?;
        }
        Ok(())
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        if !self.cleaned && self.path.exists() {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}
