//! Scoped process-global state
//!
//! The working directory and individual environment variables are process
//! globals. These guards change them on construction and restore the previous
//! value when dropped, which also happens while unwinding from a panic.

use crate::errors::{BuildError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Changes the working directory and restores it on drop
#[derive(Debug)]
pub struct WorkingDirGuard {
    original: PathBuf,
}

impl WorkingDirGuard {
    pub fn enter(dir: &Path) -> Result<Self> {
        let original = std::env::current_dir().map_err(|e| BuildError::io(".", e))?;
        std::env::set_current_dir(dir).map_err(|e| BuildError::io(dir, e))?;
        debug!(
            "Working directory: {} (was {})",
            dir.display(),
            original.display()
        );
        Ok(Self { original })
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.original) {
            warn!(
                "Failed to restore working directory {}: {}",
                self.original.display(),
                e
            );
        }
    }
}

/// Sets an environment variable and restores its previous state on drop
#[derive(Debug)]
pub struct EnvVarGuard {
    name: String,
    previous: Option<OsString>,
}

impl EnvVarGuard {
    pub fn set(name: &str, value: &str) -> Self {
        let previous = std::env::var_os(name);
        std::env::set_var(name, value);
        debug!("Set {}={}", name, value);
        Self {
            name: name.to_string(),
            previous,
        }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => std::env::set_var(&self.name, value),
            None => std::env::remove_var(&self.name),
        }
        debug!("Restored {}", self.name);
    }
}
