//! Temporary directory acquisition.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::context::BuildContext;
use crate::error::BuilderError;
use crate::session::Session;
use crate::step::{Release, ResourceStep};

/// Create a scratch directory, removed (with contents) at scope exit.
pub struct Mkdtemp {
    base: Option<PathBuf>,
}

impl Mkdtemp {
    /// Create under the system temp directory.
    pub fn new() -> Self {
        Mkdtemp { base: None }
    }

    /// Create under `base` instead, keeping the scratch space on the same
    /// filesystem as the build outputs.
    pub fn in_dir(base: impl Into<PathBuf>) -> Self {
        Mkdtemp {
            base: Some(base.into()),
        }
    }
}

impl Default for Mkdtemp {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStep for Mkdtemp {
    type Output = PathBuf;
    type Handle = TempDirHandle;

    fn name(&self) -> &str {
        "mkdtemp"
    }

    fn acquire(
        self,
        s: &mut Session,
        _ctx: &mut BuildContext,
    ) -> Result<(PathBuf, TempDirHandle)> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("build.");
            b
        };
        let dir = match &self.base {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
        .map_err(|err| BuilderError::ResourceAcquisition(format!("mkdtemp: {err}")))?;

        // Lifetime is managed by the cleanup stack, not RAII drop.
        let path = dir.into_path();
        s.debug(format!("Created temporary directory {}", path.display()));
        Ok((path.clone(), TempDirHandle { path }))
    }
}

/// Removes the directory tree on release.
pub struct TempDirHandle {
    path: PathBuf,
}

impl Release for TempDirHandle {
    fn release(&mut self, s: &mut Session) -> Result<()> {
        s.debug(format!(
            "Removing temporary directory {}",
            self.path.display()
        ));
        fs::remove_dir_all(&self.path)
            .with_context(|| format!("removing {}", self.path.display()))
    }
}
