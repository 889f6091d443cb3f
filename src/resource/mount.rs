//! Filesystem mounts.

use std::path::PathBuf;

use anyhow::Result;

use crate::context::BuildContext;
use crate::error::BuilderError;
use crate::process::Cmd;
use crate::session::Session;
use crate::step::{Release, ResourceStep};

/// Mount a device, unmounted at scope exit.
pub struct MountFs {
    fs_type: String,
    device: PathBuf,
    target: PathBuf,
    options: Option<String>,
}

impl MountFs {
    pub fn new(
        fs_type: impl Into<String>,
        device: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
    ) -> Self {
        MountFs {
            fs_type: fs_type.into(),
            device: device.into(),
            target: target.into(),
            options: None,
        }
    }

    /// Extra `-o` mount options.
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }
}

impl ResourceStep for MountFs {
    type Output = PathBuf;
    type Handle = MountPoint;

    fn name(&self) -> &str {
        "mount"
    }

    fn flatten(&self) -> bool {
        true
    }

    fn acquire(
        self,
        _s: &mut Session,
        _ctx: &mut BuildContext,
    ) -> Result<(PathBuf, MountPoint)> {
        let mut cmd = Cmd::new("mount")
            .args(["-t", &self.fs_type])
            .arg(&self.device)
            .arg(&self.target);
        if let Some(options) = &self.options {
            cmd = cmd.args(["-o", options]);
        }
        let status = cmd.allow_fail().run()?;
        if !status.success() {
            return Err(BuilderError::ResourceAcquisition(format!(
                "mounting {} on {} failed: {}",
                self.device.display(),
                self.target.display(),
                status
            ))
            .into());
        }
        Ok((
            self.target.clone(),
            MountPoint {
                target: self.target,
            },
        ))
    }
}

/// Unmounts on release; a failed unmount is logged and otherwise ignored.
pub struct MountPoint {
    target: PathBuf,
}

impl Release for MountPoint {
    fn release(&mut self, s: &mut Session) -> Result<()> {
        let status = Cmd::new("umount")
            .arg(&self.target)
            .allow_fail()
            .run()?;
        if !status.success() {
            s.warning(format!("umount returned {status}"));
        }
        Ok(())
    }
}
