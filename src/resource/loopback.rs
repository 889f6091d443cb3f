//! Loop device attachment.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::context::BuildContext;
use crate::error::BuilderError;
use crate::process::Cmd;
use crate::session::Session;
use crate::step::{Release, ResourceStep};

/// Attach an image file to a free loop device, detached at scope exit.
pub struct LoopbackAttach {
    image: PathBuf,
    offset: u64,
    size_limit: Option<u64>,
    partscan: bool,
}

impl LoopbackAttach {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        LoopbackAttach {
            image: image.into(),
            offset: 0,
            size_limit: None,
            partscan: false,
        }
    }

    /// Expose the device starting at `offset` bytes into the image.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn size_limit(mut self, limit: u64) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// Ask the kernel to scan the attached device for partitions.
    pub fn partscan(mut self) -> Self {
        self.partscan = true;
        self
    }
}

impl ResourceStep for LoopbackAttach {
    type Output = PathBuf;
    type Handle = LoopDevice;

    fn name(&self) -> &str {
        "loopback_attach"
    }

    fn acquire(
        self,
        s: &mut Session,
        _ctx: &mut BuildContext,
    ) -> Result<(PathBuf, LoopDevice)> {
        let mut cmd = Cmd::new("losetup").args([
            "--offset",
            &self.offset.to_string(),
            "--show",
            "--find",
        ]);
        if self.partscan {
            cmd = cmd.arg("--partscan");
        }
        if let Some(limit) = self.size_limit {
            cmd = cmd.args(["--sizelimit", &limit.to_string()]);
        }
        let device = cmd
            .arg(&self.image)
            .error_msg(format!(
                "attaching loop device for {}",
                self.image.display()
            ))
            .run_capture()?;

        let device = PathBuf::from(device);
        if !device.exists() {
            return Err(BuilderError::ResourceAcquisition(format!(
                "loop device not found: {}",
                device.display()
            ))
            .into());
        }
        s.debug(format!("Using loopback device {}", device.display()));
        Ok((device.clone(), LoopDevice { device }))
    }
}

/// Detaches the device on release. Detach failures are logged and
/// otherwise ignored; the device is already orphaned at that point.
pub struct LoopDevice {
    device: PathBuf,
}

impl LoopDevice {
    pub fn path(&self) -> &Path {
        &self.device
    }
}

impl Release for LoopDevice {
    fn release(&mut self, s: &mut Session) -> Result<()> {
        s.debug(format!(
            "Detaching loopback device {}",
            self.device.display()
        ));
        let status = Cmd::new("losetup")
            .arg("-d")
            .arg(&self.device)
            .allow_fail()
            .run()?;
        if !status.success() {
            s.warning(format!("losetup -d returned {status}"));
        }
        Ok(())
    }
}
