//! Raspberry Pi boot firmware checkout and Debian packaging.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::SourceConfig;
use crate::context::BuildContext;
use crate::process::Cmd;
use crate::recipe::checks::CheckFakeroot;
use crate::recipe::deb::{self, DebSpec};
use crate::recipe::fsutil;
use crate::recipe::git::DownloadGit;
use crate::session::Session;
use crate::step::Step;

/// Fetch the firmware tree, preferring the checkout archive cache; the
/// tree is large and never compiled, so a cached copy saves the clone.
pub struct CloneFirmware {
    pub source: SourceConfig,
    pub archive_dir: PathBuf,
    pub architecture: String,
}

impl Step for CloneFirmware {
    type Output = ();

    fn name(&self) -> &str {
        "clone_firmware"
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        let tree = s.invoke(
            ctx,
            DownloadGit {
                name: "firmware".into(),
                url: self.source.url.clone(),
                rev: self.source.rev.clone(),
                archive_dir: self.archive_dir,
                work_dir: ctx.tmp.clone(),
            },
        )?;

        ctx.firmware = Some(tree);
        ctx.firmware_deb_dir = Some(ctx.tmp.join("firmware-deb"));
        ctx.firmware_deb = Some(ctx.tmp.join(format!(
            "raspberrypi-firmware-git-{}-1_{}.deb",
            ctx.stamp, self.architecture
        )));
        Ok(())
    }
}

/// Stage and build the firmware Debian package. Runs under fakeroot.
pub struct CreateFirmwareDeb {
    pub maintainer: String,
    pub architecture: String,
}

impl Step for CreateFirmwareDeb {
    type Output = ();

    fn name(&self) -> &str {
        "create_firmware_deb"
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        s.invoke_once(ctx, CheckFakeroot)?;

        let firmware = ctx
            .firmware
            .clone()
            .context("firmware tree not checked out")?;
        let deb_dir = ctx
            .firmware_deb_dir
            .clone()
            .context("firmware deb staging dir not set")?;
        let deb = ctx
            .firmware_deb
            .clone()
            .context("firmware deb path not set")?;

        fsutil::install_dir(s, &deb_dir, 0, 0, 0o755)?;
        fsutil::install_dir(s, &deb_dir.join("boot"), 0, 0, 0o755)?;

        let firmware_dest = deb_dir.join("boot/firmware");
        fsutil::copy_tree(s, &firmware.join("boot"), &firmware_dest)?;

        // The kernel packages ship their own images; the firmware package
        // must not overwrite them.
        for stock_kernel in ["kernel.img", "kernel7.img"] {
            let path = firmware_dest.join(stock_kernel);
            if path.exists() {
                fsutil::remove_file(s, &path)?;
            }
        }

        Cmd::new("chmod")
            .args(["-R", "u=rwX,g=rX,o=rX"])
            .arg(&firmware_dest)
            .error_msg("normalizing firmware permissions")
            .run()?;

        deb::write_control(
            s,
            &deb_dir,
            &DebSpec {
                package: "raspberrypi-firmware-git".into(),
                version: format!("{}-1", ctx.stamp),
                section: "kernel".into(),
                priority: "optional".into(),
                architecture: self.architecture.clone(),
                maintainer: self.maintainer.clone(),
                description: "Raspberry-pi firmware".into(),
                long_description:
                    "This is a debian package generated from the raspberrypi firmware git repository"
                        .into(),
            },
        )?;

        deb::build_deb(s, &deb_dir, &deb)?;
        Ok(())
    }
}
