//! U-Boot clone, build, and Debian packaging.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::SourceConfig;
use crate::context::BuildContext;
use crate::process::Cmd;
use crate::recipe::checks::CheckFakeroot;
use crate::recipe::deb::{self, DebSpec};
use crate::recipe::fsutil;
use crate::recipe::git::{CreateWorktree, FetchGitUrl};
use crate::session::Session;
use crate::step::Step;

/// Mirror U-Boot and check out a worktree; records the deb staging paths
/// for the packaging step that runs later under fakeroot.
pub struct CloneUboot {
    pub source: SourceConfig,
    pub architecture: String,
}

impl Step for CloneUboot {
    type Output = ();

    fn name(&self) -> &str {
        "clone_uboot"
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        let mirror = ctx.repo_dir.join("u-boot.git");
        let tree = ctx.tmp.join("u-boot");

        s.invoke(ctx, FetchGitUrl::new(&mirror, "origin", &self.source.url))?;
        s.acquire(ctx, CreateWorktree::new(&mirror, &tree, &self.source.rev))?;

        ctx.uboot_git = Some(mirror);
        ctx.uboot = Some(tree);
        ctx.uboot_deb_dir = Some(ctx.tmp.join("u-boot-deb"));
        ctx.uboot_deb = Some(ctx.tmp.join(format!(
            "u-boot-git-{}-1_{}.deb",
            ctx.stamp, self.architecture
        )));
        Ok(())
    }
}

/// Configure for the target board and build.
pub struct CompileUboot {
    pub defconfig: String,
    pub jobs: usize,
}

impl Step for CompileUboot {
    type Output = ();

    fn name(&self) -> &str {
        "compile_uboot"
    }

    fn run(self, _s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        let tree = ctx
            .uboot
            .clone()
            .context("u-boot tree not checked out; run clone_uboot first")?;

        Cmd::new("make")
            .arg("-C")
            .arg(&tree)
            .arg(&self.defconfig)
            .error_msg(format!("make {} failed", self.defconfig))
            .run()?;
        Cmd::new("make")
            .arg(format!("-j{}", self.jobs))
            .arg("-C")
            .arg(&tree)
            .error_msg("u-boot build failed")
            .run_interactive()?;
        Ok(())
    }
}

/// Stage and build the U-Boot Debian package.
///
/// Runs under fakeroot so the staged tree is owned by root inside the
/// resulting archive.
pub struct CreateUbootDeb {
    pub assets_dir: PathBuf,
    pub maintainer: String,
    pub architecture: String,
}

impl Step for CreateUbootDeb {
    type Output = ();

    fn name(&self) -> &str {
        "create_uboot_deb"
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        s.invoke_once(ctx, CheckFakeroot)?;

        let uboot = ctx
            .uboot
            .clone()
            .context("u-boot tree not checked out")?;
        let deb_dir = ctx
            .uboot_deb_dir
            .clone()
            .context("u-boot deb staging dir not set")?;
        let deb = ctx.uboot_deb.clone().context("u-boot deb path not set")?;

        fsutil::install_dir(s, &deb_dir, 0, 0, 0o755)?;
        for dir in [
            "boot",
            "boot/firmware",
            "etc",
            "etc/kernel",
            "etc/kernel/postinst.d",
        ] {
            fsutil::install_dir(s, &deb_dir.join(dir), 0, 0, 0o755)?;
        }

        fsutil::install(
            s,
            &self.assets_dir.join("zz-u-boot"),
            &deb_dir.join("etc/kernel/postinst.d/zz-u-boot"),
            0,
            0,
            0o755,
        )?;
        fsutil::install(
            s,
            &self.assets_dir.join("config.txt"),
            &deb_dir.join("boot/firmware/config.txt"),
            0,
            0,
            0o644,
        )?;

        deb::write_conffiles(
            s,
            &deb_dir,
            &["/boot/firmware/config.txt", "/boot/firmware/uboot.env"],
        )?;
        deb::write_control(
            s,
            &deb_dir,
            &DebSpec {
                package: "u-boot-git".into(),
                version: format!("{}-1", ctx.stamp),
                section: "kernel".into(),
                priority: "optional".into(),
                architecture: self.architecture.clone(),
                maintainer: self.maintainer.clone(),
                description: "U-Boot for raspberry pi 2 + 3".into(),
                long_description:
                    "This is a debian package generated from the u-boot git repository".into(),
            },
        )?;

        // Boot environment image, built with the tool from the tree we
        // just compiled.
        let env_out = deb_dir.join("boot/firmware/uboot.env");
        Cmd::new(uboot.join("tools/mkenvimage"))
            .args(["-p", "0", "-s", "16384", "-o"])
            .arg(&env_out)
            .arg(self.assets_dir.join("u-boot-env.txt"))
            .error_msg("building uboot.env")
            .run()?;
        fsutil::chmod(s, &env_out, 0o644)?;

        fsutil::install(
            s,
            &uboot.join("u-boot.bin"),
            &deb_dir.join("boot/firmware/uboot.bin"),
            0,
            0,
            0o644,
        )?;

        deb::build_deb(s, &deb_dir, &deb)?;
        Ok(())
    }
}
