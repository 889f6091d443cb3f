//! The composed packages pipeline.
//!
//! Clones and compiles the kernel and U-Boot, packages both plus the boot
//! firmware (package staging runs under fakeroot so the archives carry
//! root ownership), and collects the results into the packages directory.

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::BuildConfig;
use crate::context::BuildContext;
use crate::privilege::{self, StepRegistry};
use crate::recipe::firmware::{CloneFirmware, CreateFirmwareDeb};
use crate::recipe::fsutil;
use crate::recipe::git;
use crate::recipe::kernel::{CloneLinux, CompileLinux};
use crate::recipe::uboot::{CloneUboot, CompileUboot, CreateUbootDeb};
use crate::resource::Mkdtemp;
use crate::session::Session;
use crate::step::Step;

/// Steps reachable across the privilege boundary.
///
/// The registered functions reload the configuration from the working
/// directory, which the elevated child inherits from its parent.
pub fn registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.register("create_uboot_deb", run_create_uboot_deb);
    registry.register("create_firmware_deb", run_create_firmware_deb);
    registry
}

fn run_create_uboot_deb(s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
    let config = load_config()?;
    s.invoke(
        ctx,
        CreateUbootDeb {
            assets_dir: config.uboot_assets,
            maintainer: config.maintainer,
            architecture: config.architecture,
        },
    )
}

fn run_create_firmware_deb(s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
    let config = load_config()?;
    s.invoke(
        ctx,
        CreateFirmwareDeb {
            maintainer: config.maintainer,
            architecture: config.architecture,
        },
    )
}

fn load_config() -> Result<BuildConfig> {
    let cwd = env::current_dir().context("resolving working directory")?;
    BuildConfig::load(&cwd)
}

/// Create the scratch directory and the mirror directory.
struct SetupContext;

impl Step for SetupContext {
    type Output = ();

    fn name(&self) -> &str {
        "setup_context"
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        let cwd = env::current_dir().context("resolving working directory")?;
        ctx.tmp = s.acquire(ctx, Mkdtemp::in_dir(&cwd))?;
        if !ctx.repo_dir.is_dir() {
            fs::create_dir_all(&ctx.repo_dir)
                .with_context(|| format!("creating {}", ctx.repo_dir.display()))?;
        }
        Ok(())
    }
}

/// Collect every built package into the packages directory, replacing
/// whatever a previous build left there.
struct MovePackages {
    packages_dir: PathBuf,
}

impl Step for MovePackages {
    type Output = ();

    fn name(&self) -> &str {
        "move_packages"
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        fs::create_dir_all(&self.packages_dir)
            .with_context(|| format!("creating {}", self.packages_dir.display()))?;

        for old in debs_in(&self.packages_dir)? {
            fsutil::remove_file(s, &old)?;
        }
        for built in debs_in(&ctx.tmp)? {
            let name = built
                .file_name()
                .with_context(|| format!("package path {} has no file name", built.display()))?;
            fsutil::copy(s, &built, &self.packages_dir.join(name))?;
        }
        Ok(())
    }
}

fn debs_in(dir: &std::path::Path) -> Result<Vec<PathBuf>> {
    let mut debs = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("reading directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("deb") {
            debs.push(path);
        }
    }
    debs.sort();
    Ok(debs)
}

/// Run the whole package pipeline inside the caller's scope.
pub fn run(s: &mut Session, registry: &StepRegistry, config: &BuildConfig) -> Result<()> {
    let mut ctx = BuildContext::new(env::temp_dir(), config.repo_dir.clone());
    s.invoke(&mut ctx, SetupContext)?;

    s.invoke(
        &mut ctx,
        CloneLinux {
            source: config.linux.clone(),
            patches: config.kernel_patches.clone(),
        },
    )?;
    s.invoke(
        &mut ctx,
        CloneFirmware {
            source: config.firmware.clone(),
            archive_dir: git::default_archive_dir(),
            architecture: config.architecture.clone(),
        },
    )?;
    s.invoke(
        &mut ctx,
        CloneUboot {
            source: config.uboot.clone(),
            architecture: config.architecture.clone(),
        },
    )?;

    s.invoke(
        &mut ctx,
        CompileLinux {
            kernel_config: config.kernel_config.clone(),
            jobs: config.jobs,
        },
    )?;
    s.invoke(
        &mut ctx,
        CompileUboot {
            defconfig: config.uboot_defconfig.clone(),
            jobs: config.jobs,
        },
    )?;

    privilege::with_fakeroot(s, &mut ctx, registry, "create_uboot_deb")?;
    privilege::with_fakeroot(s, &mut ctx, registry, "create_firmware_deb")?;

    s.invoke(
        &mut ctx,
        MovePackages {
            packages_dir: config.packages_dir.clone(),
        },
    )?;
    Ok(())
}
