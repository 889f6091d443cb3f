//! Build configuration.
//!
//! An optional `builder.toml` in the working directory overrides the
//! defaults below, which reproduce the Raspberry Pi 2 package build this
//! crate grew out of.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// A git source: where to fetch and what to check out.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    /// Branch, tag, or commit handed to `git checkout`.
    pub rev: String,
    /// Optional second remote (e.g. the mainline kernel tree).
    #[serde(default)]
    pub upstream: Option<String>,
    /// Optional third remote (e.g. the stable kernel tree).
    #[serde(default)]
    pub stable: Option<String>,
}

impl SourceConfig {
    fn new(url: &str, rev: &str) -> Self {
        SourceConfig {
            url: url.into(),
            rev: rev.into(),
            upstream: None,
            stable: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Directory holding bare git mirrors, reused across builds.
    pub repo_dir: PathBuf,
    /// Where finished packages are collected.
    pub packages_dir: PathBuf,
    /// Kernel patch series applied after checkout, in order.
    pub kernel_patches: Vec<PathBuf>,
    /// Kernel config file installed as `.config`.
    pub kernel_config: PathBuf,
    /// U-Boot board configuration target.
    pub uboot_defconfig: String,
    /// Directory with U-Boot packaging assets (boot config, env source).
    pub uboot_assets: PathBuf,
    /// Parallel make jobs.
    pub jobs: usize,
    pub maintainer: String,
    pub architecture: String,
    pub linux: SourceConfig,
    pub uboot: SourceConfig,
    pub firmware: SourceConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            repo_dir: PathBuf::from("repo"),
            packages_dir: PathBuf::from("packages"),
            kernel_patches: Vec::new(),
            kernel_config: PathBuf::from("linux-config"),
            uboot_defconfig: "rpi_2_defconfig".into(),
            uboot_assets: PathBuf::from("u-boot-deb"),
            jobs: default_jobs(),
            maintainer: "Image Builder <builder@localhost>".into(),
            architecture: "armhf".into(),
            linux: SourceConfig {
                url: "https://github.com/raspberrypi/linux".into(),
                rev: "rpi-4.6.y".into(),
                upstream: Some(
                    "git://git.kernel.org/pub/scm/linux/kernel/git/torvalds/linux.git".into(),
                ),
                stable: Some(
                    "git://git.kernel.org/pub/scm/linux/kernel/git/stable/linux-stable.git"
                        .into(),
                ),
            },
            uboot: SourceConfig::new("git://git.denx.de/u-boot.git", "v2016.03"),
            firmware: SourceConfig::new("https://github.com/raspberrypi/firmware", "master"),
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl BuildConfig {
    /// Load `builder.toml` from `dir`, falling back to defaults when the
    /// file does not exist.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("builder.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig::load(temp.path()).unwrap();
        assert_eq!(config, BuildConfig::default());
        assert_eq!(config.architecture, "armhf");
        assert!(config.jobs >= 1);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("builder.toml"),
            r#"
jobs = 2
maintainer = "Jo Doe <jo@example.org>"

[uboot]
url = "https://example.org/u-boot.git"
rev = "v2024.01"
"#,
        )
        .unwrap();

        let config = BuildConfig::load(temp.path()).unwrap();
        assert_eq!(config.jobs, 2);
        assert_eq!(config.maintainer, "Jo Doe <jo@example.org>");
        assert_eq!(config.uboot.url, "https://example.org/u-boot.git");
        assert_eq!(config.uboot.rev, "v2024.01");
        // Untouched sections keep their defaults.
        assert_eq!(config.linux, BuildConfig::default().linux);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("builder.toml"), "no_such_key = true\n").unwrap();
        assert!(BuildConfig::load(temp.path()).is_err());
    }
}
