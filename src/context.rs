//! Shared build state and its cross-process snapshot format.
//!
//! The context is owned by exactly one process at a time. Crossing a
//! privilege boundary serializes the whole context to disk and reloads it
//! afterward, so every field must survive a serde round trip.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::BuilderError;
use crate::privilege::Domain;

/// Snapshot schema version. Snapshots only ever travel between a parent
/// and a child of the same build; a mismatch means a stale file.
pub const STATE_VERSION: u32 = 1;

/// Mutable state accumulated across pipeline steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildContext {
    pub state_version: u32,

    /// Scratch directory; also hosts privilege-handoff snapshots.
    pub tmp: PathBuf,
    /// Directory holding bare git mirrors reused across builds.
    pub repo_dir: PathBuf,
    /// Build timestamp, `YYYYMMDDhhmm`, stamped into package versions.
    pub stamp: String,

    pub in_sudo: bool,
    pub in_fakeroot: bool,

    #[serde(default)]
    pub linux_git: Option<PathBuf>,
    #[serde(default)]
    pub linux: Option<PathBuf>,
    #[serde(default)]
    pub uboot_git: Option<PathBuf>,
    #[serde(default)]
    pub uboot: Option<PathBuf>,
    #[serde(default)]
    pub uboot_deb_dir: Option<PathBuf>,
    #[serde(default)]
    pub uboot_deb: Option<PathBuf>,
    #[serde(default)]
    pub firmware: Option<PathBuf>,
    #[serde(default)]
    pub firmware_deb_dir: Option<PathBuf>,
    #[serde(default)]
    pub firmware_deb: Option<PathBuf>,

    /// Free-form values accumulated by steps without a dedicated field.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl BuildContext {
    pub fn new(tmp: PathBuf, repo_dir: PathBuf) -> Self {
        BuildContext {
            state_version: STATE_VERSION,
            tmp,
            repo_dir,
            stamp: build_stamp(),
            in_sudo: false,
            in_fakeroot: false,
            linux_git: None,
            linux: None,
            uboot_git: None,
            uboot: None,
            uboot_deb_dir: None,
            uboot_deb: None,
            firmware: None,
            firmware_deb_dir: None,
            firmware_deb: None,
            vars: BTreeMap::new(),
        }
    }

    pub fn in_domain(&self, domain: Domain) -> bool {
        match domain {
            Domain::Sudo => self.in_sudo,
            Domain::Fakeroot => self.in_fakeroot,
        }
    }

    pub fn set_domain(&mut self, domain: Domain, inside: bool) {
        match domain {
            Domain::Sudo => self.in_sudo = inside,
            Domain::Fakeroot => self.in_fakeroot = inside,
        }
    }

    /// Write a snapshot for handing to another process.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .context("serializing build context")?;
        fs::write(path, data)
            .with_context(|| format!("writing context snapshot {}", path.display()))
    }

    /// Load a snapshot written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("reading context snapshot {}", path.display()))?;
        let ctx: BuildContext = serde_json::from_slice(&data)
            .with_context(|| format!("parsing context snapshot {}", path.display()))?;
        if ctx.state_version != STATE_VERSION {
            return Err(BuilderError::StateVersionMismatch {
                found: ctx.state_version,
                expected: STATE_VERSION,
            }
            .into());
        }
        Ok(ctx)
    }
}

fn build_stamp() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute()
    )
}
