//! Debian binary package assembly.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::process::Cmd;
use crate::recipe::fsutil;
use crate::session::Session;

/// Control-file description of a binary package.
#[derive(Debug, Clone)]
pub struct DebSpec {
    pub package: String,
    pub version: String,
    pub section: String,
    pub priority: String,
    pub architecture: String,
    pub maintainer: String,
    /// One-line synopsis.
    pub description: String,
    /// Extended description paragraph.
    pub long_description: String,
}

impl DebSpec {
    /// Render the `DEBIAN/control` contents.
    pub fn control(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Package: {}\n", self.package));
        out.push_str(&format!("Version: {}\n", self.version));
        out.push_str(&format!("Section: {}\n", self.section));
        out.push_str(&format!("Priority: {}\n", self.priority));
        out.push_str(&format!("Architecture: {}\n", self.architecture));
        out.push_str(&format!("Maintainer: {}\n", self.maintainer));
        out.push_str(&format!("Description: {}\n", self.description));
        for line in self.long_description.lines() {
            if line.is_empty() {
                out.push_str(" .\n");
            } else {
                out.push_str(&format!(" {}\n", line));
            }
        }
        out
    }
}

/// Write `DEBIAN/control` into a staged package tree.
pub fn write_control(s: &Session, deb_dir: &Path, spec: &DebSpec) -> Result<()> {
    let control_dir = deb_dir.join("DEBIAN");
    if !control_dir.exists() {
        fsutil::install_dir(s, &control_dir, 0, 0, 0o755)?;
    }
    let path = control_dir.join("control");
    fs::write(&path, spec.control())
        .with_context(|| format!("writing {}", path.display()))?;
    fsutil::chmod(s, &path, 0o644)?;
    Ok(())
}

/// Write `DEBIAN/conffiles` listing files dpkg should treat as
/// configuration.
pub fn write_conffiles(s: &Session, deb_dir: &Path, entries: &[&str]) -> Result<()> {
    let control_dir = deb_dir.join("DEBIAN");
    if !control_dir.exists() {
        fsutil::install_dir(s, &control_dir, 0, 0, 0o755)?;
    }
    let path = control_dir.join("conffiles");
    let mut text = entries.join("\n");
    text.push('\n');
    fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    fsutil::chmod(s, &path, 0o644)?;
    Ok(())
}

/// Build a `.deb` from a staged tree.
pub fn build_deb(s: &Session, tree: &Path, output: &Path) -> Result<PathBuf> {
    s.debug(format!(
        "Building package {} from {}",
        output.display(),
        tree.display()
    ));
    Cmd::new("dpkg-deb")
        .arg("-b")
        .arg(tree)
        .arg(output)
        .error_msg(format!("building {}", output.display()))
        .run()?;
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_renders_continuation_lines_with_a_leading_space() {
        let spec = DebSpec {
            package: "u-boot-git".into(),
            version: "202608071200-1".into(),
            section: "kernel".into(),
            priority: "optional".into(),
            architecture: "armhf".into(),
            maintainer: "Jo Doe <jo@example.org>".into(),
            description: "U-Boot for raspberry pi 2 + 3".into(),
            long_description: "This is a debian package generated from\nthe u-boot git repository"
                .into(),
        };

        let control = spec.control();
        assert!(control.starts_with("Package: u-boot-git\n"));
        assert!(control.contains("Version: 202608071200-1\n"));
        assert!(control.contains("Description: U-Boot for raspberry pi 2 + 3\n"));
        assert!(control.contains(" This is a debian package generated from\n"));
        assert!(control.contains(" the u-boot git repository\n"));
        assert!(control.ends_with('\n'));
    }

    #[test]
    fn empty_long_description_lines_become_paragraph_separators() {
        let spec = DebSpec {
            package: "p".into(),
            version: "1".into(),
            section: "misc".into(),
            priority: "optional".into(),
            architecture: "all".into(),
            maintainer: "m".into(),
            description: "d".into(),
            long_description: "first\n\nsecond".into(),
        };
        assert!(spec.control().contains(" first\n .\n second\n"));
    }
}
