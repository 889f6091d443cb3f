//! Logged file primitives used by the packaging recipes.
//!
//! Ownership and mode arguments mirror what the deb trees need; under
//! fakeroot the chown calls record the faked ownership in the resulting
//! archive.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};

use crate::session::Session;

/// Copy a single file.
pub fn copy(s: &Session, from: &Path, to: &Path) -> Result<()> {
    s.debug(format!("Copying {} to {}", from.display(), to.display()));
    fs::copy(from, to)
        .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
    Ok(())
}

/// Recursively copy a directory, preserving symlinks.
pub fn copy_tree(s: &Session, from: &Path, to: &Path) -> Result<()> {
    s.debug(format!(
        "Copying {}/ to {}/",
        from.display(),
        to.display()
    ));
    copy_tree_inner(from, to)
}

fn copy_tree_inner(src: &Path, dst: &Path) -> Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)
            .with_context(|| format!("creating directory {}", dst.display()))?;
    }

    for entry in
        fs::read_dir(src).with_context(|| format!("reading directory {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)
                .with_context(|| format!("creating symlink {}", dst_path.display()))?;
        } else if file_type.is_dir() {
            copy_tree_inner(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("copying {}", src_path.display()))?;
        }
    }

    Ok(())
}

/// Install a file with explicit ownership and mode. Symlinks are
/// recreated rather than followed, and their mode is left alone.
pub fn install(s: &Session, from: &Path, to: &Path, uid: u32, gid: u32, mode: u32) -> Result<()> {
    s.debug(format!(
        "Installing {} to {} (uid: {}, gid: {}, perm: {:04o})",
        from.display(),
        to.display(),
        uid,
        gid,
        mode
    ));
    let meta = fs::symlink_metadata(from)
        .with_context(|| format!("inspecting {}", from.display()))?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(from)?;
        std::os::unix::fs::symlink(&target, to)
            .with_context(|| format!("creating symlink {}", to.display()))?;
    } else {
        fs::copy(from, to)
            .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
        fs::set_permissions(to, fs::Permissions::from_mode(mode))
            .with_context(|| format!("setting mode on {}", to.display()))?;
    }
    std::os::unix::fs::lchown(to, Some(uid), Some(gid))
        .with_context(|| format!("setting ownership on {}", to.display()))?;
    Ok(())
}

/// Create a directory with explicit ownership and mode.
pub fn install_dir(s: &Session, path: &Path, uid: u32, gid: u32, mode: u32) -> Result<()> {
    s.debug(format!(
        "Creating {}/ (uid: {}, gid: {}, perm: {:04o})",
        path.display(),
        uid,
        gid,
        mode
    ));
    fs::create_dir(path).with_context(|| format!("creating {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting mode on {}", path.display()))?;
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
        .with_context(|| format!("setting ownership on {}", path.display()))?;
    Ok(())
}

/// Remove a single file.
pub fn remove_file(s: &Session, path: &Path) -> Result<()> {
    s.debug(format!("Removing {}", path.display()));
    fs::remove_file(path).with_context(|| format!("removing {}", path.display()))
}

/// Remove a directory tree.
pub fn remove_tree(s: &Session, path: &Path) -> Result<()> {
    s.debug(format!("Removing {}/", path.display()));
    fs::remove_dir_all(path).with_context(|| format!("removing {}", path.display()))
}

/// Change permissions on an existing path.
pub fn chmod(s: &Session, path: &Path, mode: u32) -> Result<()> {
    s.debug(format!(
        "Changing permissions on {} to {:04o}",
        path.display(),
        mode
    ));
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting mode on {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn current_ids() -> (u32, u32) {
        // Installing to oneself needs no privileges.
        unsafe { (libc::getuid(), libc::getgid()) }
    }

    #[test]
    fn install_copies_and_sets_the_mode() {
        let temp = TempDir::new().unwrap();
        let s = Session::new();
        let (uid, gid) = current_ids();

        let from = temp.path().join("src.sh");
        fs::write(&from, "#!/bin/sh\n").unwrap();
        let to = temp.path().join("dst.sh");

        install(&s, &from, &to, uid, gid, 0o755).unwrap();

        let mode = fs::metadata(&to).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o755);
        assert_eq!(fs::read_to_string(&to).unwrap(), "#!/bin/sh\n");
    }

    #[test]
    fn install_dir_creates_with_the_requested_mode() {
        let temp = TempDir::new().unwrap();
        let s = Session::new();
        let (uid, gid) = current_ids();

        let dir = temp.path().join("boot");
        install_dir(&s, &dir, uid, gid, 0o755).unwrap();

        assert!(dir.is_dir());
        let mode = fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o755);
    }

    #[test]
    fn copy_tree_preserves_symlinks() {
        let temp = TempDir::new().unwrap();
        let s = Session::new();

        let src = temp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("file.txt"), "hello").unwrap();
        fs::write(src.join("nested/deep.txt"), "world").unwrap();
        std::os::unix::fs::symlink("file.txt", src.join("link")).unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&s, &src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("file.txt")).unwrap(), "hello");
        assert_eq!(
            fs::read_to_string(dst.join("nested/deep.txt")).unwrap(),
            "world"
        );
        assert!(dst.join("link").is_symlink());
        assert_eq!(
            fs::read_link(dst.join("link")).unwrap().to_str().unwrap(),
            "file.txt"
        );
    }
}
