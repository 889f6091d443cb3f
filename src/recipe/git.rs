//! Git mirror, worktree, and checkout-archive management.
//!
//! Sources are kept as bare mirrors under the repo directory and checked
//! out as detached worktrees into the scratch directory. Trees that never
//! need recompiling can instead go through the tar+zstd archive cache,
//! which skips git entirely on later builds.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use walkdir::WalkDir;

use crate::context::BuildContext;
use crate::process::Cmd;
use crate::session::Session;
use crate::step::{Release, ResourceStep, Step};

fn git_in(repo: &Path) -> Cmd {
    Cmd::new("git").arg("-C").arg(repo)
}

/// Exclusive lock held while a mirror is fetched into.
struct MirrorLock {
    _file: File,
}

fn lock_mirror(repo: &Path) -> Result<MirrorLock> {
    let lock_path = repo.join("builder.fetch.lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("creating lock file {}", lock_path.display()))?;

    if lock_file.try_lock_exclusive().is_err() {
        return Err(anyhow::anyhow!(
            "mirror is locked by another process: {}",
            lock_path.display()
        ));
    }

    Ok(MirrorLock { _file: lock_file })
}

/// Ensure `repo` is a bare mirror with `remote` pointing at `url`, fully
/// fetched.
pub struct FetchGitUrl {
    repo: PathBuf,
    remote: String,
    url: String,
}

impl FetchGitUrl {
    pub fn new(repo: impl Into<PathBuf>, remote: impl Into<String>, url: impl Into<String>) -> Self {
        FetchGitUrl {
            repo: repo.into(),
            remote: remote.into(),
            url: url.into(),
        }
    }
}

impl Step for FetchGitUrl {
    type Output = ();

    fn name(&self) -> &str {
        "fetch_git_url"
    }

    fn run(self, s: &mut Session, _ctx: &mut BuildContext) -> Result<()> {
        if !self.repo.is_dir() {
            s.debug(format!(
                "Creating bare mirror {} from {}",
                self.repo.display(),
                self.url
            ));
            Cmd::new("git")
                .args(["clone", "--bare"])
                .arg(&self.url)
                .arg(&self.repo)
                .error_msg(format!("cloning {}", self.url))
                .run()?;
        }

        let _lock = lock_mirror(&self.repo)?;

        let set_url = git_in(&self.repo)
            .args(["remote", "set-url", &self.remote, &self.url])
            .allow_fail()
            .run()?;
        if !set_url.success() {
            git_in(&self.repo)
                .args(["remote", "add", &self.remote, &self.url])
                .error_msg(format!("adding remote {}", self.remote))
                .run()?;
        }

        git_in(&self.repo)
            .args(["fetch", &self.remote])
            .error_msg(format!("fetching {} from {}", self.remote, self.url))
            .run()?;
        Ok(())
    }
}

/// Detached worktree checkout from a mirror; pruned at scope exit.
pub struct CreateWorktree {
    from_repo: PathBuf,
    to_dir: PathBuf,
    rev: String,
}

impl CreateWorktree {
    pub fn new(
        from_repo: impl Into<PathBuf>,
        to_dir: impl Into<PathBuf>,
        rev: impl Into<String>,
    ) -> Self {
        CreateWorktree {
            from_repo: from_repo.into(),
            to_dir: to_dir.into(),
            rev: rev.into(),
        }
    }
}

impl ResourceStep for CreateWorktree {
    type Output = PathBuf;
    type Handle = WorktreePrune;

    fn name(&self) -> &str {
        "create_worktree"
    }

    fn acquire(
        self,
        _s: &mut Session,
        _ctx: &mut BuildContext,
    ) -> Result<(PathBuf, WorktreePrune)> {
        git_in(&self.from_repo)
            .args(["worktree", "add", "--detach"])
            .arg(&self.to_dir)
            .arg(&self.rev)
            .error_msg(format!(
                "checking out {} into {}",
                self.rev,
                self.to_dir.display()
            ))
            .run()?;
        Ok((
            self.to_dir,
            WorktreePrune {
                from_repo: self.from_repo,
            },
        ))
    }
}

/// Drops the mirror's record of worktrees whose directories are gone.
pub struct WorktreePrune {
    from_repo: PathBuf,
}

impl Release for WorktreePrune {
    fn release(&mut self, s: &mut Session) -> Result<()> {
        let status = git_in(&self.from_repo)
            .args(["worktree", "prune", "-v", "--expire", "now"])
            .allow_fail()
            .run()?;
        if !status.success() {
            s.warning(format!("worktree prune returned {status}"));
        }
        Ok(())
    }
}

/// Default location of the checkout archive cache.
pub fn default_archive_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("image-builder/archives")
}

/// Archive file name for a checkout of `name` at `rev`.
pub fn archive_name(name: &str, rev: &str) -> String {
    format!("{}-{}.tar.zst", name, rev.replace('/', "_"))
}

/// Check out `name` into the work directory, preferring a cached archive
/// of the same name+rev over a fresh clone. A fresh clone is archived for
/// the next build.
pub struct DownloadGit {
    pub name: String,
    pub url: String,
    pub rev: String,
    pub archive_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl Step for DownloadGit {
    type Output = PathBuf;

    fn name(&self) -> &str {
        "download_git"
    }

    fn run(self, s: &mut Session, _ctx: &mut BuildContext) -> Result<PathBuf> {
        let dest = self.work_dir.join(&self.name);
        let archive = self.archive_dir.join(archive_name(&self.name, &self.rev));

        if archive.exists() {
            s.debug(format!(
                "Found archived checkout at {}",
                archive.display()
            ));
            unpack_archive(&archive, &self.work_dir)?;
            return Ok(dest);
        }

        Cmd::new("git")
            .args(["clone", "--no-checkout"])
            .arg(&self.url)
            .arg(&dest)
            .error_msg(format!("cloning {}", self.url))
            .run()?;
        git_in(&dest)
            .args(["checkout", &self.rev])
            .error_msg(format!("checking out {}", self.rev))
            .run()?;

        fs::create_dir_all(&self.archive_dir)
            .with_context(|| format!("creating {}", self.archive_dir.display()))?;
        s.debug(format!("Archiving checkout to {}", archive.display()));
        archive_tree(&dest, &self.name, &archive)?;

        Ok(dest)
    }
}

/// Pack `src_dir` into a zstd-compressed tar whose entries live under
/// `prefix/`. Entry order is deterministic and metadata is normalized so
/// identical trees produce identical archives.
pub fn archive_tree(src_dir: &Path, prefix: &str, out_path: &Path) -> Result<()> {
    let out = File::create(out_path)
        .with_context(|| format!("creating {}", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, 3)?;
    let mut builder = tar::Builder::new(encoder);

    let mut entries: Vec<PathBuf> = Vec::new();
    for ent in WalkDir::new(src_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if ent.path() == src_dir {
            continue;
        }
        entries.push(ent.path().to_path_buf());
    }
    entries.sort_by(|a, b| {
        let ra = a.strip_prefix(src_dir).unwrap_or(a).to_string_lossy();
        let rb = b.strip_prefix(src_dir).unwrap_or(b).to_string_lossy();
        ra.cmp(&rb)
    });

    for path in entries {
        let rel = path.strip_prefix(src_dir).unwrap_or(&path);
        let name = format!("{}/{}", prefix, rel.to_string_lossy());
        let md = fs::symlink_metadata(&path)?;

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(md.permissions().mode());

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &name, std::io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&path)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &name, &target)?;
        } else {
            header.set_size(md.len());
            let file = File::open(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            builder.append_data(&mut header, &name, file)?;
        }
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

/// Unpack an archive written by [`archive_tree`] into `dest_dir`.
pub fn unpack_archive(archive: &Path, dest_dir: &Path) -> Result<()> {
    let file =
        File::open(archive).with_context(|| format!("opening {}", archive.display()))?;
    let decoder = zstd::stream::Decoder::new(file)?;
    let mut tar = tar::Archive::new(decoder);
    tar.unpack(dest_dir)
        .with_context(|| format!("unpacking {}", archive.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn archive_names_escape_ref_slashes() {
        assert_eq!(
            archive_name("firmware", "origin/master"),
            "firmware-origin_master.tar.zst"
        );
        assert_eq!(archive_name("u-boot", "v2016.03"), "u-boot-v2016.03.tar.zst");
    }

    #[test]
    fn archive_round_trip_preserves_the_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("checkout");
        fs::create_dir_all(src.join("boot/overlays")).unwrap();
        fs::write(src.join("boot/kernel.img"), b"kernel bits").unwrap();
        fs::write(src.join("boot/overlays/disable-bt.dtbo"), b"dtbo").unwrap();
        std::os::unix::fs::symlink("kernel.img", src.join("boot/zImage")).unwrap();

        let archive = temp.path().join("firmware-master.tar.zst");
        archive_tree(&src, "firmware", &archive).unwrap();

        let out = temp.path().join("restored");
        fs::create_dir_all(&out).unwrap();
        unpack_archive(&archive, &out).unwrap();

        let root = out.join("firmware");
        assert_eq!(
            fs::read(root.join("boot/kernel.img")).unwrap(),
            b"kernel bits"
        );
        assert_eq!(
            fs::read(root.join("boot/overlays/disable-bt.dtbo")).unwrap(),
            b"dtbo"
        );
        assert!(root.join("boot/zImage").is_symlink());
        assert_eq!(
            fs::read_link(root.join("boot/zImage"))
                .unwrap()
                .to_str()
                .unwrap(),
            "kernel.img"
        );
    }

    #[test]
    fn identical_trees_produce_identical_archives() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("tree");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), "alpha").unwrap();
        fs::write(src.join("sub/b.txt"), "beta").unwrap();

        let first = temp.path().join("first.tar.zst");
        let second = temp.path().join("second.tar.zst");
        archive_tree(&src, "tree", &first).unwrap();
        archive_tree(&src, "tree", &second).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn mirror_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let held = lock_mirror(temp.path()).unwrap();
        assert!(lock_mirror(temp.path()).is_err());
        drop(held);
        assert!(lock_mirror(temp.path()).is_ok());
    }
}
