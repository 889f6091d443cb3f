//! Linux kernel clone and package build.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::config::SourceConfig;
use crate::context::BuildContext;
use crate::process::Cmd;
use crate::recipe::git::{CreateWorktree, FetchGitUrl};
use crate::session::Session;
use crate::step::Step;

/// Mirror the kernel remotes, check out a worktree, and apply the patch
/// series.
pub struct CloneLinux {
    pub source: SourceConfig,
    pub patches: Vec<PathBuf>,
}

impl Step for CloneLinux {
    type Output = ();

    fn name(&self) -> &str {
        "clone_linux"
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        let mirror = ctx.repo_dir.join("linux.git");
        let tree = ctx.tmp.join("linux");

        s.invoke(ctx, FetchGitUrl::new(&mirror, "origin", &self.source.url))?;
        if let Some(upstream) = &self.source.upstream {
            s.invoke(ctx, FetchGitUrl::new(&mirror, "upstream", upstream))?;
        }
        if let Some(stable) = &self.source.stable {
            s.invoke(ctx, FetchGitUrl::new(&mirror, "stable", stable))?;
        }
        s.acquire(ctx, CreateWorktree::new(&mirror, &tree, &self.source.rev))?;

        for patch in &self.patches {
            let patch = fs::canonicalize(patch)
                .with_context(|| format!("resolving patch {}", patch.display()))?;
            Cmd::new("git")
                .arg("-C")
                .arg(&tree)
                .arg("am")
                .arg(&patch)
                .error_msg(format!("applying {}", patch.display()))
                .run()?;
        }

        ctx.linux_git = Some(mirror);
        ctx.linux = Some(tree);
        Ok(())
    }
}

/// Configure and build the kernel Debian packages.
///
/// The packages land in the scratch directory, one level above the
/// worktree, where the collection step picks them up.
pub struct CompileLinux {
    pub kernel_config: PathBuf,
    pub jobs: usize,
}

impl Step for CompileLinux {
    type Output = ();

    fn name(&self) -> &str {
        "compile_linux"
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        let tree = ctx
            .linux
            .clone()
            .context("kernel tree not checked out; run clone_linux first")?;

        let config_text = fs::read_to_string(&self.kernel_config)
            .with_context(|| format!("reading {}", self.kernel_config.display()))?;
        let config_hash = {
            let mut hasher = Sha256::new();
            hasher.update(config_text.as_bytes());
            format!("{:x}", hasher.finalize())
        };

        let dot_config = tree.join(".config");
        let hash_path = tree.join(".config.builder-hash");
        let reuse = dot_config.exists()
            && hash_path.exists()
            && fs::read_to_string(&hash_path).unwrap_or_default().trim() == config_hash;

        if reuse {
            s.debug("Kernel config unchanged, reusing .config");
        } else {
            fs::write(&dot_config, &config_text)
                .with_context(|| format!("installing {}", dot_config.display()))?;
            fs::write(&hash_path, &config_hash)
                .with_context(|| format!("writing {}", hash_path.display()))?;
        }

        // Resolve any options the checked-out tree knows about but the
        // config file predates, without prompting.
        Cmd::new("make")
            .arg("-C")
            .arg(&tree)
            .arg("olddefconfig")
            .null_stdin()
            .error_msg("make olddefconfig failed")
            .run()?;

        Cmd::new("make")
            .arg(format!("-j{}", self.jobs))
            .arg("-C")
            .arg(&tree)
            .arg("deb-pkg")
            .error_msg("kernel package build failed")
            .run_interactive()?;

        Ok(())
    }
}
