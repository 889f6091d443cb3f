//! Cross-process privilege elevation.
//!
//! `sudo` and `fakeroot` start a new process image, so state cannot cross
//! that boundary except through a filesystem-backed snapshot. The protocol
//! makes the handoff explicit: serialize the context, spawn the wrapper
//! re-invoking this binary in the reserved resume form, wait, and reload
//! the snapshot over the in-memory context. Exactly one child is ever
//! active, synchronously awaited.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::context::BuildContext;
use crate::process::Cmd;
use crate::session::Session;
use crate::step::Step;

/// Elevated execution contexts a step may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Sudo,
    Fakeroot,
}

impl Domain {
    /// Wrapper command that starts a process inside the domain.
    pub fn command(self) -> &'static str {
        self.as_str()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Sudo => "sudo",
            Domain::Fakeroot => "fakeroot",
        }
    }

    pub fn parse(value: &str) -> Option<Domain> {
        match value {
            "sudo" => Some(Domain::Sudo),
            "fakeroot" => Some(Domain::Fakeroot),
            _ => None,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step reachable from resume mode.
pub type StepFn = fn(&mut Session, &mut BuildContext) -> Result<()>;

/// Name-to-step table shared by both sides of the privilege boundary.
///
/// The parent uses it to run steps in-process once inside a domain; the
/// resumed child uses it to resolve the step named on its command line.
/// Both sides must therefore be built from the same registry.
#[derive(Default)]
pub struct StepRegistry {
    entries: BTreeMap<&'static str, StepFn>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, step: StepFn) {
        self.entries.insert(name, step);
    }

    pub fn get(&self, name: &str) -> Option<StepFn> {
        self.entries.get(name).copied()
    }
}

/// Run a registered step inside `domain`, spawning an elevated child when
/// this process is not already inside it.
struct RunElevated<'a> {
    domain: Domain,
    step: &'a str,
    registry: &'a StepRegistry,
}

impl Step for RunElevated<'_> {
    type Output = ();

    fn name(&self) -> &str {
        "run_elevated"
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        let step = self
            .registry
            .get(self.step)
            .with_context(|| format!("step '{}' is not registered", self.step))?;

        if ctx.in_domain(self.domain) {
            return step(s, ctx);
        }

        let snapshot = ctx.tmp.join(format!("context-{}.json", self.domain));
        ctx.save(&snapshot)?;

        let exe = env::current_exe().context("resolving current executable")?;
        s.debug(format!(
            "Re-executing {} under {} for {}",
            exe.display(),
            self.domain,
            self.step
        ));
        Cmd::new(self.domain.command())
            .arg(&exe)
            .args(["resume", self.domain.as_str()])
            .arg(&snapshot)
            .arg(self.step)
            .error_msg(format!(
                "elevated {} step '{}' failed",
                self.domain, self.step
            ))
            .run_interactive()?;

        // The child mutated its own copy; adopt it wholesale.
        *ctx = BuildContext::load(&snapshot)?;
        Ok(())
    }
}

/// Run `step` as root, re-executing under `sudo` if not already inside.
pub fn with_sudo(
    s: &mut Session,
    ctx: &mut BuildContext,
    registry: &StepRegistry,
    step: &str,
) -> Result<()> {
    s.invoke(
        ctx,
        RunElevated {
            domain: Domain::Sudo,
            step,
            registry,
        },
    )
}

/// Run `step` with faked root file ownership, re-executing under
/// `fakeroot` if not already inside.
pub fn with_fakeroot(
    s: &mut Session,
    ctx: &mut BuildContext,
    registry: &StepRegistry,
    step: &str,
) -> Result<()> {
    s.invoke(
        ctx,
        RunElevated {
            domain: Domain::Fakeroot,
            step,
            registry,
        },
    )
}

/// Outcome of checking the process arguments for the reserved resume
/// form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Ordinary invocation; the driver runs its normal pipeline.
    NotRequested,
    /// This process was a privilege-boundary child and has finished its
    /// step; the driver short-circuits.
    Completed,
}

/// Handle the reserved `resume <domain> <state-file> <step>` invocation.
///
/// Loads the snapshot, marks the context as inside the domain so the step
/// executes in-process, runs the step, clears the flag, and writes the
/// snapshot back for the waiting parent.
pub fn try_resume(s: &mut Session, registry: &StepRegistry, args: &[String]) -> Result<Resume> {
    let (domain, state, step) = match args {
        [resume, domain, state, step] if resume == "resume" => {
            let domain = Domain::parse(domain)
                .with_context(|| format!("unknown privilege domain '{domain}'"))?;
            (domain, PathBuf::from(state), step.as_str())
        }
        _ => return Ok(Resume::NotRequested),
    };

    let mut ctx = BuildContext::load(&state)?;
    ctx.set_domain(domain, true);
    s.invoke(
        &mut ctx,
        RunElevated {
            domain,
            step,
            registry,
        },
    )?;
    ctx.set_domain(domain, false);
    ctx.save(&state)?;
    Ok(Resume::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch_marker(_s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        let hits: u32 = ctx
            .vars
            .get("marker")
            .map(|v| v.parse().unwrap_or(0))
            .unwrap_or(0);
        ctx.vars.insert("marker".into(), (hits + 1).to_string());
        Ok(())
    }

    fn registry() -> StepRegistry {
        let mut r = StepRegistry::new();
        r.register("touch_marker", touch_marker);
        r
    }

    #[test]
    fn domain_parsing_is_exact() {
        assert_eq!(Domain::parse("sudo"), Some(Domain::Sudo));
        assert_eq!(Domain::parse("fakeroot"), Some(Domain::Fakeroot));
        assert_eq!(Domain::parse("doas"), None);
    }

    #[test]
    fn inside_the_domain_runs_in_process_without_a_snapshot() {
        let temp = TempDir::new().unwrap();
        let mut s = Session::new();
        let mut ctx = BuildContext::new(temp.path().to_path_buf(), "repo".into());
        ctx.in_fakeroot = true;

        let reg = registry();
        with_fakeroot(&mut s, &mut ctx, &reg, "touch_marker").unwrap();

        assert_eq!(ctx.vars.get("marker").map(String::as_str), Some("1"));
        // No serialize/deserialize round trip happened: the scratch
        // directory holds no snapshot file.
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn unregistered_step_is_an_error() {
        let temp = TempDir::new().unwrap();
        let mut s = Session::new();
        let mut ctx = BuildContext::new(temp.path().to_path_buf(), "repo".into());
        ctx.in_sudo = true;

        let reg = registry();
        let err = with_sudo(&mut s, &mut ctx, &reg, "missing").unwrap_err();
        assert!(format!("{err:#}").contains("not registered"));
    }

    #[test]
    fn resume_mutates_and_writes_back_the_snapshot() {
        let temp = TempDir::new().unwrap();
        let state = temp.path().join("context-fakeroot.json");

        let parent = BuildContext::new(temp.path().to_path_buf(), "repo".into());
        parent.save(&state).unwrap();

        let mut s = Session::new();
        let reg = registry();
        let args: Vec<String> = vec![
            "resume".into(),
            "fakeroot".into(),
            state.display().to_string(),
            "touch_marker".into(),
        ];
        assert_eq!(try_resume(&mut s, &reg, &args).unwrap(), Resume::Completed);

        let written = BuildContext::load(&state).unwrap();
        assert_eq!(written.vars.get("marker").map(String::as_str), Some("1"));
        // The domain flag is a transient of the child's execution, never
        // persisted.
        assert!(!written.in_fakeroot);
    }

    #[test]
    fn ordinary_arguments_are_not_a_resume() {
        let mut s = Session::new();
        let reg = registry();
        assert_eq!(
            try_resume(&mut s, &reg, &[]).unwrap(),
            Resume::NotRequested
        );
        let args: Vec<String> = vec!["preflight".into()];
        assert_eq!(
            try_resume(&mut s, &reg, &args).unwrap(),
            Resume::NotRequested
        );
    }
}
