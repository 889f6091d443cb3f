//! Command invocation engine and cleanup stack.
//!
//! Every pipeline step runs through a [`Session`], which wraps it in
//! lifecycle bookkeeping: open/close trace lines, wall-clock timing,
//! nesting-aware log indentation, and failure logging. Resource steps
//! additionally register their release handles here, and [`Session::scope`]
//! unwinds those handles in reverse registration order when the scope
//! exits, whether it exits cleanly or by error.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::time::Instant;

use anyhow::Result;

use crate::context::BuildContext;
use crate::logger::{self, Severity};
use crate::step::{Release, ResourceStep, Step};

/// One pending scope-exit action.
struct CleanupEntry {
    step: String,
    handle: Box<dyn Release>,
}

/// Orchestration session.
///
/// Single-threaded and synchronous; the execution stack tracks open
/// non-flattened invocations purely for log indentation.
pub struct Session {
    exec_stack: Vec<String>,
    cleanups: Vec<CleanupEntry>,
    once_done: HashSet<String>,
    counts: HashMap<String, u64>,
    teardown: bool,
}

impl Session {
    pub fn new() -> Self {
        logger::init();
        Session {
            exec_stack: Vec::new(),
            cleanups: Vec::new(),
            once_done: HashSet::new(),
            counts: HashMap::new(),
            // No scope is open yet, so cleanup registration is rejected
            // until `scope` starts one.
            teardown: true,
        }
    }

    /// Run `f` as a top-level scope with its own cleanup stack.
    ///
    /// On exit, success or failure, pending cleanups run in reverse
    /// registration order and the stack is cleared. An enclosing scope's
    /// stack is saved across the call and restored afterward, so nested
    /// scopes tear down only what they registered themselves.
    pub fn scope<T>(&mut self, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let outer_cleanups = std::mem::take(&mut self.cleanups);
        let outer_teardown = std::mem::replace(&mut self.teardown, false);
        let result = f(self);
        self.unwind();
        self.cleanups = outer_cleanups;
        self.teardown = outer_teardown;
        result
    }

    /// Invoke a plain step.
    pub fn invoke<S: Step>(&mut self, ctx: &mut BuildContext, step: S) -> Result<S::Output> {
        let name = step.name().to_string();
        let flatten = step.flatten();
        self.enter(&name, flatten);
        let started = Instant::now();
        let outcome = step.run(self, ctx);
        self.leave(&name, flatten, started, outcome.is_ok());
        outcome
    }

    /// Invoke a once-designated step.
    ///
    /// After the first successful run in this session, further calls are
    /// silent no-ops: no trace lines, no side effects, no cleanup entry.
    /// Constrained to `Output = ()` because a memoized no-op has no value
    /// to hand back.
    pub fn invoke_once<S: Step<Output = ()>>(
        &mut self,
        ctx: &mut BuildContext,
        step: S,
    ) -> Result<()> {
        if self.once_done.contains(step.name()) {
            return Ok(());
        }
        let name = step.name().to_string();
        self.invoke(ctx, step)?;
        self.once_done.insert(name);
        Ok(())
    }

    /// Invoke a resource step; on success its release handle is queued
    /// for scope-exit unwind.
    pub fn acquire<S: ResourceStep>(
        &mut self,
        ctx: &mut BuildContext,
        step: S,
    ) -> Result<S::Output> {
        let name = step.name().to_string();
        let flatten = step.flatten();
        self.enter(&name, flatten);
        let started = Instant::now();
        let outcome = step.acquire(self, ctx);
        self.leave(&name, flatten, started, outcome.is_ok());
        let (output, handle) = outcome?;
        self.register_cleanup(&name, Box::new(handle));
        Ok(output)
    }

    fn enter(&mut self, name: &str, flatten: bool) {
        if !flatten {
            self.info(format!("Started {name} {{"));
            self.exec_stack.push(name.to_string());
        }
    }

    fn leave(&mut self, name: &str, flatten: bool, started: Instant, ok: bool) {
        if !ok {
            self.error(format!("Step {name} failed"));
        }
        if !flatten {
            self.exec_stack.pop();
            let elapsed = started.elapsed().as_secs_f64();
            if elapsed >= 0.01 {
                self.info(format!("}} ({elapsed:.2} seconds)"));
            } else {
                self.info("}");
            }
        }
        if ok {
            *self.counts.entry(name.to_string()).or_insert(0) += 1;
        }
    }

    fn register_cleanup(&mut self, step: &str, handle: Box<dyn Release>) {
        if self.teardown {
            self.error(format!(
                "Cleanup handler registered by {step} during teardown, ignoring"
            ));
            return;
        }
        self.cleanups.push(CleanupEntry {
            step: step.to_string(),
            handle,
        });
    }

    fn unwind(&mut self) {
        self.teardown = true;
        let entries = std::mem::take(&mut self.cleanups);
        for mut entry in entries.into_iter().rev() {
            self.info(format!("Cleanup handler for {}", entry.step));
            if let Err(err) = entry.handle.release(self) {
                self.warning(format!("Cleanup for {} failed: {err:#}", entry.step));
            }
        }
    }

    /// How many times a step name has completed successfully in this
    /// session. Diagnostic only.
    pub fn invocation_count(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    /// Four spaces per open non-flattened invocation.
    pub fn current_indent(&self) -> String {
        "    ".repeat(self.exec_stack.len())
    }

    fn log(&self, severity: Severity, msg: impl Display) {
        logger::emit(severity, &format!("{}{}", self.current_indent(), msg));
    }

    pub fn debug(&self, msg: impl Display) {
        self.log(Severity::Debug, msg);
    }

    pub fn info(&self, msg: impl Display) {
        self.log(Severity::Info, msg);
    }

    pub fn warning(&self, msg: impl Display) {
        self.log(Severity::Warning, msg);
    }

    pub fn error(&self, msg: impl Display) {
        self.log(Severity::Error, msg);
    }

    pub fn critical(&self, msg: impl Display) {
        self.log(Severity::Critical, msg);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
