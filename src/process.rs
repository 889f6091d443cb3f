//! Subprocess invocation wrapper.
//!
//! Every shell-out in the crate goes through [`Cmd`]. `run` treats a
//! non-zero exit as an error unless `allow_fail` is set; `run_interactive`
//! leaves stdio attached to the terminal for long, progress-printing
//! tools like `make` (and for `sudo`, which may prompt).

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use anyhow::{Context, Result};

use crate::error::BuilderError;

pub struct Cmd {
    command: Command,
    display: String,
    allow_fail: bool,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        let display = program.as_ref().to_string_lossy().into_owned();
        Cmd {
            command: Command::new(program.as_ref()),
            display,
            allow_fail: false,
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.display.push(' ');
        self.display.push_str(&arg.as_ref().to_string_lossy());
        self.command.arg(arg.as_ref());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.command.current_dir(dir);
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.command.env(key, value);
        self
    }

    /// Read stdin from /dev/null (non-interactive config prompts etc).
    pub fn null_stdin(mut self) -> Self {
        self.command.stdin(Stdio::null());
        self
    }

    /// Treat a non-zero exit as an ordinary result instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Message prepended to the error when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Run with captured output; on failure the stderr tail is folded
    /// into the error.
    pub fn run(mut self) -> Result<ExitStatus> {
        let output = self
            .command
            .output()
            .with_context(|| format!("failed to execute {}", self.display))?;
        self.finish(output.status, Some(&output.stderr))
    }

    /// Run with stdio inherited from this process.
    pub fn run_interactive(mut self) -> Result<ExitStatus> {
        let status = self
            .command
            .status()
            .with_context(|| format!("failed to execute {}", self.display))?;
        self.finish(status, None)
    }

    /// Run with captured output and return trimmed stdout.
    pub fn run_capture(mut self) -> Result<String> {
        let output = self
            .command
            .output()
            .with_context(|| format!("failed to execute {}", self.display))?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        self.finish(output.status, Some(&output.stderr))?;
        Ok(stdout)
    }

    fn finish(self, status: ExitStatus, stderr: Option<&[u8]>) -> Result<ExitStatus> {
        if status.success() || self.allow_fail {
            return Ok(status);
        }
        let mut err = anyhow::Error::new(BuilderError::ExternalTool {
            command: self.display,
            status,
        });
        if let Some(bytes) = stderr {
            let tail = String::from_utf8_lossy(bytes);
            let tail = tail.trim();
            if !tail.is_empty() {
                err = err.context(format!("stderr: {tail}"));
            }
        }
        if let Some(msg) = self.error_msg {
            err = err.context(msg);
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_run_errors_on_non_zero_exit() {
        let err = Cmd::new("false").run().unwrap_err();
        match err.downcast_ref::<BuilderError>() {
            Some(BuilderError::ExternalTool { command, status }) => {
                assert_eq!(command, "false");
                assert!(!status.success());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn allow_fail_returns_the_status() {
        let status = Cmd::new("false").allow_fail().run().unwrap();
        assert!(!status.success());

        let status = Cmd::new("true").run().unwrap();
        assert!(status.success());
    }

    #[test]
    fn capture_returns_trimmed_stdout() {
        let out = Cmd::new("echo").arg("hello").run_capture().unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn error_msg_leads_the_context_chain() {
        let err = Cmd::new("false")
            .error_msg("refusing to cooperate")
            .run()
            .unwrap_err();
        assert!(format!("{err:#}").starts_with("refusing to cooperate"));
    }
}
