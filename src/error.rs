//! Failure taxonomy for the orchestration core.
//!
//! Only failures the core distinguishes by kind live here; everything else
//! travels as plain `anyhow` context chains.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuilderError {
    /// An invoked OS command exited non-zero.
    #[error("{command}: {status}")]
    ExternalTool { command: String, status: ExitStatus },

    /// An OS resource could not be acquired (loop device, mount, scratch
    /// directory).
    #[error("resource acquisition failed: {0}")]
    ResourceAcquisition(String),

    /// A step expected an elevated privilege domain that is absent.
    #[error("{0}")]
    PrivilegeRequirement(String),

    /// An image file could not be classified for mounting by extension
    /// and size.
    #[error("can't determine image type for {}", .0.display())]
    ImageFormatUnrecognized(PathBuf),

    /// A context snapshot was written by a different build of this
    /// program.
    #[error("state snapshot version {found} does not match expected {expected}")]
    StateVersionMismatch { found: u32, expected: u32 },
}
