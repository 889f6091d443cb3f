//! The contract every pipeline unit implements.
//!
//! Positional arguments live on the implementing value, built at the call
//! site; `run`/`acquire` consume the value, so one value is one
//! invocation.

use anyhow::Result;

use crate::context::BuildContext;
use crate::session::Session;

/// A single unit of pipeline work.
pub trait Step {
    /// Result payload handed back to the caller.
    type Output;

    /// Name used for trace lines, counters, and failure logging.
    fn name(&self) -> &str;

    /// Flattened steps emit no open/close trace lines and add no
    /// indentation level of their own.
    fn flatten(&self) -> bool {
        false
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<Self::Output>;
}

/// A step that acquires an external resource.
///
/// Acquisition yields a release handle together with the payload. The
/// engine registers the handle for scope-exit unwind only when `acquire`
/// returns success; a failed acquisition is assumed to have produced
/// nothing needing release.
pub trait ResourceStep {
    type Output;
    type Handle: Release + 'static;

    fn name(&self) -> &str;

    fn flatten(&self) -> bool {
        false
    }

    fn acquire(self, s: &mut Session, ctx: &mut BuildContext)
        -> Result<(Self::Output, Self::Handle)>;
}

/// Deferred undo of a successful acquisition.
///
/// Invoked exactly once, during scope unwind, in reverse registration
/// order. A failure here is logged and does not stop the unwind.
pub trait Release {
    fn release(&mut self, s: &mut Session) -> Result<()>;
}
