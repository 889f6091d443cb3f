//! Privilege preconditions.
//!
//! Both checks are once-designated: run them through
//! [`Session::invoke_once`](crate::session::Session::invoke_once) so
//! repeated calls within one session stay silent.

use anyhow::Result;

use crate::context::BuildContext;
use crate::error::BuilderError;
use crate::session::Session;
use crate::step::Step;

fn effective_uid() -> u32 {
    unsafe { libc::geteuid() }
}

/// Fails unless the process runs with an effective uid of 0.
pub struct CheckRoot;

impl Step for CheckRoot {
    type Output = ();

    fn name(&self) -> &str {
        "check_root"
    }

    fn run(self, _s: &mut Session, _ctx: &mut BuildContext) -> Result<()> {
        if effective_uid() != 0 {
            return Err(
                BuilderError::PrivilegeRequirement("this step needs to run as root".into())
                    .into(),
            );
        }
        Ok(())
    }
}

/// Fails unless the process sees a (possibly faked) effective uid of 0.
pub struct CheckFakeroot;

impl Step for CheckFakeroot {
    type Output = ();

    fn name(&self) -> &str {
        "check_fakeroot"
    }

    fn run(self, _s: &mut Session, _ctx: &mut BuildContext) -> Result<()> {
        if effective_uid() != 0 {
            return Err(BuilderError::PrivilegeRequirement(
                "this step needs to run under fakeroot".into(),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn check_root_reflects_the_effective_uid() {
        let mut s = Session::new();
        let mut ctx = BuildContext::new(std::env::temp_dir(), PathBuf::from("repo"));

        let result = s.invoke_once(&mut ctx, CheckRoot);
        assert_eq!(result.is_ok(), effective_uid() == 0);

        if let Err(err) = result {
            assert!(matches!(
                err.downcast_ref::<BuilderError>(),
                Some(BuilderError::PrivilegeRequirement(_))
            ));
        }
    }
}
