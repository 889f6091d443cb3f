//! Acquire/release primitives for external OS resources.
//!
//! Each primitive is a [`ResourceStep`](crate::step::ResourceStep):
//! acquisition returns the resource and a release handle, and the engine
//! queues the handle for reverse-order unwind at scope exit.

pub mod loopback;
pub mod mount;
pub mod tempdir;

pub use loopback::LoopbackAttach;
pub use mount::MountFs;
pub use tempdir::Mkdtemp;
