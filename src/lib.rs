//! Build orchestration for Raspberry Pi kernel, firmware, and SD-card
//! images.
//!
//! The engineered part of this crate is a small framework every pipeline
//! step runs through; the build recipes are shell-out plumbing composed
//! on top of it.
//!
//! # Architecture
//!
//! ```text
//! image-builder
//!     │
//!     ├── session    - invocation engine, nesting-aware logging, and the
//!     │                cleanup stack unwound at scope exit
//!     ├── step       - the Step / ResourceStep / Release contracts
//!     ├── privilege  - sudo/fakeroot re-execution with snapshot handoff
//!     ├── context    - versioned build state crossing that boundary
//!     ├── resource   - temp dir, loop device, and mount acquisitions
//!     ├── image      - sparse images, classification, offset mounting
//!     │
//!     └── recipe     - git mirrors/worktrees, kernel + U-Boot builds,
//!                      firmware packaging, the composed pipeline
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use image_builder::resource::Mkdtemp;
//! use image_builder::{BuildContext, Session};
//!
//! let mut session = Session::new();
//! let mut ctx = BuildContext::new(std::env::temp_dir(), "repo".into());
//! session.scope(|s| {
//!     let scratch = s.acquire(&mut ctx, Mkdtemp::new())?;
//!     // ... build things under `scratch`; it is removed at scope exit,
//!     // even if a later step fails.
//!     Ok(())
//! })?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod image;
pub mod logger;
pub mod preflight;
pub mod privilege;
pub mod process;
pub mod recipe;
pub mod resource;
pub mod session;
pub mod step;

pub use context::BuildContext;
pub use error::BuilderError;
pub use privilege::{Domain, StepRegistry};
pub use session::Session;
pub use step::{Release, ResourceStep, Step};
