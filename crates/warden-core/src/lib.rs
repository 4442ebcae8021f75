//! Core types shared across the session warden workspace.
//!
//! This crate intentionally avoids pulling in heavy runtime dependencies so it
//! can be shared by the decision engine, the predicate compiler, and the
//! daemon.

pub mod decision;
pub mod policy;

pub use decision::*;
pub use policy::*;
