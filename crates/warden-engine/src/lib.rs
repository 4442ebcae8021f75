//! The decision engine: glob resource matching, candidate ordering, and the
//! two-layer deny-overrides evaluation procedure over a policy store, with
//! every decision written to an audit sink.

mod engine;
mod matcher;
pub mod memory;
mod store;

pub use engine::DecisionEngine;
pub use matcher::{resource_matches, specificity};
pub use store::{AuditSink, PolicyStore, StoreError};
