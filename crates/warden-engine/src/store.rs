use async_trait::async_trait;
use thiserror::Error;

use warden_core::{Policy, PolicyAudit};

/// Failure talking to the backing store. The decision procedure maps these
/// through its fail policy instead of propagating them.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Policy retrieval as the decision procedure consumes it. CRUD lives on the
/// concrete store; the engine only ever asks for candidate sets.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All enabled policies in `provider` scope whose action list is empty
    /// or contains `action`. When `action` is empty the action filter is
    /// omitted entirely. Order is unspecified; the engine sorts in-memory.
    async fn list_candidates(
        &self,
        provider: &str,
        action: &str,
    ) -> Result<Vec<Policy>, StoreError>;
}

/// Append-only persistence for decision audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn persist_audit(&self, audit: PolicyAudit) -> Result<(), StoreError>;
}
