//! In-memory store and sink for engine tests and local experimentation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use warden_core::{Policy, PolicyAudit};

use crate::store::{AuditSink, PolicyStore, StoreError};

/// A `PolicyStore` + `AuditSink` backed by vectors. Candidate filtering
/// mirrors the SQL contract of the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    policies: Mutex<Vec<Policy>>,
    audits: Mutex<Vec<PolicyAudit>>,
    fail_candidates: AtomicBool,
    fail_audits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, policy: Policy) {
        self.policies
            .lock()
            .expect("memory store lock poisoned")
            .push(policy);
    }

    /// Replace the policy with the same id, if present.
    pub fn replace(&self, policy: Policy) {
        let mut policies = self.policies.lock().expect("memory store lock poisoned");
        if let Some(slot) = policies.iter_mut().find(|p| p.id == policy.id) {
            *slot = policy;
        }
    }

    /// Make subsequent candidate fetches fail, to exercise the engine's
    /// fail policy.
    pub fn set_fail_candidates(&self, failing: bool) {
        self.fail_candidates.store(failing, Ordering::SeqCst);
    }

    /// Make subsequent audit writes fail.
    pub fn set_fail_audits(&self, failing: bool) {
        self.fail_audits.store(failing, Ordering::SeqCst);
    }

    pub fn audits(&self) -> Vec<PolicyAudit> {
        self.audits
            .lock()
            .expect("memory store lock poisoned")
            .clone()
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn list_candidates(
        &self,
        provider: &str,
        action: &str,
    ) -> Result<Vec<Policy>, StoreError> {
        if self.fail_candidates.load(Ordering::SeqCst) {
            return Err(StoreError::new("connection refused"));
        }
        let policies = self.policies.lock().expect("memory store lock poisoned");
        Ok(policies
            .iter()
            .filter(|p| p.enabled && p.provider == provider)
            .filter(|p| {
                action.is_empty()
                    || p.actions.is_empty()
                    || p.actions.iter().any(|a| a == action)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn persist_audit(&self, audit: PolicyAudit) -> Result<(), StoreError> {
        if self.fail_audits.load(Ordering::SeqCst) {
            return Err(StoreError::new("connection refused"));
        }
        self.audits
            .lock()
            .expect("memory store lock poisoned")
            .push(audit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use warden_core::Effect;

    fn policy(provider: &str, actions: &[&str], enabled: bool) -> Policy {
        Policy {
            id: Uuid::new_v4(),
            name: "p".to_string(),
            effect: Effect::Allow,
            provider: provider.to_string(),
            resource: "*".to_string(),
            actions: actions.iter().map(|s| s.to_string()).collect(),
            expression: "true".to_string(),
            metadata: serde_json::Map::new(),
            enabled,
            priority: 100,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn filters_by_provider_and_enabled() {
        let store = MemoryStore::new();
        store.insert(policy("aws", &[], true));
        store.insert(policy("gcp", &[], true));
        store.insert(policy("aws", &[], false));

        let got = store.list_candidates("aws", "").await.unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn empty_action_list_matches_any_action() {
        let store = MemoryStore::new();
        store.insert(policy("aws", &[], true));
        store.insert(policy("aws", &["s3:GetObject"], true));
        store.insert(policy("aws", &["s3:PutObject"], true));

        let got = store.list_candidates("aws", "s3:GetObject").await.unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn empty_request_action_omits_the_action_filter() {
        let store = MemoryStore::new();
        store.insert(policy("aws", &["s3:GetObject"], true));
        store.insert(policy("aws", &[], true));

        let got = store.list_candidates("aws", "").await.unwrap();
        assert_eq!(got.len(), 2);
    }
}
