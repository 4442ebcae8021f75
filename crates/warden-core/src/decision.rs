use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::Effect;

/// One authorization question: who wants to do what to which resource,
/// under which ambient context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub subject: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub platform: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cloud: String,
}

impl DecisionRequest {
    /// The variable bindings predicate programs evaluate against. Keys match
    /// the declared compile-time environment exactly.
    pub fn bindings(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut b = serde_json::Map::with_capacity(7);
        b.insert(
            "subject".to_string(),
            serde_json::Value::Object(self.subject.clone()),
        );
        b.insert("resource".to_string(), self.resource.clone().into());
        b.insert("action".to_string(), self.action.clone().into());
        b.insert(
            "metadata".to_string(),
            serde_json::Value::Object(self.metadata.clone()),
        );
        b.insert("protocol".to_string(), self.protocol.clone().into());
        b.insert("platform".to_string(), self.platform.clone().into());
        b.insert("cloud".to_string(), self.cloud.clone().into());
        b
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
        }
    }
}

/// Evaluation evidence for one candidate policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceItem {
    pub policy: Uuid,
    pub effect: Effect,
    /// The predicate's return value; absent when evaluation raised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// What `/evaluate` returns to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub decision: Decision,
    pub matched: Option<Uuid>,
    pub reason: String,
    pub trace: Vec<TraceItem>,
}

/// One durable audit record per decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAudit {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub request: DecisionRequest,
    pub decision: Decision,
    pub matched: Option<Uuid>,
    pub trace: Vec<TraceItem>,
}
