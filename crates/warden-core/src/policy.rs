use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider scope tags accepted on policy writes. `global` policies apply to
/// every request; the rest partition the provider layer of the decision
/// procedure.
pub const PROVIDERS: &[&str] = &["global", "aws", "gcp", "ssh", "rdp", "database"];

/// Scope tag carried by policies that are evaluated for every request.
pub const GLOBAL_PROVIDER: &str = "global";

pub fn recognized_provider(tag: &str) -> bool {
    PROVIDERS.contains(&tag)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Effect::Allow),
            "deny" => Some(Effect::Deny),
            _ => None,
        }
    }
}

/// The unit of authorization rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    pub effect: Effect,
    pub provider: String,
    /// Glob pattern matched against the request resource. Empty and `*`
    /// match everything.
    pub resource: String,
    /// Actions this policy covers; empty means any action.
    pub actions: Vec<String>,
    /// Predicate source over the request bindings. Must compile under the
    /// declared variable environment before the policy is accepted.
    pub expression: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub enabled: bool,
    pub priority: i32,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    fn metadata_str(&self, key: &str) -> Option<&str> {
        match self.metadata.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// User-facing reason when this policy fires, honoring the `message`
    /// metadata override.
    pub fn match_reason(&self) -> String {
        if let Some(msg) = self.metadata_str("message") {
            return msg.to_string();
        }
        match self.effect {
            Effect::Allow => format!("Access allowed by policy '{}'", self.name),
            Effect::Deny => format!("Access denied by policy '{}'", self.name),
        }
    }

    /// Trace reason when the predicate evaluated false, honoring the
    /// `non_match_message` metadata hint.
    pub fn non_match_reason(&self) -> String {
        self.metadata_str("non_match_message")
            .unwrap_or("conditions not met")
            .to_string()
    }
}

/// Client-supplied policy fields for create and update. Server-assigned
/// fields (`id`, `version`, timestamps) are never taken from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDraft {
    pub name: String,
    pub effect: Effect,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub actions: Vec<String>,
    pub expression: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_provider() -> String {
    GLOBAL_PROVIDER.to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(effect: Effect, metadata: serde_json::Value) -> Policy {
        let metadata = match metadata {
            serde_json::Value::Object(m) => m,
            _ => serde_json::Map::new(),
        };
        Policy {
            id: Uuid::new_v4(),
            name: "session-guard".to_string(),
            effect,
            provider: GLOBAL_PROVIDER.to_string(),
            resource: "*".to_string(),
            actions: Vec::new(),
            expression: "true".to_string(),
            metadata,
            enabled: true,
            priority: 100,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn match_reason_defaults_mention_effect_and_name() {
        let p = policy(Effect::Deny, serde_json::json!({}));
        assert_eq!(p.match_reason(), "Access denied by policy 'session-guard'");
        let p = policy(Effect::Allow, serde_json::json!({}));
        assert_eq!(p.match_reason(), "Access allowed by policy 'session-guard'");
    }

    #[test]
    fn metadata_message_overrides_default_reason() {
        let p = policy(
            Effect::Deny,
            serde_json::json!({"message": "Contact the on-call broker"}),
        );
        assert_eq!(p.match_reason(), "Contact the on-call broker");
    }

    #[test]
    fn empty_metadata_message_falls_back() {
        let p = policy(Effect::Allow, serde_json::json!({"message": ""}));
        assert_eq!(p.match_reason(), "Access allowed by policy 'session-guard'");
    }

    #[test]
    fn non_match_reason_prefers_hint() {
        let p = policy(
            Effect::Allow,
            serde_json::json!({"non_match_message": "Requires subject.group == 'analyst'"}),
        );
        assert_eq!(p.non_match_reason(), "Requires subject.group == 'analyst'");
        let p = policy(Effect::Allow, serde_json::json!({}));
        assert_eq!(p.non_match_reason(), "conditions not met");
    }

    #[test]
    fn draft_defaults_apply() {
        let draft: PolicyDraft = serde_json::from_value(serde_json::json!({
            "name": "p",
            "effect": "allow",
            "expression": "true",
        }))
        .unwrap();
        assert_eq!(draft.provider, "global");
        assert!(draft.enabled);
        assert_eq!(draft.priority, 100);
        assert!(draft.resource.is_empty());
        assert!(draft.actions.is_empty());
    }

    #[test]
    fn provider_tags_are_a_closed_set() {
        for tag in ["global", "aws", "gcp", "ssh", "rdp", "database"] {
            assert!(recognized_provider(tag), "{tag} should be recognized");
        }
        assert!(!recognized_provider("azure"));
        assert!(!recognized_provider(""));
        assert!(!recognized_provider("AWS"));
    }
}
