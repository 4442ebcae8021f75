use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use warden_core::{
    Decision, DecisionRequest, DecisionResponse, Effect, Policy, PolicyAudit, TraceItem,
    GLOBAL_PROVIDER,
};
use warden_expr::{EvalError, ProgramCache};

use crate::matcher::{resource_matches, specificity};
use crate::store::{AuditSink, PolicyStore, StoreError};

/// The two-layer, deny-overrides decision procedure.
///
/// Global-scope policies are evaluated first: a firing deny is final, a
/// firing allow only permits progression. The provider layer (derived from
/// `cloud`, falling back to `protocol`) then decides: the first firing allow
/// is remembered, but evaluation continues so a later deny can still
/// override. No firing allow means deny.
///
/// With `fail_closed` set (the default), internal errors never yield allow.
pub struct DecisionEngine {
    store: Arc<dyn PolicyStore>,
    sink: Arc<dyn AuditSink>,
    programs: Arc<ProgramCache>,
    fail_closed: bool,
}

enum CandidateOutcome {
    /// Predicate returned true.
    Fired,
    /// Predicate returned false.
    NotFired,
    /// Compile or runtime failure under fail-closed; carries the decision
    /// reason and makes the candidate the matched deny.
    FailClosed(String),
    /// Compile or runtime failure under fail-open; the candidate is skipped.
    SkippedOpen,
}

impl DecisionEngine {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        sink: Arc<dyn AuditSink>,
        programs: Arc<ProgramCache>,
        fail_closed: bool,
    ) -> Self {
        Self {
            store,
            sink,
            programs,
            fail_closed,
        }
    }

    /// The compiled-program cache, shared with whoever applies CRUD
    /// mutations so updates can invalidate by policy identity.
    pub fn programs(&self) -> Arc<ProgramCache> {
        Arc::clone(&self.programs)
    }

    /// Evaluate a request and append one audit record. Audit failures are
    /// logged and swallowed; they never block the decision.
    pub async fn decide(&self, req: &DecisionRequest) -> DecisionResponse {
        let response = self.evaluate(req).await;
        let audit = PolicyAudit {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            request: req.clone(),
            decision: response.decision,
            matched: response.matched,
            trace: response.trace.clone(),
        };
        if let Err(err) = self.sink.persist_audit(audit).await {
            tracing::warn!(error = %err, "failed to persist decision audit");
        }
        response
    }

    async fn evaluate(&self, req: &DecisionRequest) -> DecisionResponse {
        let bindings = req.bindings();
        let mut trace = Vec::new();

        // Global layer. A firing deny is final; a firing allow is traced but
        // never authoritative on its own.
        let globals = match self.store.list_candidates(GLOBAL_PROVIDER, &req.action).await {
            Ok(policies) => policies,
            Err(err) => return self.store_failure(&err, trace),
        };
        for policy in &retain_and_order(globals, &req.resource) {
            match self.eval_candidate(policy, &bindings, &mut trace) {
                CandidateOutcome::Fired if policy.effect == Effect::Deny => {
                    return decided(Decision::Deny, Some(policy), policy.match_reason(), trace);
                }
                CandidateOutcome::FailClosed(reason) => {
                    return decided(Decision::Deny, Some(policy), reason, trace);
                }
                _ => {}
            }
        }

        let provider = effective_provider(req);
        if provider.is_empty() {
            return decided(
                Decision::Deny,
                None,
                "Access denied: no provider specified".to_string(),
                trace,
            );
        }

        // Provider layer.
        let candidates = match self.store.list_candidates(provider, &req.action).await {
            Ok(policies) => policies,
            Err(err) => return self.store_failure(&err, trace),
        };
        let candidates = retain_and_order(candidates, &req.resource);

        let mut allow_winner: Option<&Policy> = None;
        for policy in &candidates {
            match self.eval_candidate(policy, &bindings, &mut trace) {
                CandidateOutcome::Fired => match policy.effect {
                    Effect::Deny => {
                        return decided(Decision::Deny, Some(policy), policy.match_reason(), trace);
                    }
                    // First firing allow wins; keep going so a later deny
                    // can still override.
                    Effect::Allow => allow_winner = allow_winner.or(Some(policy)),
                },
                CandidateOutcome::FailClosed(reason) => {
                    return decided(Decision::Deny, Some(policy), reason, trace);
                }
                CandidateOutcome::NotFired | CandidateOutcome::SkippedOpen => {}
            }
        }

        if let Some(winner) = allow_winner {
            return decided(Decision::Allow, Some(winner), winner.match_reason(), trace);
        }

        decided(
            Decision::Deny,
            None,
            format!(
                "Access denied: no allow policy matched for action '{}' on resource '{}'",
                req.action, req.resource
            ),
            trace,
        )
    }

    fn eval_candidate(
        &self,
        policy: &Policy,
        bindings: &serde_json::Map<String, serde_json::Value>,
        trace: &mut Vec<TraceItem>,
    ) -> CandidateOutcome {
        let program = match self.programs.get_or_compile(policy.id, &policy.expression) {
            Ok(program) => program,
            Err(err) => {
                trace.push(TraceItem {
                    policy: policy.id,
                    effect: policy.effect,
                    result: None,
                    reason: self.failure_note("policy expression failed to compile"),
                    error: format!("compile: {err}"),
                });
                return self.failure_outcome(format!(
                    "Access denied by policy '{}': expression failed to compile",
                    policy.name
                ));
            }
        };

        match program.eval_bool(bindings) {
            Ok(true) => {
                trace.push(TraceItem {
                    policy: policy.id,
                    effect: policy.effect,
                    result: Some(true),
                    reason: policy.match_reason(),
                    error: String::new(),
                });
                CandidateOutcome::Fired
            }
            Ok(false) => {
                trace.push(TraceItem {
                    policy: policy.id,
                    effect: policy.effect,
                    result: Some(false),
                    reason: policy.non_match_reason(),
                    error: String::new(),
                });
                CandidateOutcome::NotFired
            }
            Err(err) => {
                let (error, note, closed_reason) = match &err {
                    EvalError::NonBoolean(_) => (
                        "non-boolean result".to_string(),
                        "policy expression did not return a boolean",
                        format!(
                            "Access denied by policy '{}': expression did not return true/false",
                            policy.name
                        ),
                    ),
                    other => (
                        format!("runtime: {other}"),
                        "policy evaluation runtime error",
                        format!(
                            "Access denied by policy '{}': runtime error during evaluation",
                            policy.name
                        ),
                    ),
                };
                trace.push(TraceItem {
                    policy: policy.id,
                    effect: policy.effect,
                    result: None,
                    reason: self.failure_note(note),
                    error,
                });
                self.failure_outcome(closed_reason)
            }
        }
    }

    fn failure_note(&self, note: &str) -> String {
        if self.fail_closed {
            note.to_string()
        } else {
            format!("{note} (fail-open, skipped)")
        }
    }

    fn failure_outcome(&self, closed_reason: String) -> CandidateOutcome {
        if self.fail_closed {
            CandidateOutcome::FailClosed(closed_reason)
        } else {
            CandidateOutcome::SkippedOpen
        }
    }

    fn store_failure(&self, err: &StoreError, trace: Vec<TraceItem>) -> DecisionResponse {
        tracing::error!(error = %err, "policy store unavailable");
        if self.fail_closed {
            decided(
                Decision::Deny,
                None,
                format!("database error: {err}"),
                trace,
            )
        } else {
            decided(
                Decision::Allow,
                None,
                "database error (fail-open)".to_string(),
                trace,
            )
        }
    }
}

fn decided(
    decision: Decision,
    matched: Option<&Policy>,
    reason: String,
    trace: Vec<TraceItem>,
) -> DecisionResponse {
    DecisionResponse {
        decision,
        matched: matched.map(|p| p.id),
        reason,
        trace,
    }
}

/// Provider scope for the second layer: the request's cloud unless empty or
/// the literal `"none"`, else its protocol.
fn effective_provider(req: &DecisionRequest) -> &str {
    if !req.cloud.is_empty() && req.cloud != "none" {
        &req.cloud
    } else {
        &req.protocol
    }
}

/// Keep candidates whose resource pattern covers the request resource and
/// order them: priority ascending, specificity descending, created_at
/// ascending, identity text ascending. The sort is total, so evaluation
/// order is reproducible across runs with identical data.
fn retain_and_order(mut policies: Vec<Policy>, resource: &str) -> Vec<Policy> {
    policies.retain(|p| resource_matches(&p.resource, resource));
    policies.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| specificity(&b.resource).cmp(&specificity(&a.resource)))
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
    });
    policies
}
