//! HTTP surface: the decision RPC, policy CRUD, and liveness.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use warden_core::{
    recognized_provider, DecisionRequest, DecisionResponse, Policy, PolicyDraft, GLOBAL_PROVIDER,
};
use warden_engine::DecisionEngine;

use crate::db::{PgStore, PolicyFilter, PolicyWriteError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PgStore>,
    pub engine: Arc<DecisionEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/evaluate", post(evaluate))
        .route("/policies", post(create_policy).get(list_policies))
        .route(
            "/policies/{id}",
            get(get_policy).put(update_policy).delete(delete_policy),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    ts: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        ts: Utc::now().to_rfc3339(),
    })
}

/// Decisions always answer 200; only malformed JSON is a protocol error.
async fn evaluate(
    State(st): State<AppState>,
    Json(req): Json<DecisionRequest>,
) -> Json<DecisionResponse> {
    Json(st.engine.decide(&req).await)
}

#[derive(Debug, Deserialize)]
struct ProviderQuery {
    provider: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    name: Option<String>,
    effect: Option<String>,
    enabled: Option<String>,
    provider: Option<String>,
}

async fn create_policy(
    State(st): State<AppState>,
    Query(q): Query<ProviderQuery>,
    Json(mut draft): Json<PolicyDraft>,
) -> Result<(StatusCode, Json<Policy>), ApiError> {
    if draft.name.trim().is_empty() {
        return Err(bad_request("policy name must not be empty"));
    }
    // The query parameter decides the scope; without one, new policies land
    // in the global scope regardless of the body.
    draft.provider = create_provider(q.provider.as_deref())?;
    let policy = st.store.create(&draft).await.map_err(write_error)?;
    Ok((StatusCode::CREATED, Json(policy)))
}

async fn list_policies(
    State(st): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Policy>>, ApiError> {
    let filter = list_filter(q);
    let policies = st.store.list(&filter).await.map_err(internal_error)?;
    Ok(Json(policies))
}

async fn get_policy(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Policy>, ApiError> {
    match st.store.get(id).await.map_err(internal_error)? {
        Some(policy) => Ok(Json(policy)),
        None => Err(not_found()),
    }
}

async fn update_policy(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<ProviderQuery>,
    Json(mut draft): Json<PolicyDraft>,
) -> Result<Json<Policy>, ApiError> {
    if draft.name.trim().is_empty() {
        return Err(bad_request("policy name must not be empty"));
    }
    draft.provider = update_provider(q.provider.as_deref(), &draft.provider)?;
    match st.store.update(id, &draft).await.map_err(write_error)? {
        Some(policy) => Ok(Json(policy)),
        None => Err(not_found()),
    }
}

async fn delete_policy(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if st.store.delete(id).await.map_err(internal_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}

fn create_provider(param: Option<&str>) -> Result<String, ApiError> {
    match param {
        Some(p) if recognized_provider(p) => Ok(p.to_string()),
        Some(p) => Err(bad_request(format!("invalid provider '{p}'"))),
        None => Ok(GLOBAL_PROVIDER.to_string()),
    }
}

fn update_provider(param: Option<&str>, body: &str) -> Result<String, ApiError> {
    match param {
        Some(p) if recognized_provider(p) => Ok(p.to_string()),
        Some(p) => Err(bad_request(format!("invalid provider '{p}'"))),
        None if recognized_provider(body) => Ok(body.to_string()),
        None => Err(bad_request(format!("invalid provider '{body}'"))),
    }
}

fn list_filter(q: ListQuery) -> PolicyFilter {
    PolicyFilter {
        name: q.name.filter(|s| !s.is_empty()),
        effect: q.effect.filter(|s| !s.is_empty()),
        enabled: q.enabled.as_deref().and_then(|v| match v {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }),
        provider: q.provider.filter(|s| !s.is_empty()),
    }
}

fn write_error(err: PolicyWriteError) -> ApiError {
    match err {
        PolicyWriteError::InvalidExpression(e) => bad_request(format!("invalid expression: {e}")),
        PolicyWriteError::Store(e) => internal_error(e),
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            code: "bad_request".to_string(),
            message: message.into(),
        }),
    )
}

fn not_found() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            code: "not_found".to_string(),
            message: "policy not found".to_string(),
        }),
    )
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            code: "internal_error".to_string(),
            message: "internal error".to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_defaults_to_global_scope() {
        assert_eq!(create_provider(None).unwrap(), "global");
        assert_eq!(create_provider(Some("aws")).unwrap(), "aws");
        let (status, _) = create_provider(Some("azure")).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn update_keeps_the_body_scope_without_a_query_override() {
        assert_eq!(update_provider(None, "ssh").unwrap(), "ssh");
        assert_eq!(update_provider(Some("rdp"), "ssh").unwrap(), "rdp");
        assert!(update_provider(Some("azure"), "ssh").is_err());
        assert!(update_provider(None, "azure").is_err());
    }

    #[test]
    fn list_filter_parses_enabled_and_drops_empty_filters() {
        let f = list_filter(ListQuery {
            name: Some("s3".to_string()),
            effect: Some(String::new()),
            enabled: Some("true".to_string()),
            provider: None,
        });
        assert_eq!(f.name.as_deref(), Some("s3"));
        assert_eq!(f.effect, None);
        assert_eq!(f.enabled, Some(true));
        assert_eq!(f.provider, None);

        let f = list_filter(ListQuery {
            name: None,
            effect: Some("deny".to_string()),
            enabled: Some("maybe".to_string()),
            provider: Some("aws".to_string()),
        });
        assert_eq!(f.effect.as_deref(), Some("deny"));
        assert_eq!(f.enabled, None);
        assert_eq!(f.provider.as_deref(), Some("aws"));
    }

    #[test]
    fn write_errors_map_to_status_codes() {
        let err = warden_expr::validate("subject.role ==").unwrap_err();
        let (status, body) = write_error(PolicyWriteError::InvalidExpression(err));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.0.message.contains("invalid expression"));
    }
}
