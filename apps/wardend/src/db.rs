//! Postgres-backed policy store and audit sink.
//!
//! CRUD mutations validate the policy expression before touching the
//! database and invalidate the compiled-program cache after committing, so a
//! decision never observes a policy whose cached program predates its
//! current expression.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use warden_core::{Effect, Policy, PolicyAudit, PolicyDraft};
use warden_engine::{AuditSink, PolicyStore, StoreError};
use warden_expr::{ExprError, ProgramCache};

const POLICY_COLUMNS: &str = "id, name, effect, provider, resource, actions, expression, \
     metadata, enabled, priority, version, created_at, updated_at";

/// Why a policy write was rejected.
#[derive(Debug, Error)]
pub enum PolicyWriteError {
    #[error("invalid expression: {0}")]
    InvalidExpression(#[from] ExprError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Optional filters for the policy listing.
#[derive(Debug, Default, Clone)]
pub struct PolicyFilter {
    /// Case-insensitive substring match on the name.
    pub name: Option<String>,
    pub effect: Option<String>,
    pub enabled: Option<bool>,
    pub provider: Option<String>,
}

pub struct PgStore {
    pool: PgPool,
    programs: Arc<ProgramCache>,
}

impl PgStore {
    pub fn new(pool: PgPool, programs: Arc<ProgramCache>) -> Self {
        Self { pool, programs }
    }

    /// Create extensions, tables, and indexes. Idempotent.
    pub async fn init_schema(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("begin tx")?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS pgcrypto")
            .execute(&mut *tx)
            .await
            .context("create pgcrypto extension")?;
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_trgm")
            .execute(&mut *tx)
            .await
            .context("create pg_trgm extension")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS policies (
              id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
              name        TEXT NOT NULL,
              effect      TEXT NOT NULL CHECK (effect IN ('allow','deny')),
              provider    TEXT NOT NULL DEFAULT 'global',
              resource    TEXT NOT NULL DEFAULT '',
              actions     TEXT[] NOT NULL DEFAULT '{}',
              expression  TEXT NOT NULL,
              metadata    JSONB NOT NULL DEFAULT '{}'::jsonb,
              enabled     BOOLEAN NOT NULL DEFAULT TRUE,
              priority    INTEGER NOT NULL DEFAULT 100,
              version     INTEGER NOT NULL DEFAULT 1,
              created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
              updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .context("create policies")?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS policies_provider_idx ON policies (provider)",
            "CREATE INDEX IF NOT EXISTS policies_actions_idx ON policies USING gin (actions)",
            "CREATE INDEX IF NOT EXISTS policies_metadata_idx ON policies USING gin (metadata)",
            "CREATE INDEX IF NOT EXISTS policies_resource_trgm_idx \
             ON policies USING gin (resource gin_trgm_ops)",
        ] {
            sqlx::query(stmt)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("apply: {stmt}"))?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS policy_audits (
              id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
              request     JSONB NOT NULL,
              decision    TEXT NOT NULL,
              matched_id  UUID,
              trace       JSONB NOT NULL,
              created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .context("create policy_audits")?;

        tx.commit().await.context("commit schema")?;
        Ok(())
    }

    pub async fn create(&self, draft: &PolicyDraft) -> Result<Policy, PolicyWriteError> {
        warden_expr::validate(&draft.expression)?;

        let row = sqlx::query(&format!(
            "INSERT INTO policies (name, effect, provider, resource, actions, expression, \
             metadata, enabled, priority) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {POLICY_COLUMNS}"
        ))
        .bind(&draft.name)
        .bind(draft.effect.as_str())
        .bind(&draft.provider)
        .bind(&draft.resource)
        .bind(&draft.actions)
        .bind(&draft.expression)
        .bind(sqlx::types::Json(&draft.metadata))
        .bind(draft.enabled)
        .bind(draft.priority)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        let policy = policy_from_row(&row)?;
        self.programs.invalidate(policy.id);
        Ok(policy)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Policy>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.as_ref().map(policy_from_row).transpose()
    }

    pub async fn list(&self, filter: &PolicyFilter) -> Result<Vec<Policy>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies \
             WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%') \
               AND ($2::text IS NULL OR effect = $2) \
               AND ($3::boolean IS NULL OR enabled = $3) \
               AND ($4::text IS NULL OR provider = $4) \
             ORDER BY priority ASC, created_at ASC"
        ))
        .bind(filter.name.as_deref())
        .bind(filter.effect.as_deref())
        .bind(filter.enabled)
        .bind(filter.provider.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(policy_from_row).collect()
    }

    /// Update every mutable field, preserving `id` and `created_at` and
    /// bumping `version` server-side. Returns `None` for an unknown id.
    pub async fn update(
        &self,
        id: Uuid,
        draft: &PolicyDraft,
    ) -> Result<Option<Policy>, PolicyWriteError> {
        warden_expr::validate(&draft.expression)?;

        let row = sqlx::query(&format!(
            "UPDATE policies SET name = $2, effect = $3, provider = $4, resource = $5, \
             actions = $6, expression = $7, metadata = $8, enabled = $9, priority = $10, \
             version = version + 1, updated_at = now() \
             WHERE id = $1 \
             RETURNING {POLICY_COLUMNS}"
        ))
        .bind(id)
        .bind(&draft.name)
        .bind(draft.effect.as_str())
        .bind(&draft.provider)
        .bind(&draft.resource)
        .bind(&draft.actions)
        .bind(&draft.expression)
        .bind(sqlx::types::Json(&draft.metadata))
        .bind(draft.enabled)
        .bind(draft.priority)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let policy = row.as_ref().map(policy_from_row).transpose()?;
        if policy.is_some() {
            self.programs.invalidate(id);
        }
        Ok(policy)
    }

    /// Returns whether a row was removed.
    pub async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM policies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        let removed = result.rows_affected() > 0;
        if removed {
            self.programs.invalidate(id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl PolicyStore for PgStore {
    async fn list_candidates(
        &self,
        provider: &str,
        action: &str,
    ) -> Result<Vec<Policy>, StoreError> {
        let rows = if action.is_empty() {
            sqlx::query(&format!(
                "SELECT {POLICY_COLUMNS} FROM policies WHERE enabled AND provider = $1"
            ))
            .bind(provider)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(&format!(
                "SELECT {POLICY_COLUMNS} FROM policies \
                 WHERE enabled AND provider = $1 \
                   AND ($2 = ANY(actions) OR cardinality(actions) = 0)"
            ))
            .bind(provider)
            .bind(action)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(store_err)?;
        rows.iter().map(policy_from_row).collect()
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn persist_audit(&self, audit: PolicyAudit) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO policy_audits (id, request, decision, matched_id, trace, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(audit.id)
        .bind(sqlx::types::Json(&audit.request))
        .bind(audit.decision.as_str())
        .bind(audit.matched)
        .bind(sqlx::types::Json(&audit.trace))
        .bind(audit.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

fn store_err(err: sqlx::Error) -> StoreError {
    StoreError::new(err.to_string())
}

fn policy_from_row(row: &PgRow) -> Result<Policy, StoreError> {
    let effect: String = row.get("effect");
    let effect = Effect::parse(&effect)
        .ok_or_else(|| StoreError::new(format!("unknown effect '{effect}' in policies row")))?;
    let metadata = row
        .get::<sqlx::types::Json<serde_json::Map<String, serde_json::Value>>, _>("metadata")
        .0;
    Ok(Policy {
        id: row.get("id"),
        name: row.get("name"),
        effect,
        provider: row.get("provider"),
        resource: row.get("resource"),
        actions: row.get("actions"),
        expression: row.get("expression"),
        metadata,
        enabled: row.get("enabled"),
        priority: row.get("priority"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
