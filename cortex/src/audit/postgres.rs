use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::AuditStore;
use super::errors::{Result, StoreError};
use super::models::{
    ApiKeyOwnership, AuditEntry, AuditUnit, CompareSummaryRecord, DecisionAudit, GroupAudit, RequestAudit, RequestRecord, ResponseRecord,
    RoutingAttemptRecord, RoutingDecisionRecord,
};
use crate::models::ResponseError;
use crate::providers::TokenUsage;
use crate::types::{ApiKeyId, DecisionId, GroupId, RequestId, UserId, abbrev_uuid};

/// Audit store backed by PostgreSQL. Each unit is written in a single transaction.
#[derive(Debug, Clone)]
pub struct PostgresAuditStore {
    pool: PgPool,
}

impl PostgresAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Database entity models

#[derive(Debug, FromRow)]
struct OwnershipRow {
    api_key_id: ApiKeyId,
    user_id: UserId,
    auto_registered: bool,
    created_at: DateTime<Utc>,
}

impl From<OwnershipRow> for ApiKeyOwnership {
    fn from(row: OwnershipRow) -> Self {
        Self {
            api_key_id: row.api_key_id,
            user_id: row.user_id,
            auto_registered: row.auto_registered,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RequestRow {
    id: RequestId,
    group_id: Option<GroupId>,
    provider: Option<String>,
    model: Option<String>,
    prompt: String,
    prompt_sha256: String,
    session_id: Option<String>,
    routing_mode: String,
    api_key_id: Option<ApiKeyId>,
    user_id: UserId,
    created_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for RequestRecord {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            group_id: row.group_id,
            provider: row.provider,
            model: row.model,
            prompt: row.prompt,
            prompt_sha256: row.prompt_sha256,
            session_id: row.session_id,
            routing_mode: row.routing_mode.parse().map_err(corrupt)?,
            api_key_id: row.api_key_id,
            user_id: row.user_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ResponseRow {
    id: Uuid,
    request_id: RequestId,
    group_id: Option<GroupId>,
    provider: Option<String>,
    model: Option<String>,
    text: Option<String>,
    finish_reason: String,
    error_kind: Option<String>,
    error_message: Option<String>,
    error_retryable: Option<bool>,
    prompt_tokens: i32,
    completion_tokens: i32,
    total_tokens: i32,
    estimated_cost: Decimal,
    latency_ms: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<ResponseRow> for ResponseRecord {
    type Error = StoreError;

    fn try_from(row: ResponseRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            request_id: row.request_id,
            group_id: row.group_id,
            provider: row.provider,
            model: row.model,
            text: row.text,
            finish_reason: row.finish_reason.parse().map_err(corrupt)?,
            error: read_error(row.error_kind, row.error_message, row.error_retryable)?,
            token_usage: TokenUsage {
                prompt_tokens: from_db(row.prompt_tokens),
                completion_tokens: from_db(row.completion_tokens),
                total_tokens: from_db(row.total_tokens),
            },
            estimated_cost: row.estimated_cost,
            latency_ms: u64::try_from(row.latency_ms).unwrap_or_default(),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    group_id: GroupId,
    success_count: i32,
    error_count: i32,
    total_tokens: i64,
    total_cost: Decimal,
    created_at: DateTime<Utc>,
}

impl From<SummaryRow> for CompareSummaryRecord {
    fn from(row: SummaryRow) -> Self {
        Self {
            group_id: row.group_id,
            success_count: from_db(row.success_count),
            error_count: from_db(row.error_count),
            total_tokens: u64::try_from(row.total_tokens).unwrap_or_default(),
            total_cost: row.total_cost,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct DecisionRow {
    id: DecisionId,
    request_id: RequestId,
    initial_tier: String,
    final_tier: String,
    attempt_count: i32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct AttemptRow {
    decision_id: DecisionId,
    attempt_number: i32,
    provider: String,
    model: String,
    tier: String,
    outcome: String,
    error_kind: Option<String>,
    error_message: Option<String>,
    error_retryable: Option<bool>,
    latency_ms: i64,
}

impl TryFrom<AttemptRow> for RoutingAttemptRecord {
    type Error = StoreError;

    fn try_from(row: AttemptRow) -> Result<Self> {
        Ok(Self {
            decision_id: row.decision_id,
            attempt_number: from_db(row.attempt_number),
            provider: row.provider,
            model: row.model,
            tier: row.tier,
            outcome: row.outcome.parse().map_err(corrupt)?,
            error: read_error(row.error_kind, row.error_message, row.error_retryable)?,
            latency_ms: u64::try_from(row.latency_ms).unwrap_or_default(),
        })
    }
}

fn corrupt(message: String) -> StoreError {
    StoreError::Other(anyhow::anyhow!("corrupt audit row: {message}"))
}

fn read_error(kind: Option<String>, message: Option<String>, retryable: Option<bool>) -> Result<Option<ResponseError>> {
    let Some(kind) = kind else {
        return Ok(None);
    };
    let kind = kind.parse().map_err(corrupt)?;
    Ok(Some(ResponseError {
        kind,
        message: message.unwrap_or_default(),
        retryable: retryable.unwrap_or(false),
    }))
}

fn to_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn from_db(value: i32) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

fn millis_to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Split an optional error into its three columns.
fn error_columns(error: Option<&ResponseError>) -> (Option<&'static str>, Option<&str>, Option<bool>) {
    match error {
        Some(e) => (Some(e.kind.as_str()), Some(e.message.as_str()), Some(e.retryable)),
        None => (None, None, None),
    }
}

async fn insert_summary(conn: &mut PgConnection, summary: &CompareSummaryRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO compare_groups (group_id, success_count, error_count, total_tokens, total_cost, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(summary.group_id)
    .bind(to_db(summary.success_count))
    .bind(to_db(summary.error_count))
    .bind(i64::try_from(summary.total_tokens).unwrap_or(i64::MAX))
    .bind(summary.total_cost)
    .bind(summary.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_entry(conn: &mut PgConnection, entry: &AuditEntry) -> Result<()> {
    let request = &entry.request;
    sqlx::query(
        r#"
        INSERT INTO requests (
            id, group_id, provider, model, prompt, prompt_sha256, session_id, routing_mode, api_key_id, user_id, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(request.id)
    .bind(request.group_id)
    .bind(&request.provider)
    .bind(&request.model)
    .bind(&request.prompt)
    .bind(&request.prompt_sha256)
    .bind(&request.session_id)
    .bind(request.routing_mode.as_str())
    .bind(request.api_key_id)
    .bind(request.user_id)
    .bind(request.created_at)
    .execute(&mut *conn)
    .await?;

    let response = &entry.response;
    let (error_kind, error_message, error_retryable) = error_columns(response.error.as_ref());
    sqlx::query(
        r#"
        INSERT INTO responses (
            id, request_id, group_id, provider, model, text, finish_reason,
            error_kind, error_message, error_retryable,
            prompt_tokens, completion_tokens, total_tokens, estimated_cost, latency_ms, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(response.id)
    .bind(response.request_id)
    .bind(response.group_id)
    .bind(&response.provider)
    .bind(&response.model)
    .bind(&response.text)
    .bind(response.finish_reason.as_str())
    .bind(error_kind)
    .bind(error_message)
    .bind(error_retryable)
    .bind(to_db(response.token_usage.prompt_tokens))
    .bind(to_db(response.token_usage.completion_tokens))
    .bind(to_db(response.token_usage.total_tokens))
    .bind(response.estimated_cost)
    .bind(millis_to_db(response.latency_ms))
    .bind(response.created_at)
    .execute(&mut *conn)
    .await?;

    let Some(audit) = &entry.decision else {
        return Ok(());
    };
    let decision = &audit.decision;
    sqlx::query(
        r#"
        INSERT INTO routing_decisions (id, request_id, initial_tier, final_tier, attempt_count, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(decision.id)
    .bind(decision.request_id)
    .bind(&decision.initial_tier)
    .bind(&decision.final_tier)
    .bind(to_db(decision.attempt_count))
    .bind(decision.created_at)
    .execute(&mut *conn)
    .await?;

    for attempt in &audit.attempts {
        let (error_kind, error_message, error_retryable) = error_columns(attempt.error.as_ref());
        sqlx::query(
            r#"
            INSERT INTO routing_attempts (
                decision_id, attempt_number, provider, model, tier, outcome,
                error_kind, error_message, error_retryable, latency_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(attempt.decision_id)
        .bind(to_db(attempt.attempt_number))
        .bind(&attempt.provider)
        .bind(&attempt.model)
        .bind(&attempt.tier)
        .bind(attempt.outcome.as_str())
        .bind(error_kind)
        .bind(error_message)
        .bind(error_retryable)
        .bind(millis_to_db(attempt.latency_ms))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

impl PostgresAuditStore {
    async fn load_audit(&self, row: RequestRow) -> Result<RequestAudit> {
        let request = RequestRecord::try_from(row)?;

        let responses = sqlx::query_as::<_, ResponseRow>("SELECT * FROM responses WHERE request_id = $1 ORDER BY created_at, id")
            .bind(request.id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ResponseRecord::try_from)
            .collect::<Result<Vec<_>>>()?;

        let decision = sqlx::query_as::<_, DecisionRow>(
            "SELECT id, request_id, initial_tier, final_tier, attempt_count, created_at FROM routing_decisions WHERE request_id = $1",
        )
        .bind(request.id)
        .fetch_optional(&self.pool)
        .await?;

        let decision = match decision {
            Some(row) => {
                let attempts = sqlx::query_as::<_, AttemptRow>("SELECT * FROM routing_attempts WHERE decision_id = $1 ORDER BY attempt_number")
                    .bind(row.id)
                    .fetch_all(&self.pool)
                    .await?
                    .into_iter()
                    .map(RoutingAttemptRecord::try_from)
                    .collect::<Result<Vec<_>>>()?;
                Some(DecisionAudit {
                    decision: RoutingDecisionRecord {
                        id: row.id,
                        request_id: row.request_id,
                        initial_tier: row.initial_tier,
                        final_tier: row.final_tier,
                        attempt_count: from_db(row.attempt_count),
                        created_at: row.created_at,
                    },
                    attempts,
                })
            }
            None => None,
        };

        Ok(RequestAudit {
            request,
            responses,
            decision,
        })
    }
}

const REQUEST_COLUMNS: &str =
    "id, group_id, provider, model, prompt, prompt_sha256, session_id, routing_mode, api_key_id, user_id, created_at";

#[async_trait]
impl AuditStore for PostgresAuditStore {
    #[instrument(skip(self), fields(api_key_id = %abbrev_uuid(&api_key_id)), err)]
    async fn find_owner(&self, api_key_id: ApiKeyId) -> Result<Option<ApiKeyOwnership>> {
        let row = sqlx::query_as::<_, OwnershipRow>(
            "SELECT api_key_id, user_id, auto_registered, created_at FROM api_key_ownership WHERE api_key_id = $1",
        )
        .bind(api_key_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, ownership), fields(api_key_id = %abbrev_uuid(&ownership.api_key_id)), err)]
    async fn register_owner(&self, ownership: &ApiKeyOwnership) -> Result<ApiKeyOwnership> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO api_key_ownership (api_key_id, user_id, auto_registered, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (api_key_id) DO NOTHING
            "#,
        )
        .bind(ownership.api_key_id)
        .bind(ownership.user_id)
        .bind(ownership.auto_registered)
        .bind(ownership.created_at)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, OwnershipRow>(
            "SELECT api_key_id, user_id, auto_registered, created_at FROM api_key_ownership WHERE api_key_id = $1",
        )
        .bind(ownership.api_key_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row.into())
    }

    #[instrument(skip(self, unit), fields(entries = unit.entries.len()), err)]
    async fn write_unit(&self, unit: &AuditUnit) -> Result<()> {
        unit.validate()?;

        let mut tx = self.pool.begin().await?;

        // Lock the ownership rows so the mapping cannot change before commit
        for (api_key_id, user_id) in unit.api_key_claims() {
            let owner: Option<UserId> = sqlx::query_scalar("SELECT user_id FROM api_key_ownership WHERE api_key_id = $1 FOR SHARE")
                .bind(api_key_id)
                .fetch_optional(&mut *tx)
                .await?;
            match owner {
                Some(owner) if owner == user_id => {}
                Some(owner) => {
                    return Err(StoreError::OwnershipViolation {
                        api_key_id,
                        message: format!("key is owned by {owner}, request claims {user_id}"),
                    });
                }
                None => {
                    return Err(StoreError::OwnershipViolation {
                        api_key_id,
                        message: "key has no recorded owner".to_string(),
                    });
                }
            }
        }

        if let Some(summary) = &unit.summary {
            insert_summary(&mut tx, summary).await?;
        }
        for entry in &unit.entries {
            insert_entry(&mut tx, entry).await?;
        }
        tx.commit().await?;
        debug!("Audit unit committed");
        Ok(())
    }

    #[instrument(skip(self), fields(request_id = %abbrev_uuid(&request_id)), err)]
    async fn get_request(&self, request_id: RequestId) -> Result<Option<RequestAudit>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = $1"))
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.load_audit(row).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&group_id)), err)]
    async fn get_group(&self, group_id: GroupId) -> Result<Option<GroupAudit>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE group_id = $1 ORDER BY seq"))
            .bind(group_id)
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let summary = sqlx::query_as::<_, SummaryRow>(
            "SELECT group_id, success_count, error_count, total_tokens, total_cost, created_at FROM compare_groups WHERE group_id = $1",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in rows {
            requests.push(self.load_audit(row).await?);
        }
        Ok(Some(GroupAudit {
            summary: summary.map(Into::into),
            requests,
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use sqlx::PgPool;
    use uuid::Uuid;

    use super::*;
    use crate::models::{AttemptOutcome, RoutingMode};
    use crate::providers::{ErrorKind, FinishReason};
    use crate::test_utils::{audit_entry, compare_summary, key_owner};

    async fn count(pool: &PgPool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn routed_entry(attempt_count: u32) -> AuditEntry {
        let mut entry = audit_entry(None, None, Uuid::new_v4());
        entry.request.routing_mode = RoutingMode::Smart;
        entry.request.session_id = Some("s-7".into());
        let decision_id = Uuid::new_v4();
        entry.decision = Some(DecisionAudit {
            decision: RoutingDecisionRecord {
                id: decision_id,
                request_id: entry.request.id,
                initial_tier: "cheap".into(),
                final_tier: "strong".into(),
                attempt_count,
                created_at: Utc::now(),
            },
            attempts: vec![
                RoutingAttemptRecord {
                    decision_id,
                    attempt_number: 1,
                    provider: "deepseek".into(),
                    model: "deepseek-chat".into(),
                    tier: "cheap".into(),
                    outcome: AttemptOutcome::Failed,
                    error: Some(ResponseError {
                        kind: ErrorKind::Upstream,
                        message: "502".into(),
                        retryable: true,
                    }),
                    latency_ms: 40,
                },
                RoutingAttemptRecord {
                    decision_id,
                    attempt_number: 2,
                    provider: "openai".into(),
                    model: "gpt-4o".into(),
                    tier: "strong".into(),
                    outcome: AttemptOutcome::Success,
                    error: None,
                    latency_ms: 25,
                },
            ],
        });
        entry
    }

    #[sqlx::test]
    async fn test_register_owner_keeps_first_mapping(pool: PgPool) {
        let store = PostgresAuditStore::new(pool);
        let key = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let (alice_owner, bob_owner) = (key_owner(key, alice), key_owner(key, bob));
        let (first, second) = tokio::join!(store.register_owner(&alice_owner), store.register_owner(&bob_owner));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.user_id, second.user_id);
        assert_eq!(store.find_owner(key).await.unwrap().unwrap().user_id, first.user_id);
        assert!(store.find_owner(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_routed_request_round_trips(pool: PgPool) {
        let store = PostgresAuditStore::new(pool);
        let entry = routed_entry(2);
        let request_id = entry.request.id;

        store.write_unit(&AuditUnit::single(entry.clone())).await.unwrap();

        let audit = store.get_request(request_id).await.unwrap().unwrap();
        assert_eq!(audit.request.id, request_id);
        assert_eq!(audit.request.routing_mode, RoutingMode::Smart);
        assert_eq!(audit.request.session_id.as_deref(), Some("s-7"));
        assert_eq!(audit.request.prompt_sha256, entry.request.prompt_sha256);
        assert_eq!(audit.responses.len(), 1);
        assert_eq!(audit.responses[0].finish_reason, FinishReason::Stop);
        assert_eq!(audit.responses[0].token_usage.total_tokens, 3);

        let decision = audit.decision.unwrap();
        assert_eq!(decision.decision.initial_tier, "cheap");
        assert_eq!(decision.decision.final_tier, "strong");
        assert_eq!(decision.attempts.len(), 2);
        assert_eq!(decision.attempts[0].outcome, AttemptOutcome::Failed);
        assert_eq!(decision.attempts[0].error.as_ref().unwrap().kind, ErrorKind::Upstream);
        assert!(decision.attempts[0].error.as_ref().unwrap().retryable);
        assert_eq!(decision.attempts[1].attempt_number, 2);

        assert!(store.get_request(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_ownership_mismatch_rejects_whole_unit(pool: PgPool) {
        let store = PostgresAuditStore::new(pool.clone());
        let key = Uuid::new_v4();
        let (owner, intruder) = (Uuid::new_v4(), Uuid::new_v4());
        store.register_owner(&key_owner(key, owner)).await.unwrap();

        let group = Uuid::new_v4();
        let unit = AuditUnit {
            entries: vec![audit_entry(Some(group), Some(key), owner), audit_entry(Some(group), Some(key), intruder)],
            summary: Some(compare_summary(group, 2, 0)),
        };
        let err = store.write_unit(&unit).await.unwrap_err();

        assert!(matches!(err, StoreError::OwnershipViolation { api_key_id, .. } if api_key_id == key));
        assert_eq!(count(&pool, "requests").await, 0);
        assert_eq!(count(&pool, "responses").await, 0);
        assert_eq!(count(&pool, "compare_groups").await, 0);
    }

    #[sqlx::test]
    async fn test_mapped_key_accepted(pool: PgPool) {
        let store = PostgresAuditStore::new(pool.clone());
        let key = Uuid::new_v4();
        let owner = Uuid::new_v4();
        store.register_owner(&key_owner(key, owner)).await.unwrap();

        let entry = audit_entry(None, Some(key), owner);
        let request_id = entry.request.id;
        store.write_unit(&AuditUnit::single(entry)).await.unwrap();

        let audit = store.get_request(request_id).await.unwrap().unwrap();
        assert_eq!(audit.request.api_key_id, Some(key));
        assert_eq!(audit.request.user_id, owner);
    }

    #[sqlx::test]
    async fn test_unmapped_key_rejected(pool: PgPool) {
        let store = PostgresAuditStore::new(pool.clone());
        let unit = AuditUnit::single(audit_entry(None, Some(Uuid::new_v4()), Uuid::new_v4()));

        assert!(matches!(store.write_unit(&unit).await, Err(StoreError::OwnershipViolation { .. })));
        assert_eq!(count(&pool, "requests").await, 0);
    }

    #[sqlx::test]
    async fn test_duplicate_request_rejected(pool: PgPool) {
        let store = PostgresAuditStore::new(pool.clone());
        let unit = AuditUnit::single(audit_entry(None, None, Uuid::new_v4()));

        store.write_unit(&unit).await.unwrap();
        assert!(matches!(store.write_unit(&unit).await, Err(StoreError::UniqueViolation { .. })));
        assert_eq!(count(&pool, "requests").await, 1);
        assert_eq!(count(&pool, "responses").await, 1);
    }

    #[sqlx::test]
    async fn test_inconsistent_decision_rejected(pool: PgPool) {
        let store = PostgresAuditStore::new(pool.clone());

        let err = store.write_unit(&AuditUnit::single(routed_entry(3))).await.unwrap_err();

        assert!(matches!(err, StoreError::InvalidUnit { .. }));
        assert_eq!(count(&pool, "routing_decisions").await, 0);
        assert_eq!(count(&pool, "routing_attempts").await, 0);
    }

    #[sqlx::test]
    async fn test_group_lookup_preserves_write_order(pool: PgPool) {
        let store = PostgresAuditStore::new(pool);
        let group = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut entries: Vec<_> = (0..3).map(|_| audit_entry(Some(group), None, user)).collect();
        // Identical timestamps so only write order can decide
        let created_at = Utc::now();
        for entry in &mut entries {
            entry.request.created_at = created_at;
        }
        let ids: Vec<_> = entries.iter().map(|e| e.request.id).collect();

        store
            .write_unit(&AuditUnit {
                entries,
                summary: Some(compare_summary(group, 3, 0)),
            })
            .await
            .unwrap();

        let group_audit = store.get_group(group).await.unwrap().unwrap();
        let found: Vec<_> = group_audit.requests.iter().map(|a| a.request.id).collect();
        assert_eq!(found, ids);

        let summary = group_audit.summary.unwrap();
        assert_eq!(summary.group_id, group);
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.error_count, 0);
        assert_eq!(summary.total_tokens, 6);
        assert_eq!(summary.total_cost, Decimal::new(2, 3));

        assert!(store.get_group(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_second_summary_for_group_rolls_back(pool: PgPool) {
        let store = PostgresAuditStore::new(pool.clone());
        let group = Uuid::new_v4();
        let user = Uuid::new_v4();
        let unit = |n: u32| AuditUnit {
            entries: (0..n).map(|_| audit_entry(Some(group), None, user)).collect(),
            summary: Some(compare_summary(group, n, 0)),
        };

        store.write_unit(&unit(2)).await.unwrap();
        let err = store.write_unit(&unit(2)).await.unwrap_err();

        assert!(matches!(err, StoreError::UniqueViolation { .. }));
        assert_eq!(count(&pool, "requests").await, 2);
        assert_eq!(store.get_group(group).await.unwrap().unwrap().requests.len(), 2);
    }
}
