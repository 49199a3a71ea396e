//! Postgres CaseStore
//!
//! NOTE: All queries use runtime-checked sqlx::query() so the crate builds
//! without a live database; `ensure_schema` creates the tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::events::{CaseEvent, NewCaseEvent};
use crate::model::{Case, CaseDocument};
use crate::store::{CaseStore, CaseTransaction};

/// Case rows own their events and documents; deletes remove children
/// explicitly, so the foreign keys carry no cascade.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cases (
        id              UUID PRIMARY KEY,
        external_id     UUID UNIQUE,
        applicant_type  TEXT NOT NULL,
        request_type    TEXT NOT NULL,
        status          TEXT NOT NULL,
        payload         JSONB NOT NULL DEFAULT '{}'::jsonb,
        owner_id        UUID NOT NULL,
        assignee_id     UUID,
        revision        BIGINT NOT NULL DEFAULT 0,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS cases_owner_idx ON cases (owner_id, created_at DESC)"#,
    r#"
    CREATE TABLE IF NOT EXISTS case_events (
        id          BIGSERIAL PRIMARY KEY,
        case_id     UUID NOT NULL REFERENCES cases (id),
        event_type  TEXT NOT NULL,
        from_status TEXT,
        to_status   TEXT,
        payload     JSONB NOT NULL DEFAULT '{}'::jsonb,
        actor_id    UUID NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS case_events_case_idx ON case_events (case_id, created_at, id)"#,
    r#"
    CREATE TABLE IF NOT EXISTS case_documents (
        id               UUID PRIMARY KEY,
        case_id          UUID NOT NULL REFERENCES cases (id),
        category         TEXT NOT NULL,
        file_url         TEXT NOT NULL,
        external_file_id TEXT NOT NULL DEFAULT '',
        original_name    TEXT NOT NULL,
        size_bytes       BIGINT NOT NULL DEFAULT 0,
        mime_type        TEXT NOT NULL DEFAULT '',
        uploaded_by      UUID NOT NULL,
        created_at       TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS case_documents_case_idx
        ON case_documents (case_id, created_at DESC)
    "#,
];

const CASE_COLUMNS: &str = "id, external_id, applicant_type, request_type, status, payload, \
                            owner_id, assignee_id, revision, created_at, updated_at";

const EVENT_COLUMNS: &str =
    "id, case_id, event_type, from_status, to_status, payload, actor_id, created_at";

const DOCUMENT_COLUMNS: &str = "id, case_id, category, file_url, external_file_id, original_name, \
                                size_bytes, mime_type, uploaded_by, created_at";

/// Postgres-backed store
#[derive(Debug, Clone)]
pub struct PgCaseStore {
    pool: PgPool,
}

impl PgCaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        info!(url = %config.masked_url(), "Connecting to case database");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                warn!(error = %e, "Case database unreachable");
                connection_error(e)
            })?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if missing
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        info!("Case schema ready");
        Ok(())
    }
}

#[async_trait]
impl CaseStore for PgCaseStore {
    async fn begin(&self) -> Result<Box<dyn CaseTransaction>, StoreError> {
        let tx = self.pool.begin().await.map_err(connection_error)?;
        Ok(Box::new(PgCaseTransaction { tx }))
    }

    async fn load_case(&self, id: Uuid) -> Result<Option<Case>, StoreError> {
        let row = sqlx::query_as::<_, CaseRow>(&format!(
            "SELECT {CASE_COLUMNS} FROM cases WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Case::try_from).transpose()
    }

    async fn list_cases(&self, owner: Option<Uuid>) -> Result<Vec<Case>, StoreError> {
        let rows = sqlx::query_as::<_, CaseRow>(&format!(
            r#"
            SELECT {CASE_COLUMNS} FROM cases
            WHERE ($1::uuid IS NULL OR owner_id = $1)
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Case::try_from).collect()
    }

    async fn load_events(&self, case_id: Uuid) -> Result<Vec<CaseEvent>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM case_events WHERE case_id = $1 ORDER BY created_at, id"
        ))
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CaseEvent::try_from).collect()
    }

    async fn load_documents(&self, case_id: Uuid) -> Result<Vec<CaseDocument>, StoreError> {
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM case_documents WHERE case_id = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CaseDocument::try_from).collect()
    }
}

/// Transaction holding a pooled connection until commit or drop
pub struct PgCaseTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CaseTransaction for PgCaseTransaction {
    async fn case_for_update(&mut self, id: Uuid) -> Result<Option<Case>, StoreError> {
        let row = sqlx::query_as::<_, CaseRow>(&format!(
            "SELECT {CASE_COLUMNS} FROM cases WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Case::try_from).transpose()
    }

    async fn case_by_external_id(
        &mut self,
        external_id: Uuid,
    ) -> Result<Option<Case>, StoreError> {
        let row = sqlx::query_as::<_, CaseRow>(&format!(
            "SELECT {CASE_COLUMNS} FROM cases WHERE external_id = $1 FOR UPDATE"
        ))
        .bind(external_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Case::try_from).transpose()
    }

    async fn insert_case(&mut self, case: &Case) -> Result<(), StoreError> {
        // DO NOTHING keeps the transaction alive on a unique clash; a racing
        // insert of the same external id blocks here until the other commits.
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO cases ({CASE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT DO NOTHING
            "#
        ))
        .bind(case.id)
        .bind(case.external_id)
        .bind(case.applicant_type.as_str())
        .bind(case.request_type.as_str())
        .bind(case.status.as_str())
        .bind(serde_json::to_value(&case.payload)?)
        .bind(case.owner_id)
        .bind(case.assignee_id)
        .bind(case.revision)
        .bind(case.created_at)
        .bind(case.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(match case.external_id {
                Some(external_id) => format!("external id {external_id} already in use"),
                None => format!("case {} already exists", case.id),
            }));
        }
        Ok(())
    }

    async fn update_case(&mut self, case: &Case, expected_revision: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cases SET
                status = $3,
                payload = $4,
                assignee_id = $5,
                revision = $6,
                updated_at = $7
            WHERE id = $1 AND revision = $2
            "#,
        )
        .bind(case.id)
        .bind(expected_revision)
        .bind(case.status.as_str())
        .bind(serde_json::to_value(&case.payload)?)
        .bind(case.assignee_id)
        .bind(case.revision)
        .bind(case.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "case {} not at revision {}",
                case.id, expected_revision
            )));
        }
        Ok(())
    }

    async fn delete_case(&mut self, id: Uuid) -> Result<bool, StoreError> {
        sqlx::query("DELETE FROM case_documents WHERE case_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM case_events WHERE case_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        let result = sqlx::query("DELETE FROM cases WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_event(&mut self, event: NewCaseEvent) -> Result<CaseEvent, StoreError> {
        let created_at = Utc::now();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO case_events
            (case_id, event_type, from_status, to_status, payload, actor_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(event.case_id)
        .bind(event.event_type.as_str())
        .bind(event.from_status.map(|s| s.as_str()))
        .bind(event.to_status.map(|s| s.as_str()))
        .bind(&event.payload)
        .bind(event.actor_id)
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(event.into_event(id, created_at))
    }

    async fn insert_document(&mut self, document: &CaseDocument) -> Result<(), StoreError> {
        let size_bytes = i64::try_from(document.size_bytes).map_err(|_| {
            StoreError::CorruptRow(format!("size {} out of range", document.size_bytes))
        })?;

        sqlx::query(&format!(
            "INSERT INTO case_documents ({DOCUMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(document.id)
        .bind(document.case_id)
        .bind(document.category.as_str())
        .bind(&document.file_url)
        .bind(&document.external_file_id)
        .bind(&document.original_name)
        .bind(size_bytes)
        .bind(&document.mime_type)
        .bind(document.uploaded_by)
        .bind(document.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Pool exhaustion and dropped connections are retryable
fn connection_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => other.into(),
    }
}

fn parse_column<T: std::str::FromStr>(column: &str, value: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::CorruptRow(format!("{column}: {e}")))
}

/// Database row for a case
#[derive(Debug, FromRow)]
struct CaseRow {
    id: Uuid,
    external_id: Option<Uuid>,
    applicant_type: String,
    request_type: String,
    status: String,
    payload: serde_json::Value,
    owner_id: Uuid,
    assignee_id: Option<Uuid>,
    revision: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CaseRow> for Case {
    type Error = StoreError;

    fn try_from(row: CaseRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            external_id: row.external_id,
            applicant_type: parse_column("applicant_type", &row.applicant_type)?,
            request_type: parse_column("request_type", &row.request_type)?,
            status: parse_column("status", &row.status)?,
            payload: serde_json::from_value(row.payload)?,
            owner_id: row.owner_id,
            assignee_id: row.assignee_id,
            revision: row.revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database row for an audit event
#[derive(Debug, FromRow)]
struct EventRow {
    id: i64,
    case_id: Uuid,
    event_type: String,
    from_status: Option<String>,
    to_status: Option<String>,
    payload: serde_json::Value,
    actor_id: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for CaseEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            case_id: row.case_id,
            event_type: parse_column("event_type", &row.event_type)?,
            from_status: row
                .from_status
                .as_deref()
                .map(|s| parse_column("from_status", s))
                .transpose()?,
            to_status: row
                .to_status
                .as_deref()
                .map(|s| parse_column("to_status", s))
                .transpose()?,
            payload: row.payload,
            actor_id: row.actor_id,
            created_at: row.created_at,
        })
    }
}

/// Database row for document metadata
#[derive(Debug, FromRow)]
struct DocumentRow {
    id: Uuid,
    case_id: Uuid,
    category: String,
    file_url: String,
    external_file_id: String,
    original_name: String,
    size_bytes: i64,
    mime_type: String,
    uploaded_by: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for CaseDocument {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            case_id: row.case_id,
            category: parse_column("category", &row.category)?,
            file_url: row.file_url,
            external_file_id: row.external_file_id,
            original_name: row.original_name,
            size_bytes: u64::try_from(row.size_bytes)
                .map_err(|_| StoreError::CorruptRow(format!("size_bytes: {}", row.size_bytes)))?,
            mime_type: row.mime_type,
            uploaded_by: row.uploaded_by,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CaseStatus;

    #[test]
    fn test_corrupt_status_column() {
        let row = CaseRow {
            id: Uuid::new_v4(),
            external_id: None,
            applicant_type: "INDIVIDUAL".to_string(),
            request_type: "TRAINING".to_string(),
            status: "BORRADOR".to_string(),
            payload: serde_json::json!({}),
            owner_id: Uuid::new_v4(),
            assignee_id: None,
            revision: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(matches!(Case::try_from(row), Err(StoreError::CorruptRow(_))));
    }

    #[test]
    fn test_event_row_conversion() {
        let row = EventRow {
            id: 7,
            case_id: Uuid::new_v4(),
            event_type: "STATUS_CHANGED".to_string(),
            from_status: Some("DRAFT".to_string()),
            to_status: Some("SUBMITTED".to_string()),
            payload: serde_json::json!({"action": "status_change"}),
            actor_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        let event = CaseEvent::try_from(row).unwrap();
        assert_eq!(event.from_status, Some(CaseStatus::Draft));
        assert_eq!(event.to_status, Some(CaseStatus::Submitted));
    }
}
