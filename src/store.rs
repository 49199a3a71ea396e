//! Case persistence seam
//!
//! Services hold a store as `Arc<dyn CaseStore>` and never see the backend.
//! Writes happen inside a [`CaseTransaction`] so a request's case row and its
//! audit events land together or not at all.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::{CaseEvent, NewCaseEvent};
use crate::model::{Case, CaseDocument};

/// Persistence trait for cases, their audit events and document metadata.
///
/// Every mutation goes through a [`CaseTransaction`]; reads outside a
/// transaction see committed state only. Backends: `MemoryCaseStore` for
/// tests and single-process use, `PgCaseStore` for production.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Open a transaction. Dropping it without `commit` rolls back.
    async fn begin(&self) -> Result<Box<dyn CaseTransaction>, StoreError>;

    // ── Committed reads ──

    async fn load_case(&self, id: Uuid) -> Result<Option<Case>, StoreError>;

    /// Newest first; `owner` restricts to one principal's cases
    async fn list_cases(&self, owner: Option<Uuid>) -> Result<Vec<Case>, StoreError>;

    /// Ordered by `(created_at, id)` ascending
    async fn load_events(&self, case_id: Uuid) -> Result<Vec<CaseEvent>, StoreError>;

    /// Newest first
    async fn load_documents(&self, case_id: Uuid) -> Result<Vec<CaseDocument>, StoreError>;
}

/// One unit of atomicity and isolation.
///
/// Reads inside a transaction lock the rows they return until commit, so two
/// transactions never both act on the same case.
#[async_trait]
pub trait CaseTransaction: Send {
    // ── Cases ──

    async fn case_for_update(&mut self, id: Uuid) -> Result<Option<Case>, StoreError>;
    async fn case_by_external_id(&mut self, external_id: Uuid)
        -> Result<Option<Case>, StoreError>;

    /// Insert a new case. Returns `StoreError::Conflict` when its external
    /// id is already taken; the transaction stays usable.
    async fn insert_case(&mut self, case: &Case) -> Result<(), StoreError>;

    /// Compare-and-write: succeeds only if the stored revision equals
    /// `expected_revision`.
    async fn update_case(&mut self, case: &Case, expected_revision: i64)
        -> Result<(), StoreError>;

    /// Remove a case together with the events and documents it owns.
    /// Returns false if the case did not exist.
    async fn delete_case(&mut self, id: Uuid) -> Result<bool, StoreError>;

    // ── Event log (append-only) ──

    async fn append_event(&mut self, event: NewCaseEvent) -> Result<CaseEvent, StoreError>;

    // ── Documents ──

    async fn insert_document(&mut self, document: &CaseDocument) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
