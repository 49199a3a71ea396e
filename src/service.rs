//! Case Service
//!
//! Entry point for every case operation. Each call resolves access first,
//! then asks the state machine, then persists the result and its audit
//! event in one store transaction.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::access::{
    authorize, authorize_create, check_applicant_type, Action, Capability, Principal,
};
use crate::config::CaseConfig;
use crate::error::{CaseError, FieldError, StoreError};
use crate::events::{EventType, NewCaseEvent, Timeline};
use crate::model::{
    ApplicantType, Case, CaseDetail, CaseDocument, CaseStatus, CaseSummary, NewDocument, Payload,
    RequestType,
};
use crate::store::CaseStore;
use crate::sync::{SyncBatch, SyncOutcome, SyncReconciler};
use crate::transition::{check_submission, evaluate, CaseSnapshot, RequestedChanges};

/// Input for an interactive create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCase {
    pub applicant_type: ApplicantType,
    pub request_type: RequestType,
    #[serde(default)]
    pub payload: Payload,
    /// `DRAFT` (default) or `SUBMITTED`
    #[serde(default)]
    pub status: Option<CaseStatus>,
    #[serde(default)]
    pub external_id: Option<Uuid>,
}

impl NewCase {
    pub fn new(applicant_type: ApplicantType, request_type: RequestType, payload: Payload) -> Self {
        Self {
            applicant_type,
            request_type,
            payload,
            status: None,
            external_id: None,
        }
    }
}

/// Listing filter
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CaseFilter {
    /// Restrict to the caller's own cases even when it may read more
    #[serde(default)]
    pub mine_only: bool,
}

/// Lost compare-and-write becomes a caller-visible conflict
fn write_conflict(err: StoreError) -> CaseError {
    match err {
        StoreError::Conflict(message) => CaseError::Conflict(message),
        other => other.into(),
    }
}

/// Case lifecycle service
pub struct CaseService {
    store: Arc<dyn CaseStore>,
    config: CaseConfig,
    reconciler: SyncReconciler,
}

impl CaseService {
    pub fn new(store: Arc<dyn CaseStore>, config: CaseConfig) -> Self {
        let reconciler = SyncReconciler::new(store.clone(), config.clone());
        Self {
            store,
            config,
            reconciler,
        }
    }

    pub fn config(&self) -> &CaseConfig {
        &self.config
    }

    // ── Lifecycle ──

    /// Create a case owned by `principal`
    #[instrument(skip_all, fields(actor_id = %principal.id))]
    pub async fn create_case(
        &self,
        principal: &Principal,
        new: NewCase,
    ) -> Result<Case, CaseError> {
        authorize_create(principal)?;

        let status = new.status.unwrap_or(CaseStatus::Draft);
        let mut errors = Vec::new();
        if let Err(message) = check_applicant_type(principal.role, new.applicant_type) {
            errors.push(FieldError::new("applicant_type", message));
        }
        if !status.is_client_requestable() {
            errors.push(FieldError::new(
                "status",
                format!("new cases start as DRAFT or SUBMITTED, not {status}"),
            ));
        }
        if !errors.is_empty() {
            return Err(CaseError::Validation(errors));
        }
        if status == CaseStatus::Submitted {
            check_submission(new.request_type, &new.payload)?;
        }

        let case = Case::new(
            principal.id,
            new.applicant_type,
            new.request_type,
            status,
            new.payload,
            new.external_id,
        );

        let mut tx = self.store.begin().await?;
        if let Some(external_id) = case.external_id {
            if tx.case_by_external_id(external_id).await?.is_some() {
                return Err(CaseError::invalid("external_id", "already in use"));
            }
        }
        match tx.insert_case(&case).await {
            Err(StoreError::Conflict(_)) if case.external_id.is_some() => {
                return Err(CaseError::invalid("external_id", "already in use"));
            }
            result => result?,
        }
        tx.append_event(NewCaseEvent::created(&case, principal.id))
            .await?;
        tx.commit().await?;

        info!(case_id = %case.id, %status, "Case created");
        Ok(case)
    }

    /// Apply a payload edit and/or status change
    #[instrument(skip_all, fields(actor_id = %principal.id, case_id = %case_id))]
    pub async fn update_case(
        &self,
        principal: &Principal,
        case_id: Uuid,
        changes: RequestedChanges,
    ) -> Result<Case, CaseError> {
        let mut tx = self.store.begin().await?;
        let mut case = tx
            .case_for_update(case_id)
            .await?
            .ok_or(CaseError::NotFound(case_id))?;
        authorize(principal, &case, Action::Update)?;

        let decision = evaluate(
            CaseSnapshot {
                status: case.status,
                request_type: case.request_type,
                payload: &case.payload,
            },
            &changes,
            principal.role,
            principal.owns(&case),
        )?;

        let Some(event_type) = decision.event else {
            debug!("No-op update, nothing written");
            return Ok(case);
        };

        let expected_revision = case.revision;
        case.status = decision.status;
        case.payload = decision.payload;
        case.touch();
        tx.update_case(&case, expected_revision)
            .await
            .map_err(write_conflict)?;

        let event = match event_type {
            EventType::StatusChanged => NewCaseEvent::status_changed(
                case.id,
                decision.previous_status,
                case.status,
                principal.id,
            ),
            _ => NewCaseEvent::updated(case.id, principal.id),
        };
        tx.append_event(event).await?;
        tx.commit().await?;

        info!(
            from = %decision.previous_status,
            to = %case.status,
            event = %event_type,
            "Case updated"
        );
        Ok(case)
    }

    /// Remove a case with its events and documents
    #[instrument(skip_all, fields(actor_id = %principal.id, case_id = %case_id))]
    pub async fn delete_case(&self, principal: &Principal, case_id: Uuid) -> Result<(), CaseError> {
        let mut tx = self.store.begin().await?;
        let case = tx
            .case_for_update(case_id)
            .await?
            .ok_or(CaseError::NotFound(case_id))?;
        authorize(principal, &case, Action::Delete)?;

        if !tx.delete_case(case_id).await? {
            return Err(CaseError::NotFound(case_id));
        }
        tx.commit().await?;

        info!("Case deleted");
        Ok(())
    }

    /// Set or clear the reviewer handling a case
    #[instrument(skip_all, fields(actor_id = %principal.id, case_id = %case_id))]
    pub async fn assign_case(
        &self,
        principal: &Principal,
        case_id: Uuid,
        assignee_id: Option<Uuid>,
    ) -> Result<Case, CaseError> {
        let mut tx = self.store.begin().await?;
        let mut case = tx
            .case_for_update(case_id)
            .await?
            .ok_or(CaseError::NotFound(case_id))?;
        authorize(principal, &case, Action::Assign)?;

        if case.assignee_id == assignee_id {
            return Ok(case);
        }

        let expected_revision = case.revision;
        case.assignee_id = assignee_id;
        case.touch();
        tx.update_case(&case, expected_revision)
            .await
            .map_err(write_conflict)?;
        tx.append_event(NewCaseEvent::assigned(case.id, assignee_id, principal.id))
            .await?;
        tx.commit().await?;

        info!(assignee_id = ?assignee_id, "Case assigned");
        Ok(case)
    }

    // ── Reads ──

    pub async fn get_case(
        &self,
        principal: &Principal,
        case_id: Uuid,
    ) -> Result<CaseDetail, CaseError> {
        let case = self.readable_case(principal, case_id).await?;
        Ok(case.into())
    }

    /// Newest first
    pub async fn list_cases(
        &self,
        principal: &Principal,
        filter: CaseFilter,
    ) -> Result<Vec<CaseSummary>, CaseError> {
        let owner = if filter.mine_only || !principal.role.has(Capability::ReadAny) {
            Some(principal.id)
        } else {
            None
        };

        let cases = self.store.list_cases(owner).await?;
        Ok(cases.iter().map(Case::summary).collect())
    }

    /// Audit events of a case, oldest first
    pub async fn get_timeline(
        &self,
        principal: &Principal,
        case_id: Uuid,
    ) -> Result<Timeline, CaseError> {
        self.readable_case(principal, case_id).await?;
        let events = self.store.load_events(case_id).await?;
        Ok(Timeline::new(events))
    }

    async fn readable_case(&self, principal: &Principal, case_id: Uuid) -> Result<Case, CaseError> {
        let case = self
            .store
            .load_case(case_id)
            .await?
            .ok_or(CaseError::NotFound(case_id))?;
        authorize(principal, &case, Action::Read)?;
        Ok(case)
    }

    // ── Documents ──

    /// Record metadata for a file already stored by the document service
    #[instrument(skip_all, fields(actor_id = %principal.id, case_id = %case_id))]
    pub async fn attach_document(
        &self,
        principal: &Principal,
        case_id: Uuid,
        document: NewDocument,
    ) -> Result<CaseDocument, CaseError> {
        let mut tx = self.store.begin().await?;
        let case = tx
            .case_for_update(case_id)
            .await?
            .ok_or(CaseError::NotFound(case_id))?;
        authorize(principal, &case, Action::Read)?;

        let mut errors = Vec::new();
        if document.file_url.trim().is_empty() {
            errors.push(FieldError::new("file_url", "must not be empty"));
        }
        if document.size_bytes > self.config.max_document_bytes {
            errors.push(FieldError::new(
                "size_bytes",
                format!("exceeds {} bytes", self.config.max_document_bytes),
            ));
        }
        if !errors.is_empty() {
            return Err(CaseError::Validation(errors));
        }

        let document = CaseDocument {
            id: Uuid::now_v7(),
            case_id,
            category: document.category,
            file_url: document.file_url,
            external_file_id: document.external_file_id,
            original_name: document.original_name,
            size_bytes: document.size_bytes,
            mime_type: document.mime_type,
            uploaded_by: principal.id,
            created_at: chrono::Utc::now(),
        };
        tx.insert_document(&document).await?;
        tx.commit().await?;

        info!(
            document_id = %document.id,
            category = document.category.as_str(),
            "Document attached"
        );
        Ok(document)
    }

    /// Newest first
    pub async fn list_documents(
        &self,
        principal: &Principal,
        case_id: Uuid,
    ) -> Result<Vec<CaseDocument>, CaseError> {
        self.readable_case(principal, case_id).await?;
        Ok(self.store.load_documents(case_id).await?)
    }

    // ── Offline sync ──

    pub async fn sync_cases(
        &self,
        principal: &Principal,
        batch: SyncBatch,
    ) -> Result<SyncOutcome, CaseError> {
        self.reconciler.reconcile(principal, batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::store_memory::MemoryCaseStore;
    use serde_json::json;

    fn service() -> CaseService {
        CaseService::new(Arc::new(MemoryCaseStore::new()), CaseConfig::default())
    }

    fn complete_training() -> Payload {
        serde_json::from_value(json!({
            "municipality": "X",
            "productiveActivity": "Y",
            "ideaDescription": "Z",
            "trainingTopic": "Beekeeping"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_rejects_mismatched_type_and_review_status() {
        let service = service();
        let owner = Principal::new(Uuid::new_v4(), Role::Individual);
        let mut new = NewCase::new(
            ApplicantType::Organization,
            RequestType::Training,
            Payload::new(),
        );
        new.status = Some(CaseStatus::InReview);

        let err = service.create_case(&owner, new).await.unwrap_err();
        let fields: Vec<String> = err.field_errors().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["applicant_type", "status"]);
    }

    #[tokio::test]
    async fn test_create_submitted_requires_complete_payload() {
        let service = service();
        let owner = Principal::new(Uuid::new_v4(), Role::Individual);
        let mut new =
            NewCase::new(ApplicantType::Individual, RequestType::Training, Payload::new());
        new.status = Some(CaseStatus::Submitted);

        let err = service.create_case(&owner, new.clone()).await.unwrap_err();
        assert!(matches!(err, CaseError::MissingRequiredFields(_)));

        new.payload = complete_training();
        let case = service.create_case(&owner, new).await.unwrap();
        assert_eq!(case.status, CaseStatus::Submitted);
    }

    #[tokio::test]
    async fn test_duplicate_external_id_on_create() {
        let service = service();
        let owner = Principal::new(Uuid::new_v4(), Role::Organization);
        let mut new = NewCase::new(
            ApplicantType::Organization,
            RequestType::ProductiveProject,
            Payload::new(),
        );
        new.external_id = Some(Uuid::new_v4());

        service.create_case(&owner, new.clone()).await.unwrap();
        let err = service.create_case(&owner, new).await.unwrap_err();
        assert!(matches!(err, CaseError::Validation(ref e) if e[0].field == "external_id"));
    }

    #[tokio::test]
    async fn test_noop_update_writes_nothing() {
        let service = service();
        let owner = Principal::new(Uuid::new_v4(), Role::Individual);
        let case = service
            .create_case(
                &owner,
                NewCase::new(ApplicantType::Individual, RequestType::Training, complete_training()),
            )
            .await
            .unwrap();

        let same = service
            .update_case(&owner, case.id, RequestedChanges::payload(complete_training()))
            .await
            .unwrap();

        assert_eq!(same.revision, case.revision);
        assert_eq!(service.get_timeline(&owner, case.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mine_only_for_reviewer() {
        let service = service();
        let owner = Principal::new(Uuid::new_v4(), Role::Individual);
        let admin = Principal::new(Uuid::new_v4(), Role::Admin);
        service
            .create_case(
                &owner,
                NewCase::new(ApplicantType::Individual, RequestType::Training, Payload::new()),
            )
            .await
            .unwrap();

        let all = service.list_cases(&admin, CaseFilter::default()).await.unwrap();
        let mine = service
            .list_cases(&admin, CaseFilter { mine_only: true })
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(mine.is_empty());
    }
}
