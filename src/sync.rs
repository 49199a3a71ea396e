//! Sync Reconciler
//!
//! Reconciles a batch of cases created on an offline client. The client's
//! external id is the idempotency key: replaying a batch any number of
//! times leaves exactly one case per external id and returns the same
//! mapping.
//!
//! A batch runs in one store transaction. Items are processed in the order
//! given; any storage error rolls back the whole batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::access::{authorize_create, check_applicant_type, Principal};
use crate::config::CaseConfig;
use crate::error::{CaseError, FieldError, StoreError};
use crate::events::NewCaseEvent;
use crate::model::{ApplicantType, Case, CaseStatus, Payload, RequestType};
use crate::store::{CaseStore, CaseTransaction};

/// One case as recorded on the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    #[serde(alias = "externalId")]
    pub external_id: Uuid,
    #[serde(alias = "applicantType")]
    pub applicant_type: ApplicantType,
    #[serde(alias = "requestType")]
    pub request_type: RequestType,
    #[serde(default)]
    pub payload: Option<Payload>,
    /// `DRAFT` or `SUBMITTED` only
    #[serde(default)]
    pub status: Option<CaseStatus>,
}

impl SyncItem {
    pub fn new(
        external_id: Uuid,
        applicant_type: ApplicantType,
        request_type: RequestType,
    ) -> Self {
        Self {
            external_id,
            applicant_type,
            request_type,
            payload: None,
            status: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_status(mut self, status: CaseStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// A batch as posted by the client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub items: Vec<SyncItem>,
    /// Submit every reconciled draft regardless of its requested status
    #[serde(default, alias = "forceSubmit")]
    pub force_submit: bool,
}

impl SyncBatch {
    pub fn new(items: Vec<SyncItem>, force_submit: bool) -> Self {
        Self {
            items,
            force_submit,
        }
    }
}

/// Result of a reconciled batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// external id -> server case id
    pub mapping: BTreeMap<Uuid, Uuid>,
    pub created_count: usize,
    pub updated_count: usize,
}

/// What happened to a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Created(Uuid),
    Updated(Uuid),
    /// External id belongs to another principal's case
    Skipped,
}

/// Batch reconciler over a [`CaseStore`]
pub struct SyncReconciler {
    store: Arc<dyn CaseStore>,
    config: CaseConfig,
}

impl SyncReconciler {
    pub fn new(store: Arc<dyn CaseStore>, config: CaseConfig) -> Self {
        Self { store, config }
    }

    /// Reconcile `batch` on behalf of `principal`
    #[instrument(skip_all, fields(actor_id = %principal.id, items = batch.items.len()))]
    pub async fn reconcile(
        &self,
        principal: &Principal,
        batch: SyncBatch,
    ) -> Result<SyncOutcome, CaseError> {
        authorize_create(principal)?;
        self.validate(principal, &batch)?;

        let mut outcome = SyncOutcome::default();
        if batch.items.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.store.begin().await?;
        for item in &batch.items {
            match reconcile_item(tx.as_mut(), principal, item, batch.force_submit).await? {
                ItemOutcome::Created(case_id) => {
                    outcome.mapping.insert(item.external_id, case_id);
                    outcome.created_count += 1;
                }
                ItemOutcome::Updated(case_id) => {
                    outcome.mapping.insert(item.external_id, case_id);
                    outcome.updated_count += 1;
                }
                ItemOutcome::Skipped => {}
            }
        }
        tx.commit().await?;

        info!(
            created = outcome.created_count,
            updated = outcome.updated_count,
            skipped = batch.items.len() - outcome.created_count - outcome.updated_count,
            "Sync batch reconciled"
        );
        Ok(outcome)
    }

    /// Structural checks over the whole batch; all problems are reported
    /// together and nothing is written.
    fn validate(&self, principal: &Principal, batch: &SyncBatch) -> Result<(), CaseError> {
        if batch.items.len() > self.config.max_sync_batch {
            return Err(CaseError::invalid(
                "items",
                format!(
                    "batch has {} items, at most {} allowed",
                    batch.items.len(),
                    self.config.max_sync_batch
                ),
            ));
        }

        let mut errors = Vec::new();
        for (i, item) in batch.items.iter().enumerate() {
            if let Some(status) = item.status {
                if !status.is_client_requestable() {
                    errors.push(FieldError::new(
                        format!("items[{i}].status"),
                        format!("{status} cannot be requested by a client"),
                    ));
                }
            }
            if let Err(message) = check_applicant_type(principal.role, item.applicant_type) {
                errors.push(FieldError::new(format!("items[{i}].applicant_type"), message));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CaseError::Validation(errors))
        }
    }
}

async fn reconcile_item(
    tx: &mut dyn CaseTransaction,
    principal: &Principal,
    item: &SyncItem,
    force_submit: bool,
) -> Result<ItemOutcome, CaseError> {
    if let Some(existing) = tx.case_by_external_id(item.external_id).await? {
        return Ok(merge(tx, principal, existing, item, force_submit).await?);
    }

    let status = if force_submit {
        CaseStatus::Submitted
    } else {
        item.status.unwrap_or(CaseStatus::Draft)
    };
    let case = Case::new(
        principal.id,
        item.applicant_type,
        item.request_type,
        status,
        item.payload.clone().unwrap_or_default(),
        Some(item.external_id),
    );

    match tx.insert_case(&case).await {
        Ok(()) => {
            tx.append_event(NewCaseEvent::synced(&case, principal.id))
                .await?;
            debug!(
                case_id = %case.id,
                external_id = %item.external_id,
                %status,
                "Created case from sync"
            );
            Ok(ItemOutcome::Created(case.id))
        }
        Err(StoreError::Conflict(reason)) => {
            // Another batch won the insert; its row is visible now
            warn!(
                external_id = %item.external_id,
                %reason,
                "External id taken concurrently, retrying lookup"
            );
            let existing = tx
                .case_by_external_id(item.external_id)
                .await?
                .ok_or_else(|| CaseError::Conflict(reason.clone()))?;

            merge(tx, principal, existing, item, force_submit)
                .await
                .map_err(|e| match e {
                    StoreError::Conflict(message) => CaseError::Conflict(message),
                    other => other.into(),
                })
        }
        Err(e) => Err(e.into()),
    }
}

/// Fold an item into the case already carrying its external id.
///
/// Status only moves forward (`DRAFT -> SUBMITTED`). The payload is replaced
/// while the case is still editable; an absent or empty incoming payload
/// keeps the stored one. No audit event is written.
async fn merge(
    tx: &mut dyn CaseTransaction,
    principal: &Principal,
    mut case: Case,
    item: &SyncItem,
    force_submit: bool,
) -> Result<ItemOutcome, StoreError> {
    if !case.is_owned_by(principal.id) {
        warn!(
            external_id = %item.external_id,
            case_id = %case.id,
            actor_id = %principal.id,
            "External id belongs to another principal, skipping item"
        );
        return Ok(ItemOutcome::Skipped);
    }

    let expected_revision = case.revision;

    match item.payload.as_ref().filter(|p| !p.is_empty()) {
        Some(payload) if case.can_edit() => case.payload = payload.clone(),
        Some(_) => debug!(
            case_id = %case.id,
            status = %case.status,
            "Case under review, keeping stored payload"
        ),
        None => {}
    }

    let wants_submit = force_submit || item.status == Some(CaseStatus::Submitted);
    if wants_submit && case.status == CaseStatus::Draft {
        case.status = CaseStatus::Submitted;
    }

    case.touch();
    tx.update_case(&case, expected_revision).await?;

    debug!(
        case_id = %case.id,
        external_id = %item.external_id,
        status = %case.status,
        "Merged sync item"
    );
    Ok(ItemOutcome::Updated(case.id))
}
