//! In-process CaseStore
//!
//! Transactions take an exclusive lock on the whole store and write in
//! place, recording an undo entry per mutation. `commit` forgets the log;
//! dropping an uncommitted transaction replays it backwards. Holding the
//! lock serializes writers, which the unique external-id rule relies on.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::{CaseEvent, NewCaseEvent};
use crate::model::{Case, CaseDocument};
use crate::store::{CaseStore, CaseTransaction};

#[derive(Debug, Default)]
struct MemoryState {
    cases: HashMap<Uuid, Case>,
    /// external_id -> case id
    external_ids: HashMap<Uuid, Uuid>,
    events: HashMap<Uuid, Vec<CaseEvent>>,
    documents: HashMap<Uuid, Vec<CaseDocument>>,
    next_event_id: i64,
}

impl MemoryState {
    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Inserted { id, external_id } => {
                self.cases.remove(&id);
                if let Some(external_id) = external_id {
                    self.external_ids.remove(&external_id);
                }
            }
            Undo::Updated(previous) => {
                self.cases.insert(previous.id, previous);
            }
            Undo::Deleted {
                case,
                events,
                documents,
            } => {
                if let Some(external_id) = case.external_id {
                    self.external_ids.insert(external_id, case.id);
                }
                if let Some(events) = events {
                    self.events.insert(case.id, events);
                }
                if let Some(documents) = documents {
                    self.documents.insert(case.id, documents);
                }
                self.cases.insert(case.id, case);
            }
            Undo::EventAppended(case_id) => pop_child(&mut self.events, case_id),
            Undo::DocumentInserted(case_id) => pop_child(&mut self.documents, case_id),
        }
    }
}

fn pop_child<T>(children: &mut HashMap<Uuid, Vec<T>>, case_id: Uuid) {
    if let Some(list) = children.get_mut(&case_id) {
        list.pop();
        if list.is_empty() {
            children.remove(&case_id);
        }
    }
}

/// Inverse of one transactional write
#[derive(Debug)]
enum Undo {
    Inserted {
        id: Uuid,
        external_id: Option<Uuid>,
    },
    Updated(Case),
    Deleted {
        case: Case,
        events: Option<Vec<CaseEvent>>,
        documents: Option<Vec<CaseDocument>>,
    },
    EventAppended(Uuid),
    DocumentInserted(Uuid),
}

/// Memory-backed store
#[derive(Debug, Clone, Default)]
pub struct MemoryCaseStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed cases
    pub async fn case_count(&self) -> usize {
        self.state.lock().await.cases.len()
    }

    /// Committed cases carrying `external_id` (at most one)
    pub async fn count_external_id(&self, external_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .cases
            .values()
            .filter(|c| c.external_id == Some(external_id))
            .count()
    }
}

#[async_trait]
impl CaseStore for MemoryCaseStore {
    async fn begin(&self) -> Result<Box<dyn CaseTransaction>, StoreError> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            state,
            undo: Vec::new(),
        }))
    }

    async fn load_case(&self, id: Uuid) -> Result<Option<Case>, StoreError> {
        Ok(self.state.lock().await.cases.get(&id).cloned())
    }

    async fn list_cases(&self, owner: Option<Uuid>) -> Result<Vec<Case>, StoreError> {
        let state = self.state.lock().await;
        let mut cases: Vec<Case> = state
            .cases
            .values()
            .filter(|c| owner.map(|o| c.owner_id == o).unwrap_or(true))
            .cloned()
            .collect();
        // v7 ids sort by creation time
        cases.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(cases)
    }

    async fn load_events(&self, case_id: Uuid) -> Result<Vec<CaseEvent>, StoreError> {
        let state = self.state.lock().await;
        let mut events = state.events.get(&case_id).cloned().unwrap_or_default();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn load_documents(&self, case_id: Uuid) -> Result<Vec<CaseDocument>, StoreError> {
        let state = self.state.lock().await;
        let mut documents = state.documents.get(&case_id).cloned().unwrap_or_default();
        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(documents)
    }
}

/// Transaction writing through the store lock
pub struct MemoryTransaction {
    state: OwnedMutexGuard<MemoryState>,
    undo: Vec<Undo>,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        while let Some(undo) = self.undo.pop() {
            self.state.revert(undo);
        }
    }
}

#[async_trait]
impl CaseTransaction for MemoryTransaction {
    async fn case_for_update(&mut self, id: Uuid) -> Result<Option<Case>, StoreError> {
        Ok(self.state.cases.get(&id).cloned())
    }

    async fn case_by_external_id(
        &mut self,
        external_id: Uuid,
    ) -> Result<Option<Case>, StoreError> {
        Ok(self
            .state
            .external_ids
            .get(&external_id)
            .and_then(|id| self.state.cases.get(id))
            .cloned())
    }

    async fn insert_case(&mut self, case: &Case) -> Result<(), StoreError> {
        if self.state.cases.contains_key(&case.id) {
            return Err(StoreError::Conflict(format!("case {} already exists", case.id)));
        }
        if let Some(external_id) = case.external_id {
            if self.state.external_ids.contains_key(&external_id) {
                return Err(StoreError::Conflict(format!(
                    "external id {external_id} already in use"
                )));
            }
            self.state.external_ids.insert(external_id, case.id);
        }
        self.state.cases.insert(case.id, case.clone());
        self.undo.push(Undo::Inserted {
            id: case.id,
            external_id: case.external_id,
        });
        Ok(())
    }

    async fn update_case(&mut self, case: &Case, expected_revision: i64) -> Result<(), StoreError> {
        let stored = self
            .state
            .cases
            .get_mut(&case.id)
            .ok_or_else(|| StoreError::Conflict(format!("case {} no longer exists", case.id)))?;

        if stored.revision != expected_revision {
            return Err(StoreError::Conflict(format!(
                "case {} at revision {}, expected {}",
                case.id, stored.revision, expected_revision
            )));
        }
        if stored.external_id != case.external_id {
            return Err(StoreError::Conflict(format!(
                "external id of case {} is immutable",
                case.id
            )));
        }

        let previous = std::mem::replace(stored, case.clone());
        self.undo.push(Undo::Updated(previous));
        Ok(())
    }

    async fn delete_case(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let Some(case) = self.state.cases.remove(&id) else {
            return Ok(false);
        };
        if let Some(external_id) = case.external_id {
            self.state.external_ids.remove(&external_id);
        }
        let events = self.state.events.remove(&id);
        let documents = self.state.documents.remove(&id);
        self.undo.push(Undo::Deleted {
            case,
            events,
            documents,
        });
        Ok(true)
    }

    async fn append_event(&mut self, event: NewCaseEvent) -> Result<CaseEvent, StoreError> {
        if !self.state.cases.contains_key(&event.case_id) {
            return Err(StoreError::Conflict(format!(
                "event for unknown case {}",
                event.case_id
            )));
        }
        self.state.next_event_id += 1;
        let event = event.into_event(self.state.next_event_id, Utc::now());
        self.state
            .events
            .entry(event.case_id)
            .or_default()
            .push(event.clone());
        self.undo.push(Undo::EventAppended(event.case_id));
        Ok(event)
    }

    async fn insert_document(&mut self, document: &CaseDocument) -> Result<(), StoreError> {
        if !self.state.cases.contains_key(&document.case_id) {
            return Err(StoreError::Conflict(format!(
                "document for unknown case {}",
                document.case_id
            )));
        }
        self.state
            .documents
            .entry(document.case_id)
            .or_default()
            .push(document.clone());
        self.undo.push(Undo::DocumentInserted(document.case_id));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.undo.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApplicantType, CaseStatus, DocumentCategory, Payload, RequestType};

    fn new_case(external_id: Option<Uuid>) -> Case {
        Case::new(
            Uuid::new_v4(),
            ApplicantType::Individual,
            RequestType::Training,
            CaseStatus::Draft,
            Payload::new(),
            external_id,
        )
    }

    #[tokio::test]
    async fn test_commit_publishes() {
        let store = MemoryCaseStore::new();
        let case = new_case(None);

        let mut tx = store.begin().await.unwrap();
        tx.insert_case(&case).await.unwrap();
        tx.append_event(NewCaseEvent::created(&case, case.owner_id))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.load_case(case.id).await.unwrap(), Some(case.clone()));
        assert_eq!(store.load_events(case.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let store = MemoryCaseStore::new();
        let case = new_case(Some(Uuid::new_v4()));

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_case(&case).await.unwrap();
            tx.append_event(NewCaseEvent::created(&case, case.owner_id))
                .await
                .unwrap();
        }

        assert_eq!(store.case_count().await, 0);
        assert!(store.load_events(case.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_external_id_unique_but_nulls_allowed() {
        let store = MemoryCaseStore::new();
        let external_id = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.insert_case(&new_case(None)).await.unwrap();
        tx.insert_case(&new_case(None)).await.unwrap();
        tx.insert_case(&new_case(Some(external_id))).await.unwrap();
        let err = tx.insert_case(&new_case(Some(external_id))).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        tx.commit().await.unwrap();

        assert_eq!(store.case_count().await, 3);
        assert_eq!(store.count_external_id(external_id).await, 1);
    }

    #[tokio::test]
    async fn test_compare_and_write() {
        let store = MemoryCaseStore::new();
        let mut case = new_case(None);

        let mut tx = store.begin().await.unwrap();
        tx.insert_case(&case).await.unwrap();

        case.touch();
        tx.update_case(&case, 0).await.unwrap();

        // Stale revision loses
        case.touch();
        let err = tx.update_case(&case, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_owned_rows() {
        let store = MemoryCaseStore::new();
        let external_id = Uuid::new_v4();
        let case = new_case(Some(external_id));

        let mut tx = store.begin().await.unwrap();
        tx.insert_case(&case).await.unwrap();
        tx.append_event(NewCaseEvent::created(&case, case.owner_id))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.delete_case(case.id).await.unwrap());
        assert!(!tx.delete_case(case.id).await.unwrap());
        assert!(tx.case_by_external_id(external_id).await.unwrap().is_none());
        tx.commit().await.unwrap();

        assert!(store.load_events(case.id).await.unwrap().is_empty());
        assert_eq!(store.count_external_id(external_id).await, 0);
    }

    fn document_for(case: &Case) -> CaseDocument {
        CaseDocument {
            id: Uuid::now_v7(),
            case_id: case.id,
            category: DocumentCategory::Identity,
            file_url: "https://files.example/id.pdf".to_string(),
            external_file_id: "f-1".to_string(),
            original_name: "id.pdf".to_string(),
            size_bytes: 512,
            mime_type: "application/pdf".to_string(),
            uploaded_by: case.owner_id,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_rollback_restores_committed_rows() {
        let store = MemoryCaseStore::new();
        let external_id = Uuid::new_v4();
        let kept = new_case(Some(external_id));
        let removed = new_case(None);

        let mut tx = store.begin().await.unwrap();
        for case in [&kept, &removed] {
            tx.insert_case(case).await.unwrap();
            tx.append_event(NewCaseEvent::created(case, case.owner_id))
                .await
                .unwrap();
        }
        tx.insert_document(&document_for(&removed)).await.unwrap();
        tx.commit().await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            let mut edited = kept.clone();
            edited.status = CaseStatus::Submitted;
            edited.touch();
            tx.update_case(&edited, 0).await.unwrap();
            tx.append_event(NewCaseEvent::updated(kept.id, kept.owner_id))
                .await
                .unwrap();
            tx.insert_document(&document_for(&kept)).await.unwrap();
            assert!(tx.delete_case(removed.id).await.unwrap());
            tx.insert_case(&new_case(Some(Uuid::new_v4()))).await.unwrap();
        }

        assert_eq!(store.case_count().await, 2);
        assert_eq!(store.load_case(kept.id).await.unwrap(), Some(kept.clone()));
        assert_eq!(store.load_case(removed.id).await.unwrap(), Some(removed.clone()));
        assert_eq!(store.load_events(kept.id).await.unwrap().len(), 1);
        assert_eq!(store.load_events(removed.id).await.unwrap().len(), 1);
        assert!(store.load_documents(kept.id).await.unwrap().is_empty());
        assert_eq!(store.load_documents(removed.id).await.unwrap().len(), 1);

        // External id index survives the rollback
        let mut tx = store.begin().await.unwrap();
        let found = tx.case_by_external_id(external_id).await.unwrap().unwrap();
        assert_eq!(found.id, kept.id);
    }

    #[tokio::test]
    async fn test_rollback_after_delete_and_reinsert_of_external_id() {
        let store = MemoryCaseStore::new();
        let external_id = Uuid::new_v4();
        let original = new_case(Some(external_id));

        let mut tx = store.begin().await.unwrap();
        tx.insert_case(&original).await.unwrap();
        tx.commit().await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.delete_case(original.id).await.unwrap());
            tx.insert_case(&new_case(Some(external_id))).await.unwrap();
        }

        assert_eq!(store.case_count().await, 1);
        let mut tx = store.begin().await.unwrap();
        let found = tx.case_by_external_id(external_id).await.unwrap().unwrap();
        assert_eq!(found.id, original.id);
    }
}
