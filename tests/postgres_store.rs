//! Postgres store integration tests
//!
//! Needs a reachable database; uses throwaway ids so it can run against a
//! shared instance.
//!
//! Run with: DATABASE_URL=postgresql://localhost/cases \
//!   cargo test --features database --test postgres_store -- --ignored

#[cfg(feature = "database")]
mod postgres_store_tests {
    use std::sync::Arc;

    use case_sync::store_postgres::PgCaseStore;
    use case_sync::{
        ApplicantType, CaseConfig, CaseService, CaseStatus, CaseStore, DatabaseConfig, EventType,
        Payload, Principal, RequestType, Role, StoreError, SyncBatch, SyncItem,
    };
    use uuid::Uuid;

    async fn connect() -> PgCaseStore {
        let config = DatabaseConfig::from_env().expect("DATABASE_URL must be set");
        let store = PgCaseStore::connect(&config).await.unwrap();
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    #[ignore]
    async fn test_sync_replay_against_postgres() {
        let store = connect().await;
        let service = CaseService::new(Arc::new(store.clone()), CaseConfig::default());
        let actor = Principal::new(Uuid::new_v4(), Role::Individual);
        let external_id = Uuid::new_v4();
        let batch = SyncBatch::new(
            vec![SyncItem::new(external_id, ApplicantType::Individual, RequestType::Training)],
            false,
        );

        let first = service.sync_cases(&actor, batch.clone()).await.unwrap();
        let second = service
            .sync_cases(
                &actor,
                SyncBatch {
                    force_submit: true,
                    ..batch
                },
            )
            .await
            .unwrap();

        assert_eq!(first.mapping, second.mapping);
        assert_eq!(second.updated_count, 1);

        let case_id = first.mapping[&external_id];
        let case = store.load_case(case_id).await.unwrap().unwrap();
        assert_eq!(case.status, CaseStatus::Submitted);
        assert_eq!(case.revision, 1);

        let events = store.load_events(case_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Created);
    }

    #[tokio::test]
    #[ignore]
    async fn test_duplicate_external_id_keeps_transaction_usable() {
        let store = connect().await;
        let external_id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let first = case_sync::Case::new(
            owner,
            ApplicantType::Individual,
            RequestType::Training,
            CaseStatus::Draft,
            Payload::new(),
            Some(external_id),
        );
        let duplicate = case_sync::Case::new(
            owner,
            ApplicantType::Individual,
            RequestType::Training,
            CaseStatus::Draft,
            Payload::new(),
            Some(external_id),
        );

        let mut tx = store.begin().await.unwrap();
        tx.insert_case(&first).await.unwrap();
        let err = tx.insert_case(&duplicate).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Still usable after the clash
        let found = tx.case_by_external_id(external_id).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);

        let mut stale = found.clone();
        stale.touch();
        tx.update_case(&stale, 0).await.unwrap();
        let err = tx.update_case(&stale, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert!(tx.delete_case(first.id).await.unwrap());
        tx.commit().await.unwrap();
        assert!(store.load_case(first.id).await.unwrap().is_none());
    }
}
