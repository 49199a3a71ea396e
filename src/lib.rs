//! Case lifecycle and offline-sync reconciliation
//!
//! Benefit-request cases move through a review workflow:
//!
//! ```text
//! DRAFT -> SUBMITTED -> IN_REVIEW -> VALIDATED -> VALIDATED_FOR_DISPATCH
//!              \            \            \
//!               +------------+------------+--> NEEDS_CHANGES -> IN_REVIEW
//! ```
//!
//! Applicants own and edit their cases while in `DRAFT` or `NEEDS_CHANGES`;
//! reviewers move them along the review path. Clients that work offline
//! replay their creations through [`SyncReconciler`], keyed by a
//! client-generated external id so that replays never duplicate a case.
//!
//! Every accepted mutation is persisted together with its audit event in a
//! single [`CaseStore`] transaction.
//!
//! ## Features
//!
//! - `database` - Postgres-backed [`store_postgres::PgCaseStore`]
//! - `cli` - the `case_sync` binary

pub mod access;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod service;
pub mod store;
pub mod store_memory;
#[cfg(feature = "database")]
pub mod store_postgres;
pub mod sync;
pub mod transition;

pub use access::{Action, Capability, Principal, Role};
pub use config::{CaseConfig, DatabaseConfig};
pub use error::{CaseError, ErrorKind, FieldError, StoreError};
pub use events::{CaseEvent, EventType, NewCaseEvent, Timeline};
pub use model::{
    ApplicantType, Case, CaseDetail, CaseDocument, CaseStatus, CaseSummary, DocumentCategory,
    NewDocument, Payload, RequestType,
};
pub use service::{CaseFilter, CaseService, NewCase};
pub use store::{CaseStore, CaseTransaction};
pub use store_memory::MemoryCaseStore;
pub use sync::{SyncBatch, SyncItem, SyncOutcome, SyncReconciler};
pub use transition::{evaluate, CaseSnapshot, Decision, RequestedChanges};
