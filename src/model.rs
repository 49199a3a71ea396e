//! Case Model
//!
//! Case records, their lifecycle status, and the document metadata stored
//! against them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// Schema-free form data captured for a case
pub type Payload = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Who is asking for the benefit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicantType {
    Individual,
    Organization,
}

impl ApplicantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "INDIVIDUAL",
            Self::Organization => "ORGANIZATION",
        }
    }
}

impl FromStr for ApplicantType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INDIVIDUAL" => Ok(Self::Individual),
            "ORGANIZATION" => Ok(Self::Organization),
            _ => Err(UnknownVariant::new("applicant type", s)),
        }
    }
}

impl std::fmt::Display for ApplicantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What kind of benefit is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Training,
    ProductiveProject,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Training => "TRAINING",
            Self::ProductiveProject => "PRODUCTIVE_PROJECT",
        }
    }
}

impl FromStr for RequestType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRAINING" => Ok(Self::Training),
            "PRODUCTIVE_PROJECT" => Ok(Self::ProductiveProject),
            _ => Err(UnknownVariant::new("request type", s)),
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a case
///
/// Applicants work in `Draft` and `NeedsChanges`; everything from
/// `Submitted` onwards belongs to reviewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Draft,
    Submitted,
    InReview,
    NeedsChanges,
    Validated,
    ValidatedForDispatch,
}

impl CaseStatus {
    pub const ALL: [CaseStatus; 6] = [
        Self::Draft,
        Self::Submitted,
        Self::InReview,
        Self::NeedsChanges,
        Self::Validated,
        Self::ValidatedForDispatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::InReview => "IN_REVIEW",
            Self::NeedsChanges => "NEEDS_CHANGES",
            Self::Validated => "VALIDATED",
            Self::ValidatedForDispatch => "VALIDATED_FOR_DISPATCH",
        }
    }

    /// Owner may change the payload only in these statuses
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::NeedsChanges)
    }

    /// Statuses only a reviewer may set
    pub fn is_review_stage(&self) -> bool {
        matches!(
            self,
            Self::InReview | Self::NeedsChanges | Self::Validated | Self::ValidatedForDispatch
        )
    }

    /// Statuses a client may request at creation or during sync
    pub fn is_client_requestable(&self) -> bool {
        matches!(self, Self::Draft | Self::Submitted)
    }

    /// Can a reviewer move a case from this status to `target`?
    pub fn can_review_transition_to(&self, target: CaseStatus) -> bool {
        use CaseStatus::*;
        match (self, target) {
            // Forward review path
            (Submitted, InReview) => true,
            (InReview, Validated) => true,
            (Validated, ValidatedForDispatch) => true,
            // Divert back to the applicant
            (Submitted | InReview | Validated, NeedsChanges) => true,
            // Resubmitted corrections go back to review
            (NeedsChanges, InReview) => true,
            _ => false,
        }
    }
}

impl FromStr for CaseStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "SUBMITTED" => Ok(Self::Submitted),
            "IN_REVIEW" => Ok(Self::InReview),
            "NEEDS_CHANGES" => Ok(Self::NeedsChanges),
            "VALIDATED" => Ok(Self::Validated),
            "VALIDATED_FOR_DISPATCH" => Ok(Self::ValidatedForDispatch),
            _ => Err(UnknownVariant::new("case status", s)),
        }
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A benefit request tracked through review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Server-assigned ID
    pub id: Uuid,
    /// Client-generated idempotency key (offline creations)
    pub external_id: Option<Uuid>,
    pub applicant_type: ApplicantType,
    pub request_type: RequestType,
    pub status: CaseStatus,
    #[serde(default)]
    pub payload: Payload,
    /// Principal that created the case
    pub owner_id: Uuid,
    /// Reviewer currently handling the case
    pub assignee_id: Option<Uuid>,
    /// Incremented on every accepted write (compare-and-write token)
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Case {
    /// Create a new case at revision 0
    pub fn new(
        owner_id: Uuid,
        applicant_type: ApplicantType,
        request_type: RequestType,
        status: CaseStatus,
        payload: Payload,
        external_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            external_id,
            applicant_type,
            request_type,
            status,
            payload,
            owner_id,
            assignee_id: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, principal_id: Uuid) -> bool {
        self.owner_id == principal_id
    }

    pub fn can_edit(&self) -> bool {
        self.status.is_editable()
    }

    /// Bump revision and refresh `updated_at` before a write
    pub fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> CaseSummary {
        CaseSummary {
            id: self.id,
            applicant_type: self.applicant_type,
            request_type: self.request_type,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Light listing row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseSummary {
    pub id: Uuid,
    pub applicant_type: ApplicantType,
    pub request_type: RequestType,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full case view with derived edit flag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseDetail {
    #[serde(flatten)]
    pub case: Case,
    pub can_edit: bool,
}

impl From<Case> for CaseDetail {
    fn from(case: Case) -> Self {
        let can_edit = case.can_edit();
        Self { case, can_edit }
    }
}

/// Document category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentCategory {
    Identity,
    Support,
    #[default]
    Other,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "IDENTITY",
            Self::Support => "SUPPORT",
            Self::Other => "OTHER",
        }
    }
}

impl FromStr for DocumentCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDENTITY" => Ok(Self::Identity),
            "SUPPORT" => Ok(Self::Support),
            "OTHER" => Ok(Self::Other),
            _ => Err(UnknownVariant::new("document category", s)),
        }
    }
}

/// Metadata for a file held by the document service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDocument {
    pub id: Uuid,
    pub case_id: Uuid,
    pub category: DocumentCategory,
    pub file_url: String,
    /// ID assigned by the document service
    pub external_file_id: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Document metadata as returned by the document service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDocument {
    #[serde(default)]
    pub category: DocumentCategory,
    pub file_url: String,
    #[serde(default)]
    pub external_file_id: String,
    pub original_name: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub mime_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editable_statuses() {
        use CaseStatus::*;
        let editable: Vec<_> = CaseStatus::ALL
            .iter()
            .filter(|s| s.is_editable())
            .copied()
            .collect();
        assert_eq!(editable, vec![Draft, NeedsChanges]);
    }

    #[test]
    fn test_review_transitions() {
        use CaseStatus::*;

        assert!(Submitted.can_review_transition_to(InReview));
        assert!(InReview.can_review_transition_to(Validated));
        assert!(Validated.can_review_transition_to(ValidatedForDispatch));
        assert!(InReview.can_review_transition_to(NeedsChanges));
        assert!(NeedsChanges.can_review_transition_to(InReview));

        assert!(!Draft.can_review_transition_to(InReview));
        assert!(!Submitted.can_review_transition_to(Validated)); // No skipping
        assert!(!ValidatedForDispatch.can_review_transition_to(NeedsChanges)); // Terminal
        assert!(!InReview.can_review_transition_to(Draft));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in CaseStatus::ALL {
            assert_eq!(status.as_str().parse::<CaseStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::json!(status.as_str())
            );
        }
        assert!("BORRADOR".parse::<CaseStatus>().is_err());
    }

    #[test]
    fn test_new_case_defaults() {
        let owner = Uuid::new_v4();
        let case = Case::new(
            owner,
            ApplicantType::Individual,
            RequestType::Training,
            CaseStatus::Draft,
            Payload::new(),
            None,
        );

        assert!(case.is_owned_by(owner));
        assert!(case.can_edit());
        assert_eq!(case.revision, 0);
        assert_eq!(case.created_at, case.updated_at);
        assert!(case.assignee_id.is_none());
    }

    #[test]
    fn test_touch_bumps_revision() {
        let mut case = Case::new(
            Uuid::new_v4(),
            ApplicantType::Organization,
            RequestType::ProductiveProject,
            CaseStatus::Draft,
            Payload::new(),
            Some(Uuid::new_v4()),
        );
        let before = case.updated_at;
        case.touch();
        assert_eq!(case.revision, 1);
        assert!(case.updated_at >= before);
    }

    #[test]
    fn test_detail_flattens_case() {
        let case = Case::new(
            Uuid::new_v4(),
            ApplicantType::Individual,
            RequestType::Training,
            CaseStatus::Submitted,
            Payload::new(),
            None,
        );
        let json = serde_json::to_value(CaseDetail::from(case)).unwrap();
        assert_eq!(json["status"], "SUBMITTED");
        assert_eq!(json["can_edit"], false);
    }
}
