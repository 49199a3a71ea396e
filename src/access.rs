//! Access Control
//!
//! Roles map to a fixed capability table; every permission question is
//! answered from that table plus case ownership.
//!
//! Owners probing a case that is not theirs get `NotFound`, never
//! `Forbidden`, so case IDs cannot be enumerated.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CaseError;
use crate::model::{ApplicantType, Case, UnknownVariant};

/// Principal role as resolved by the auth service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Manager,
    Individual,
    Organization,
}

/// Things a role may be allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Create cases for itself
    CreateCase,
    /// Read and update own cases
    ManageOwn,
    /// Read every case
    ReadAny,
    /// Move any case along the review path, assign and delete
    Review,
}

const REVIEWER_CAPABILITIES: &[Capability] = &[Capability::ReadAny, Capability::Review];
const APPLICANT_CAPABILITIES: &[Capability] = &[Capability::CreateCase, Capability::ManageOwn];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Manager => "MANAGER",
            Self::Individual => "INDIVIDUAL",
            Self::Organization => "ORGANIZATION",
        }
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Self::Admin | Self::Manager => REVIEWER_CAPABILITIES,
            Self::Individual | Self::Organization => APPLICANT_CAPABILITIES,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn is_reviewer(&self) -> bool {
        self.has(Capability::Review)
    }

    /// The only applicant type this role may create, if any
    pub fn applicant_type(&self) -> Option<ApplicantType> {
        match self {
            Self::Individual => Some(ApplicantType::Individual),
            Self::Organization => Some(ApplicantType::Organization),
            Self::Admin | Self::Manager => None,
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Self::Admin),
            "MANAGER" => Ok(Self::Manager),
            "INDIVIDUAL" => Ok(Self::Individual),
            "ORGANIZATION" => Ok(Self::Organization),
            _ => Err(UnknownVariant {
                kind: "role",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The acting principal for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn owns(&self, case: &Case) -> bool {
        case.is_owned_by(self.id)
    }
}

/// Operation being attempted on a case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Assign,
    Delete,
}

/// Pure permission predicate
///
/// `case` is `None` only for [`Action::Create`]; create additionally needs the
/// applicant-type check done by [`check_applicant_type`].
pub fn can_mutate(role: Role, actor_id: Uuid, case: Option<&Case>, action: Action) -> bool {
    let owns = case.map(|c| c.is_owned_by(actor_id)).unwrap_or(false);
    match action {
        Action::Create => role.has(Capability::CreateCase),
        Action::Read => role.has(Capability::ReadAny) || (owns && role.has(Capability::ManageOwn)),
        Action::Update => role.has(Capability::Review) || (owns && role.has(Capability::ManageOwn)),
        Action::Assign | Action::Delete => role.has(Capability::Review),
    }
}

/// Enforce access to an existing case, choosing between `Forbidden` and
/// `NotFound`
pub fn authorize(principal: &Principal, case: &Case, action: Action) -> Result<(), CaseError> {
    if can_mutate(principal.role, principal.id, Some(case), action) {
        return Ok(());
    }

    // Applicants never learn that someone else's case exists
    if !principal.owns(case) && !principal.role.has(Capability::ReadAny) {
        return Err(CaseError::NotFound(case.id));
    }

    Err(CaseError::Forbidden(format!(
        "{} may not {:?} case {}",
        principal.role,
        action,
        case.id
    )))
}

/// Enforce the create capability
pub fn authorize_create(principal: &Principal) -> Result<(), CaseError> {
    if can_mutate(principal.role, principal.id, None, Action::Create) {
        Ok(())
    } else {
        Err(CaseError::Forbidden(format!(
            "{} may not create cases",
            principal.role
        )))
    }
}

/// The applicant type of a new case must match the creator's role
pub fn check_applicant_type(role: Role, applicant_type: ApplicantType) -> Result<(), String> {
    match role.applicant_type() {
        Some(expected) if expected == applicant_type => Ok(()),
        Some(expected) => Err(format!(
            "a {} principal may only create {} cases",
            role, expected
        )),
        None => Err(format!("a {} principal may not create cases", role)),
    }
}
