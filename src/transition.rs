//! Case State Machine
//!
//! Pure decision logic: given a case's current status and payload and a
//! requested mutation, decide whether it is allowed and what it produces.
//! No I/O happens here.
//!
//! Rules:
//! - Owners edit the payload only in `DRAFT` / `NEEDS_CHANGES`.
//! - Owners may move `DRAFT -> SUBMITTED` once the payload is complete.
//! - Reviewers move cases along the review path and never touch the payload.

use serde_json::Value;

use crate::access::Role;
use crate::error::CaseError;
use crate::events::EventType;
use crate::model::{CaseStatus, Payload, RequestType};

/// Keys every submission needs, whatever the request type
pub const COMMON_REQUIRED_FIELDS: &[&str] =
    &["municipality", "productiveActivity", "ideaDescription"];

/// Extra keys per request type
const TYPE_REQUIRED_FIELDS: &[(RequestType, &[&str])] = &[
    (RequestType::Training, &["trainingTopic"]),
    (RequestType::ProductiveProject, &["estimatedAmount"]),
];

/// All keys required to submit a case of `request_type`, in report order
pub fn required_fields(request_type: RequestType) -> Vec<&'static str> {
    let specific = TYPE_REQUIRED_FIELDS
        .iter()
        .find(|(rt, _)| *rt == request_type)
        .map(|(_, keys)| *keys)
        .unwrap_or_default();

    COMMON_REQUIRED_FIELDS
        .iter()
        .chain(specific.iter())
        .copied()
        .collect()
}

/// A value counts as empty when a form would show nothing for it
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Required keys that are absent or blank in `payload`
pub fn missing_required_fields(request_type: RequestType, payload: &Payload) -> Vec<String> {
    required_fields(request_type)
        .into_iter()
        .filter(|key| payload.get(*key).map(is_blank).unwrap_or(true))
        .map(str::to_string)
        .collect()
}

/// Completeness check run before a case may become `SUBMITTED`
pub fn check_submission(request_type: RequestType, payload: &Payload) -> Result<(), CaseError> {
    let missing = missing_required_fields(request_type, payload);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CaseError::MissingRequiredFields(missing))
    }
}

/// Mutation requested by a caller
#[derive(Debug, Clone, Default)]
pub struct RequestedChanges {
    pub payload: Option<Payload>,
    pub status: Option<CaseStatus>,
}

impl RequestedChanges {
    pub fn payload(payload: Payload) -> Self {
        Self {
            payload: Some(payload),
            status: None,
        }
    }

    pub fn status(status: CaseStatus) -> Self {
        Self {
            payload: None,
            status: Some(status),
        }
    }
}

/// Current state the decision is made against
#[derive(Debug, Clone, Copy)]
pub struct CaseSnapshot<'a> {
    pub status: CaseStatus,
    pub request_type: RequestType,
    pub payload: &'a Payload,
}

/// Outcome of an accepted mutation
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub previous_status: CaseStatus,
    pub status: CaseStatus,
    pub payload: Payload,
    /// `None` for a no-op
    pub event: Option<EventType>,
}

impl Decision {
    pub fn is_noop(&self) -> bool {
        self.event.is_none()
    }

    pub fn status_changed(&self) -> bool {
        self.previous_status != self.status
    }
}

/// Evaluate a requested mutation
pub fn evaluate(
    current: CaseSnapshot<'_>,
    requested: &RequestedChanges,
    actor_role: Role,
    is_owner: bool,
) -> Result<Decision, CaseError> {
    let reviewer = actor_role.is_reviewer();
    if !reviewer && !is_owner {
        return Err(CaseError::Forbidden(
            "only the owner or a reviewer may change a case".to_string(),
        ));
    }

    // Payload
    let payload = match &requested.payload {
        Some(_) if reviewer => {
            return Err(CaseError::Forbidden(
                "reviewers cannot edit case payload".to_string(),
            ))
        }
        Some(_) if !current.status.is_editable() => {
            return Err(CaseError::EditNotAllowed {
                status: current.status,
            })
        }
        Some(new_payload) => new_payload.clone(),
        None => current.payload.clone(),
    };

    // Status
    let status = match requested.status {
        None => current.status,
        Some(target) if target == current.status => current.status,
        Some(target) if reviewer => {
            if !current.status.can_review_transition_to(target) {
                return Err(CaseError::InvalidTransition {
                    from: current.status,
                    to: target,
                });
            }
            target
        }
        Some(target) if target.is_review_stage() => {
            return Err(CaseError::Forbidden(format!(
                "applicants cannot set status {target}"
            )))
        }
        Some(CaseStatus::Submitted) if current.status == CaseStatus::Draft => {
            check_submission(current.request_type, &payload)?;
            CaseStatus::Submitted
        }
        Some(target) => {
            return Err(CaseError::InvalidTransition {
                from: current.status,
                to: target,
            })
        }
    };

    let event = if status != current.status {
        Some(EventType::StatusChanged)
    } else if &payload != current.payload {
        Some(EventType::Updated)
    } else {
        None
    };

    Ok(Decision {
        previous_status: current.status,
        status,
        payload,
        event,
    })
}
