//! Audit Trail
//!
//! Append-only lifecycle events per case. Events are written in the same
//! store transaction as the case mutation that caused them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use uuid::Uuid;

use crate::model::{Case, CaseStatus, UnknownVariant};

/// Source tag on CREATED events written by offline sync
pub const OFFLINE_SYNC_SOURCE: &str = "offline_sync";

/// Lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Updated,
    StatusChanged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::StatusChanged => "STATUS_CHANGED",
        }
    }
}

impl FromStr for EventType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "UPDATED" => Ok(Self::Updated),
            "STATUS_CHANGED" => Ok(Self::StatusChanged),
            _ => Err(UnknownVariant {
                kind: "event type",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseEvent {
    /// Store-assigned sequence number
    pub id: i64,
    pub case_id: Uuid,
    pub event_type: EventType,
    /// Only set for STATUS_CHANGED
    pub from_status: Option<CaseStatus>,
    /// Only set for STATUS_CHANGED
    pub to_status: Option<CaseStatus>,
    pub payload: Value,
    pub actor_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Audit entry not yet appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewCaseEvent {
    pub case_id: Uuid,
    pub event_type: EventType,
    pub from_status: Option<CaseStatus>,
    pub to_status: Option<CaseStatus>,
    pub payload: Value,
    pub actor_id: Uuid,
}

impl NewCaseEvent {
    /// CREATED for an interactive create
    pub fn created(case: &Case, actor_id: Uuid) -> Self {
        Self {
            case_id: case.id,
            event_type: EventType::Created,
            from_status: None,
            to_status: None,
            payload: json!({
                "applicant_type": case.applicant_type,
                "request_type": case.request_type,
                "status": case.status,
            }),
            actor_id,
        }
    }

    /// CREATED for a case first seen through offline sync
    pub fn synced(case: &Case, actor_id: Uuid) -> Self {
        Self {
            payload: json!({ "source": OFFLINE_SYNC_SOURCE, "status": case.status }),
            ..Self::created(case, actor_id)
        }
    }

    pub fn updated(case_id: Uuid, actor_id: Uuid) -> Self {
        Self {
            case_id,
            event_type: EventType::Updated,
            from_status: None,
            to_status: None,
            payload: json!({ "changed": "data" }),
            actor_id,
        }
    }

    pub fn status_changed(case_id: Uuid, from: CaseStatus, to: CaseStatus, actor_id: Uuid) -> Self {
        Self {
            case_id,
            event_type: EventType::StatusChanged,
            from_status: Some(from),
            to_status: Some(to),
            payload: json!({ "action": "status_change" }),
            actor_id,
        }
    }

    pub fn assigned(case_id: Uuid, assignee_id: Option<Uuid>, actor_id: Uuid) -> Self {
        Self {
            payload: json!({ "assigned_to": assignee_id }),
            ..Self::updated(case_id, actor_id)
        }
    }

    /// Stamp with a sequence number and time
    pub fn into_event(self, id: i64, created_at: DateTime<Utc>) -> CaseEvent {
        CaseEvent {
            id,
            case_id: self.case_id,
            event_type: self.event_type,
            from_status: self.from_status,
            to_status: self.to_status,
            payload: self.payload,
            actor_id: self.actor_id,
            created_at,
        }
    }
}

/// Chronological events of one case
///
/// Iterating borrows the events, so a timeline can be walked any number of
/// times.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Timeline {
    events: Vec<CaseEvent>,
}

impl Timeline {
    /// Sort by `(created_at, id)` ascending
    pub fn new(mut events: Vec<CaseEvent>) -> Self {
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Self { events }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CaseEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn count_of(&self, event_type: EventType) -> usize {
        self.iter().filter(|e| e.event_type == event_type).count()
    }

    pub fn into_vec(self) -> Vec<CaseEvent> {
        self.events
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a CaseEvent;
    type IntoIter = std::slice::Iter<'a, CaseEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
