//! Audit events: immutable, append-only records of every state transition.
//!
//! Each mutating operation in the store appends exactly one event. Payloads
//! are action-specific JSON: for `evolve` a structural diff plus the backup
//! filename that can undo the change, for `revert` the from/to pair, and so
//! on. The trail is what makes point-in-time revert possible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who initiated an action. Supplied by the tool-dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Cli,
    Agent,
    Human,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Evolve,
    Revert,
    Rename,
    TagUpdate,
    Render,
    Archive,
    Delete,
    Fork,
    ManualEditDetected,
    Backup,
}

/// One immutable entry in a report's audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action_id: String,
    pub report_id: String,
    pub ts: DateTime<Utc>,
    pub actor: Actor,
    pub action_type: ActionType,
    /// Correlation ID supplied by the caller, shared across the calls of one
    /// outer request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Action-specific diff summary / provenance.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        report_id: impl Into<String>,
        actor: Actor,
        action_type: ActionType,
        request_id: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            action_id: Uuid::new_v4().to_string(),
            report_id: report_id.into(),
            ts: Utc::now(),
            actor,
            action_type,
            request_id,
            payload,
        }
    }

    /// The backup snapshot this event's write superseded, when one was taken.
    pub fn backup_filename(&self) -> Option<&str> {
        self.payload.get("backup_filename").and_then(|v| v.as_str())
    }

    /// SHA-256 of the outline bytes this event's write persisted.
    pub fn outline_sha256(&self) -> Option<&str> {
        self.payload.get("outline_sha256").and_then(|v| v.as_str())
    }

    /// Whether this event persisted a new outline (and so recorded its hash).
    pub fn is_write(&self) -> bool {
        matches!(
            self.action_type,
            ActionType::Create
                | ActionType::Evolve
                | ActionType::Revert
                | ActionType::Rename
                | ActionType::TagUpdate
                | ActionType::Archive
                | ActionType::Fork
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_types_serialize_snake_case() {
        let json = serde_json::to_string(&ActionType::ManualEditDetected).unwrap();
        assert_eq!(json, "\"manual_edit_detected\"");
        let json = serde_json::to_string(&ActionType::TagUpdate).unwrap();
        assert_eq!(json, "\"tag_update\"");
    }

    #[test]
    fn test_event_roundtrips_and_exposes_backup_filename() {
        let event = AuditEvent::new(
            "r-1",
            Actor::Agent,
            ActionType::Evolve,
            Some("req-42".to_string()),
            serde_json::json!({ "backup_filename": "20260101T000000000Z-0001.json" }),
        );
        let line = serde_json::to_string(&event).unwrap();
        let back: AuditEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back.backup_filename(), Some("20260101T000000000Z-0001.json"));
        assert_eq!(back.request_id.as_deref(), Some("req-42"));
    }
}
