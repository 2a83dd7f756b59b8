//! Completion records: a task signed off within an assignment.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The record that a cadet completed one task during one assignment.
///
/// Append-only: never updated or deleted once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub task_id: i64,
    pub completed_at: Timestamp,

    /// Who signed the task off.
    pub signed_by: String,

    pub remarks: Option<String>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Reference to evidence held by the attachment subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_name: String,
    pub url: String,
}
