//! Progress documents. Always derived, never stored.

use jiff::Timestamp;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub task_id: i64,
    pub code: String,
    pub description: String,
    pub mandatory: bool,
    pub completion: Option<CompletionMark>,
}

/// When and by whom a task was signed off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMark {
    pub completed_at: Timestamp,
    pub signed_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionProgress {
    pub section_id: i64,
    pub code: String,
    pub title: String,
    pub completed_count: usize,
    pub total_mandatory: usize,
    pub percent: u8,

    /// Every applicable task in template order, mandatory or not.
    pub tasks: Vec<TaskProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallProgress {
    pub completed_count: usize,
    pub total_mandatory: usize,
    pub percent: u8,
    pub sections: Vec<SectionProgress>,
}
