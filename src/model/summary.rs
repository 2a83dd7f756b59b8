//! The Training Record Book summary document.

use jiff::Timestamp;
use serde::Serialize;

use super::{Assignment, Cadet, SectionProgress, Vessel};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrbSummary {
    pub cadet: Cadet,
    pub vessel: Vessel,

    /// The assignment the summary was drawn from, including its window.
    pub assignment: Assignment,

    pub sections: Vec<SectionProgress>,
    pub completed_count: usize,
    pub total_mandatory: usize,
    pub overall_percent: u8,

    /// Mandatory tasks not yet signed off, in template order.
    pub outstanding: Vec<OutstandingTask>,

    pub generated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstandingTask {
    pub section_code: String,
    pub section_title: String,
    pub task_id: i64,
    pub code: String,
    pub description: String,
}
