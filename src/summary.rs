//! Training Record Book summary generation.

use jiff::Timestamp;
use tracing::debug;

use crate::model::{OutstandingTask, TrbSummary};
use crate::progress::{overall_progress, snapshot_for};
use crate::storage::{Result, Storage};

/// Builds the TRB summary for a cadet's time aboard a vessel.
///
/// Drawn from the ACTIVE assignment for the pair if there is one, otherwise
/// the most recently closed. Fails with `NotFound` if no assignment links
/// them.
pub fn generate_summary(storage: &Storage, cadet_id: &str, vessel_id: &str) -> Result<TrbSummary> {
    let snapshot = snapshot_for(storage, cadet_id, vessel_id)?;
    let overall = overall_progress(&snapshot.tasks, &snapshot.completions);

    let outstanding: Vec<OutstandingTask> = snapshot
        .tasks
        .iter()
        .filter(|t| t.task.mandatory && !snapshot.completions.contains_key(&t.task.id))
        .map(|t| OutstandingTask {
            section_code: t.section.code.clone(),
            section_title: t.section.title.clone(),
            task_id: t.task.id,
            code: t.task.code.clone(),
            description: t.task.description.clone(),
        })
        .collect();

    debug!(
        assignment = %snapshot.assignment.id,
        percent = overall.percent,
        outstanding = outstanding.len(),
        "summary generated"
    );

    Ok(TrbSummary {
        cadet: snapshot.cadet,
        vessel: snapshot.vessel,
        assignment: snapshot.assignment,
        sections: overall.sections,
        completed_count: overall.completed_count,
        total_mandatory: overall.total_mandatory,
        overall_percent: overall.percent,
        outstanding,
        generated_at: Timestamp::now(),
    })
}
