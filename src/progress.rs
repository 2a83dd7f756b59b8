//! Progress aggregation: pure functions from template tasks and completion
//! state to section and overall progress.
//!
//! Only mandatory tasks count toward a percentage. Optional tasks are listed
//! so they can be displayed, but never move the figure.

use std::collections::HashMap;

use crate::model::{
    ApplicableTask, Completion, CompletionMark, OverallProgress, Section, SectionProgress,
    TaskProgress,
};
use crate::storage::{Error, Result, Snapshot, Storage};

/// `round(100 * completed / total)`, rounding halves up; 100 when `total` is 0.
#[allow(clippy::cast_possible_truncation)]
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let completed = completed.min(total) as u128;
    let total = total as u128;
    // At most 100 once completed is clamped to total.
    ((200 * completed + total) / (2 * total)) as u8
}

/// Progress for one section. `tasks` may span every section; only those
/// belonging to `section` are considered.
pub fn section_progress(
    section: &Section,
    tasks: &[ApplicableTask],
    completions: &HashMap<i64, Completion>,
) -> SectionProgress {
    let entries: Vec<TaskProgress> = tasks
        .iter()
        .filter(|t| t.section.id == section.id)
        .map(|t| TaskProgress {
            task_id: t.task.id,
            code: t.task.code.clone(),
            description: t.task.description.clone(),
            mandatory: t.task.mandatory,
            completion: completions.get(&t.task.id).map(|c| CompletionMark {
                completed_at: c.completed_at,
                signed_by: c.signed_by.clone(),
            }),
        })
        .collect();

    let total_mandatory = entries.iter().filter(|t| t.mandatory).count();
    let completed_count = entries
        .iter()
        .filter(|t| t.mandatory && t.completion.is_some())
        .count();

    SectionProgress {
        section_id: section.id,
        code: section.code.clone(),
        title: section.title.clone(),
        completed_count,
        total_mandatory,
        percent: percent(completed_count, total_mandatory),
        tasks: entries,
    }
}

/// Progress across every section present in `tasks`, in template order.
///
/// The overall figure is total completed over total mandatory, not an
/// average of section percentages.
pub fn overall_progress(
    tasks: &[ApplicableTask],
    completions: &HashMap<i64, Completion>,
) -> OverallProgress {
    let sections: Vec<SectionProgress> = sections_in_order(tasks)
        .into_iter()
        .map(|s| section_progress(s, tasks, completions))
        .collect();

    let total_mandatory = sections.iter().map(|s| s.total_mandatory).sum();
    let completed_count = sections.iter().map(|s| s.completed_count).sum();

    OverallProgress {
        completed_count,
        total_mandatory,
        percent: percent(completed_count, total_mandatory),
        sections,
    }
}

/// Distinct sections in the order they first appear.
fn sections_in_order(tasks: &[ApplicableTask]) -> Vec<&Section> {
    let mut sections: Vec<&Section> = Vec::new();
    for t in tasks {
        if !sections.iter().any(|s| s.id == t.section.id) {
            sections.push(&t.section);
        }
    }
    sections
}

/// Resolves the assignment linking a cadet and vessel and reads its snapshot.
pub fn snapshot_for(storage: &Storage, cadet_id: &str, vessel_id: &str) -> Result<Snapshot> {
    let assignment = storage
        .relevant_assignment(cadet_id, vessel_id)?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "no assignment links cadet {cadet_id} and vessel {vessel_id}"
            ))
        })?;
    storage.snapshot(assignment.id)
}

/// Section progress for a cadet's assignment aboard a vessel.
///
/// The section must hold at least one task applicable to the cadet's
/// category and the vessel's ship type; otherwise it is [`Error::NotFound`].
pub fn section_progress_for(
    storage: &Storage,
    cadet_id: &str,
    vessel_id: &str,
    section_id: i64,
) -> Result<SectionProgress> {
    let section = storage.load_section(section_id)?;
    let snapshot = snapshot_for(storage, cadet_id, vessel_id)?;
    if !snapshot.tasks.iter().any(|t| t.section.id == section.id) {
        return Err(Error::NotFound(format!(
            "section {} has no tasks applicable to cadet {cadet_id} aboard {vessel_id}",
            section.code
        )));
    }
    Ok(section_progress(&section, &snapshot.tasks, &snapshot.completions))
}

/// Overall progress for a cadet's assignment aboard a vessel.
pub fn overall_progress_for(
    storage: &Storage,
    cadet_id: &str,
    vessel_id: &str,
) -> Result<OverallProgress> {
    let snapshot = snapshot_for(storage, cadet_id, vessel_id)?;
    Ok(overall_progress(&snapshot.tasks, &snapshot.completions))
}
