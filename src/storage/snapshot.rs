//! Consistent read of everything progress aggregation needs.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::model::{ApplicableTask, Assignment, Cadet, Completion, Vessel};

use super::{
    Error, Result, Storage,
    assignment::assignment_row,
    completion::completions,
    roster::{cadet_row, vessel_row},
    template::{applicable_tasks, closed_tasks},
};

/// An assignment together with its cadet, vessel, applicable template tasks,
/// and completions, all read within one transaction.
///
/// For a closed assignment the tasks are the set captured when it closed,
/// not the current catalog.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub assignment: Assignment,
    pub cadet: Cadet,
    pub vessel: Vessel,
    pub tasks: Vec<ApplicableTask>,
    pub completions: HashMap<i64, Completion>,
}

impl Storage {
    pub fn snapshot(&self, assignment_id: Uuid) -> Result<Snapshot> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let assignment = assignment_row(&tx, assignment_id)?
            .ok_or_else(|| Error::NotFound(format!("assignment {assignment_id}")))?;
        let cadet = cadet_row(&tx, &assignment.cadet_id)?
            .ok_or_else(|| Error::Corrupt(format!("assignment {assignment_id} references a missing cadet")))?;
        let vessel = vessel_row(&tx, &assignment.vessel_id)?
            .ok_or_else(|| Error::Corrupt(format!("assignment {assignment_id} references a missing vessel")))?;
        let tasks = if assignment.is_active() {
            applicable_tasks(&tx, cadet.category, vessel.ship_type.as_deref())?
        } else {
            closed_tasks(&tx, assignment_id, cadet.category)?
        };
        let completions = completions(&tx, assignment_id)?;
        tx.finish()?;

        debug!(
            assignment = %assignment_id,
            tasks = tasks.len(),
            completions = completions.len(),
            "snapshot read"
        );
        Ok(Snapshot {
            assignment,
            cadet,
            vessel,
            tasks,
            completions,
        })
    }
}
