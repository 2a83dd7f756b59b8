//! JSON request boundary.
//!
//! One request in, one envelope out:
//!
//! ```text
//! {"op": "closeAssignment", "assignmentId": "…", "endDate": "2024-06-30", "status": "COMPLETED"}
//!   → {"ok": true, "data": {…}}
//!   → {"ok": false, "error": {"kind": "invalidState", "status": 409, "message": "…"}}
//! ```
//!
//! The CLI routes every core operation through here, so the command line and
//! any other caller see the same documents.

use jiff::civil::Date;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::model::{Attachment, CadetCategory, CloseStatus};
use crate::progress::{overall_progress_for, section_progress_for};
use crate::storage::{Error, Result, Storage};
use crate::summary::generate_summary;

/// A request, tagged by `op`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    CreateAssignment {
        cadet_id: String,
        vessel_id: String,
        start_date: Date,
        notes: Option<String>,
    },
    CloseAssignment {
        assignment_id: Uuid,
        end_date: Date,
        status: CloseStatus,
        notes: Option<String>,
    },
    RecordCompletion {
        assignment_id: Uuid,
        task_id: i64,
        signed_by: String,
        remarks: Option<String>,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    SectionProgress {
        cadet_id: String,
        vessel_id: String,
        section_id: i64,
    },
    OverallProgress {
        cadet_id: String,
        vessel_id: String,
    },
    TrbSummary {
        cadet_id: String,
        vessel_id: String,
    },
    AssignmentHistory {
        cadet_id: String,
        /// Stop after this many assignments, most recent first.
        limit: Option<usize>,
    },
    ApplicableTasks {
        category: String,
        ship_type: Option<String>,
    },
    ActiveAssignment {
        cadet_id: String,
    },
    AssignmentCompletions {
        assignment_id: Uuid,
    },
    GetCadet {
        cadet_id: String,
    },
    GetVessel {
        vessel_id: String,
    },
    GetTask {
        task_id: i64,
    },
}

impl Request {
    fn op(&self) -> &'static str {
        match self {
            Self::CreateAssignment { .. } => "createAssignment",
            Self::CloseAssignment { .. } => "closeAssignment",
            Self::RecordCompletion { .. } => "recordCompletion",
            Self::SectionProgress { .. } => "sectionProgress",
            Self::OverallProgress { .. } => "overallProgress",
            Self::TrbSummary { .. } => "trbSummary",
            Self::AssignmentHistory { .. } => "assignmentHistory",
            Self::ApplicableTasks { .. } => "applicableTasks",
            Self::ActiveAssignment { .. } => "activeAssignment",
            Self::AssignmentCompletions { .. } => "assignmentCompletions",
            Self::GetCadet { .. } => "getCadet",
            Self::GetVessel { .. } => "getVessel",
            Self::GetTask { .. } => "getTask",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    status: u16,
    message: String,
}

/// Executes a request and returns its result document.
pub fn handle(storage: &Storage, request: Request) -> Result<Value> {
    debug!(op = request.op(), "handling request");
    let data = match request {
        Request::CreateAssignment {
            cadet_id,
            vessel_id,
            start_date,
            notes,
        } => serde_json::to_value(storage.create_assignment(
            &cadet_id,
            &vessel_id,
            start_date,
            notes.as_deref(),
        )?)?,
        Request::CloseAssignment {
            assignment_id,
            end_date,
            status,
            notes,
        } => serde_json::to_value(storage.close_assignment(
            assignment_id,
            end_date,
            status,
            notes.as_deref(),
        )?)?,
        Request::RecordCompletion {
            assignment_id,
            task_id,
            signed_by,
            remarks,
            attachments,
        } => serde_json::to_value(storage.record_completion(
            assignment_id,
            task_id,
            &signed_by,
            remarks.as_deref(),
            &attachments,
        )?)?,
        Request::SectionProgress {
            cadet_id,
            vessel_id,
            section_id,
        } => serde_json::to_value(section_progress_for(
            storage, &cadet_id, &vessel_id, section_id,
        )?)?,
        Request::OverallProgress {
            cadet_id,
            vessel_id,
        } => serde_json::to_value(overall_progress_for(storage, &cadet_id, &vessel_id)?)?,
        Request::TrbSummary {
            cadet_id,
            vessel_id,
        } => serde_json::to_value(generate_summary(storage, &cadet_id, &vessel_id)?)?,
        Request::AssignmentHistory { cadet_id, limit } => {
            let history = storage.assignment_history(&cadet_id)?;
            let assignments = match limit {
                Some(n) => history.iter().take(n).collect::<Result<Vec<_>>>()?,
                None => history.collect_all()?,
            };
            serde_json::to_value(assignments)?
        }
        Request::ApplicableTasks {
            category,
            ship_type,
        } => {
            let category = CadetCategory::parse(&category)?;
            serde_json::to_value(storage.list_applicable_tasks(category, ship_type.as_deref())?)?
        }
        Request::ActiveAssignment { cadet_id } => {
            storage.load_cadet(&cadet_id)?;
            serde_json::to_value(storage.active_assignment(&cadet_id)?)?
        }
        Request::AssignmentCompletions { assignment_id } => {
            let mut completions: Vec<_> = storage
                .completions_for_assignment(assignment_id)?
                .into_values()
                .collect();
            completions.sort_by_key(|c| c.task_id);
            serde_json::to_value(completions)?
        }
        Request::GetCadet { cadet_id } => serde_json::to_value(storage.load_cadet(&cadet_id)?)?,
        Request::GetVessel { vessel_id } => serde_json::to_value(storage.load_vessel(&vessel_id)?)?,
        Request::GetTask { task_id } => serde_json::to_value(storage.load_task(task_id)?)?,
    };
    Ok(data)
}

/// Parses a JSON request, executes it, and renders the response envelope.
///
/// Never fails: malformed input becomes a validation error envelope.
pub fn handle_json(storage: &Storage, input: &str) -> String {
    let result = serde_json::from_str::<Request>(input)
        .map_err(|e| Error::Validation(format!("malformed request: {e}")))
        .and_then(|request| handle(storage, request));
    render(&result)
}

/// Renders a result as the response envelope.
pub fn render(result: &Result<Value>) -> String {
    let envelope = match result {
        Ok(data) => json!({ "ok": true, "data": data }),
        Err(e) => json!({ "ok": false, "error": error_body(e) }),
    };
    envelope.to_string()
}

fn error_body(e: &Error) -> ErrorBody {
    let kind = e.kind();
    if kind == ErrorKind::Storage {
        error!(error = %e, "storage failure");
    }
    ErrorBody {
        kind,
        status: kind.status(),
        message: e.public_message(),
    }
}
