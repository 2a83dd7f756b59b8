//! CLI interface for TRB.
//!
//! Each subcommand is non-interactive: arguments in, one JSON envelope out on
//! stdout. Core operations are built as [`Request`]s and run through the JSON
//! boundary, so `trb summary ...` prints exactly what a `trbSummary` request
//! returns.
//!
//! Commands that take an assignment accept a full UUID or unambiguous prefix.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use jiff::{Zoned, civil::Date};
use serde::Serialize;
use uuid::Uuid;

use crate::api::{self, Request};
use crate::config::Config;
use crate::identity::resolve_identity;
use crate::model::{Assignment, Attachment, Cadet, CadetCategory, Catalog, CloseStatus, Vessel};
use crate::storage::{self, Storage};

/// TRB: cadet familiarisation progress and training record book summaries.
#[derive(Debug, Parser)]
#[command(name = "trb", after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    /// Database file. Overrides `TRB_DATABASE` and the config file.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r#"Workflow: a cadet's time aboard
  1. trb template import catalog.toml
  2. trb cadet add C-104 "Ana Reyes" --category deck
     trb vessel add IMO9321483 "MT Northern Star" --ship-type tanker
  3. trb assignment create --cadet C-104 --vessel IMO9321483 --start 2024-01-10
     → prints the assignment (e.g. id 6f1c02ab-...)
  4. trb complete 6f1 12 --as "Chief Officer" --attach drill.jpg=https://files/drill.jpg
  5. trb progress --cadet C-104 --vessel IMO9321483
  6. trb assignment close 6f1 --end 2024-06-30 --status completed
  7. trb summary --cadet C-104 --vessel IMO9321483

Raw requests:
  echo '{"op":"overallProgress","cadetId":"C-104","vesselId":"IMO9321483"}' | trb call"#;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage assignments: post a cadet aboard, close, or list history.
    Assignment {
        #[command(subcommand)]
        command: AssignmentCommand,
    },

    /// Sign off a task within an ACTIVE assignment.
    Complete {
        /// Assignment ID: full UUID or unambiguous prefix.
        assignment: String,

        /// Task ID, as listed by `template list`.
        task: i64,

        /// Who signs the task off. Falls back to `TRB_IDENTITY`, then the
        /// configured default identity.
        #[arg(long = "as")]
        identity: Option<String>,

        #[arg(long)]
        remarks: Option<String>,

        /// Evidence reference as `file-name=url`. Repeatable.
        #[arg(long = "attach", value_parser = parse_attachment)]
        attachments: Vec<Attachment>,
    },

    /// Show progress for a cadet's time aboard a vessel.
    Progress {
        #[arg(long)]
        cadet: String,

        #[arg(long)]
        vessel: String,

        /// Restrict to one section.
        #[arg(long)]
        section: Option<i64>,
    },

    /// Generate the Training Record Book summary.
    Summary {
        #[arg(long)]
        cadet: String,

        #[arg(long)]
        vessel: String,
    },

    /// Manage the template catalog.
    Template {
        #[command(subcommand)]
        command: TemplateCommand,
    },

    /// Manage cadet records.
    Cadet {
        #[command(subcommand)]
        command: CadetCommand,
    },

    /// Manage vessel records.
    Vessel {
        #[command(subcommand)]
        command: VesselCommand,
    },

    /// Read one JSON request from stdin and print the response envelope.
    Call,
}

#[derive(Debug, Subcommand)]
pub enum AssignmentCommand {
    /// Post a cadet aboard a vessel. Fails if the cadet is already aboard one.
    Create {
        #[arg(long)]
        cadet: String,

        #[arg(long)]
        vessel: String,

        /// Start date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        start: Option<Date>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Close an ACTIVE assignment. Cannot be undone.
    Close {
        /// Assignment ID: full UUID or unambiguous prefix.
        assignment: String,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<Date>,

        #[arg(long, value_enum)]
        status: CloseArg,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Show the cadet's ACTIVE assignment, or null.
    Active {
        #[arg(long)]
        cadet: String,
    },

    /// List the completions recorded within an assignment.
    Completions {
        /// Assignment ID: full UUID or unambiguous prefix.
        assignment: String,
    },

    /// List a cadet's assignments, most recent first.
    History {
        #[arg(long)]
        cadet: String,

        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Debug, Subcommand)]
pub enum TemplateCommand {
    /// Import a TOML catalog of sections and tasks.
    Import {
        /// Path to the catalog file.
        file: PathBuf,
    },

    /// List tasks applicable to a cadet category and ship type.
    List {
        #[arg(long)]
        category: String,

        #[arg(long)]
        ship_type: Option<String>,
    },

    /// Show one task.
    Show { task: i64 },
}

#[derive(Debug, Subcommand)]
pub enum CadetCommand {
    /// Register a cadet, or update their name.
    Add {
        id: String,
        name: String,

        /// One of: deck, engine, eto, catering, rating.
        #[arg(long)]
        category: String,
    },

    Show { id: String },
}

#[derive(Debug, Subcommand)]
pub enum VesselCommand {
    /// Register a vessel, or update its name.
    Add {
        id: String,
        name: String,

        #[arg(long)]
        ship_type: Option<String>,
    },

    Show { id: String },
}

/// Terminal states accepted by `assignment close`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CloseArg {
    Completed,
    Cancelled,
}

impl CloseArg {
    fn to_domain(self) -> CloseStatus {
        match self {
            Self::Completed => CloseStatus::Completed,
            Self::Cancelled => CloseStatus::Cancelled,
        }
    }
}

pub fn run(cli: Cli, config: &Config, storage: &Storage) -> Result<(), String> {
    match cli.command {
        Command::Assignment { command } => match command {
            AssignmentCommand::Create {
                cadet,
                vessel,
                start,
                notes,
            } => dispatch(
                storage,
                Request::CreateAssignment {
                    cadet_id: cadet,
                    vessel_id: vessel,
                    start_date: start.unwrap_or_else(today),
                    notes,
                },
            ),
            AssignmentCommand::Close {
                assignment,
                end,
                status,
                notes,
            } => {
                let assignment = resolve_assignment(storage, &assignment)?;
                dispatch(
                    storage,
                    Request::CloseAssignment {
                        assignment_id: assignment.id,
                        end_date: end.unwrap_or_else(today),
                        status: status.to_domain(),
                        notes,
                    },
                )
            }
            AssignmentCommand::Active { cadet } => {
                dispatch(storage, Request::ActiveAssignment { cadet_id: cadet })
            }
            AssignmentCommand::Completions { assignment } => {
                let assignment = resolve_assignment(storage, &assignment)?;
                dispatch(
                    storage,
                    Request::AssignmentCompletions {
                        assignment_id: assignment.id,
                    },
                )
            }
            AssignmentCommand::History { cadet, limit } => dispatch(
                storage,
                Request::AssignmentHistory {
                    cadet_id: cadet,
                    limit,
                },
            ),
        },
        Command::Complete {
            assignment,
            task,
            identity,
            remarks,
            attachments,
        } => {
            let signed_by = resolve_identity(identity.as_deref(), config).map_err(|e| e.to_string())?;
            let assignment = resolve_assignment(storage, &assignment)?;
            dispatch(
                storage,
                Request::RecordCompletion {
                    assignment_id: assignment.id,
                    task_id: task,
                    signed_by,
                    remarks,
                    attachments,
                },
            )
        }
        Command::Progress {
            cadet,
            vessel,
            section,
        } => {
            let request = match section {
                Some(section_id) => Request::SectionProgress {
                    cadet_id: cadet,
                    vessel_id: vessel,
                    section_id,
                },
                None => Request::OverallProgress {
                    cadet_id: cadet,
                    vessel_id: vessel,
                },
            };
            dispatch(storage, request)
        }
        Command::Summary { cadet, vessel } => dispatch(
            storage,
            Request::TrbSummary {
                cadet_id: cadet,
                vessel_id: vessel,
            },
        ),
        Command::Template { command } => match command {
            TemplateCommand::Import { file } => cmd_import(storage, &file),
            TemplateCommand::List {
                category,
                ship_type,
            } => dispatch(
                storage,
                Request::ApplicableTasks {
                    category,
                    ship_type,
                },
            ),
            TemplateCommand::Show { task } => dispatch(storage, Request::GetTask { task_id: task }),
        },
        Command::Cadet { command } => match command {
            CadetCommand::Add { id, name, category } => cmd_cadet_add(storage, id, name, &category),
            CadetCommand::Show { id } => dispatch(storage, Request::GetCadet { cadet_id: id }),
        },
        Command::Vessel { command } => match command {
            VesselCommand::Add {
                id,
                name,
                ship_type,
            } => cmd_vessel_add(storage, id, name, ship_type),
            VesselCommand::Show { id } => dispatch(storage, Request::GetVessel { vessel_id: id }),
        },
        Command::Call => cmd_call(storage),
    }
}

/// Run a request through the JSON boundary and print its envelope.
fn dispatch(storage: &Storage, request: Request) -> Result<(), String> {
    report(api::handle(storage, request))
}

/// Print the envelope for `result`; failures also go to stderr as the error.
fn report(result: storage::Result<serde_json::Value>) -> Result<(), String> {
    println!("{}", api::render(&result));
    result.map(|_| ()).map_err(|e| e.public_message())
}

fn report_value(result: storage::Result<impl Serialize>) -> Result<(), String> {
    report(result.and_then(|v| Ok(serde_json::to_value(v)?)))
}

fn cmd_call(storage: &Storage) -> Result<(), String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    println!("{}", api::handle_json(storage, &input));
    Ok(())
}

fn cmd_import(storage: &Storage, file: &Path) -> Result<(), String> {
    let contents =
        fs::read_to_string(file).map_err(|e| format!("failed to read {}: {e}", file.display()))?;
    let catalog: Catalog = toml::from_str(&contents)
        .map_err(|e| format!("invalid catalog at {}: {e}", file.display()))?;
    report_value(storage.import_catalog(&catalog))
}

fn cmd_cadet_add(storage: &Storage, id: String, name: String, category: &str) -> Result<(), String> {
    let result = CadetCategory::parse(category).and_then(|category| {
        let cadet = Cadet { id, name, category };
        storage.register_cadet(&cadet)?;
        Ok(cadet)
    });
    report_value(result)
}

fn cmd_vessel_add(
    storage: &Storage,
    id: String,
    name: String,
    ship_type: Option<String>,
) -> Result<(), String> {
    let vessel = Vessel { id, name, ship_type };
    report_value(storage.register_vessel(&vessel).map(|()| vessel))
}

fn today() -> Date {
    Zoned::now().date()
}

fn parse_attachment(s: &str) -> Result<Attachment, String> {
    let (file_name, url) = s
        .split_once('=')
        .ok_or_else(|| format!("expected file-name=url, got '{s}'"))?;
    Ok(Attachment {
        file_name: file_name.to_string(),
        url: url.to_string(),
    })
}

/// Resolve an assignment reference: full UUID or unambiguous prefix.
fn resolve_assignment(storage: &Storage, reference: &str) -> Result<Assignment, String> {
    if let Ok(id) = reference.parse::<Uuid>() {
        return storage.load_assignment(id).map_err(|e| e.public_message());
    }

    let matches = storage
        .find_assignments_by_prefix(reference)
        .map_err(|e| format!("failed to look up assignments: {e}"))?;

    match matches.as_slice() {
        [] => Err(format!("no assignment matching '{reference}'")),
        [only] => Ok(only.clone()),
        many => {
            let ids: Vec<String> = many.iter().map(Assignment::short_id).collect();
            Err(format!(
                "'{reference}' is ambiguous: matches {} assignments: {}",
                many.len(),
                ids.join(", ")
            ))
        }
    }
}
