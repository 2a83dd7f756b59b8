//! Core data model for the training record book.
//!
//! Flat records for the template catalog, cadet assignments, and completion
//! state, plus the derived progress and summary documents.

mod assignment;
mod completion;
mod progress;
mod roster;
mod summary;
mod template;

pub use assignment::{Assignment, AssignmentStatus, CloseStatus};
pub use completion::{Attachment, Completion};
pub use progress::{CompletionMark, OverallProgress, SectionProgress, TaskProgress};
pub use roster::{Cadet, CadetCategory, Vessel};
pub use summary::{OutstandingTask, TrbSummary};
pub use template::{ApplicableTask, Catalog, ImportReport, Section, SectionSpec, Task, TaskSpec};
