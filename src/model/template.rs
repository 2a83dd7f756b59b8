//! Template catalog: sections and the familiarisation tasks inside them.

use serde::{Deserialize, Serialize};

use super::CadetCategory;

/// A named grouping of tasks, shared by every cadet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: i64,
    pub code: String,
    pub title: String,
    pub order: i64,

    /// When set, the section only applies aboard vessels of this ship type.
    pub ship_type: Option<String>,
}

/// A single familiarisation item a cadet of one category must complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub section_id: i64,
    pub category: CadetCategory,
    pub code: String,
    pub description: String,
    pub order: i64,
    pub mandatory: bool,
}

/// A task together with its owning section, as returned in template order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicableTask {
    pub section: Section,
    pub task: Task,
}

/// An authored catalog file, loaded from TOML.
///
/// ```toml
/// [[section]]
/// code = "SAF"
/// title = "Safety familiarisation"
/// order = 1
///
/// [[section.task]]
/// code = "SAF-01"
/// category = "deck"
/// description = "Locate muster stations"
/// order = 1
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Catalog {
    #[serde(default, rename = "section")]
    pub sections: Vec<SectionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SectionSpec {
    pub code: String,
    pub title: String,
    pub order: i64,
    pub ship_type: Option<String>,

    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskSpec {
    pub code: String,
    pub category: CadetCategory,
    pub description: String,
    pub order: i64,

    #[serde(default = "mandatory_by_default")]
    pub mandatory: bool,
}

fn mandatory_by_default() -> bool {
    true
}

/// What a catalog import changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub sections_added: usize,
    pub sections_updated: usize,
    pub tasks_added: usize,
    pub tasks_updated: usize,
    pub unchanged: usize,
}
