//! Assignment types: a cadet aboard a vessel for a bounded period.

use jiff::{Timestamp, civil::Date};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A cadet's posting to a vessel. The unit all progress is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: Uuid,
    pub cadet_id: String,
    pub vessel_id: String,
    pub start_date: Date,

    /// Set exactly once, when the assignment is closed.
    pub end_date: Option<Date>,

    pub status: AssignmentStatus,
    pub notes: Option<String>,
    pub closing_notes: Option<String>,
    pub created_at: Timestamp,
}

impl Assignment {
    pub fn is_active(&self) -> bool {
        self.status == AssignmentStatus::Active
    }

    /// First eight characters of the id, for display.
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }
}

/// Where an assignment stands in its lifecycle.
///
/// `Active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Active,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses the stored column value.
    pub fn from_column(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::Corrupt(format!("unknown assignment status: {other}"))),
        }
    }
}

/// The terminal state requested when closing an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseStatus {
    #[serde(alias = "completed")]
    Completed,
    #[serde(alias = "cancelled")]
    Cancelled,
}

impl From<CloseStatus> for AssignmentStatus {
    fn from(status: CloseStatus) -> Self {
        match status {
            CloseStatus::Completed => Self::Completed,
            CloseStatus::Cancelled => Self::Cancelled,
        }
    }
}
