//! Cadet and vessel reference records.
//!
//! Both are owned by external systems; the engine keeps just enough of each
//! to decide which tasks apply and to label reports.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The training stream a cadet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CadetCategory {
    Deck,
    Engine,
    Eto,
    Catering,
    Rating,
}

impl CadetCategory {
    pub const ALL: [Self; 5] = [
        Self::Deck,
        Self::Engine,
        Self::Eto,
        Self::Catering,
        Self::Rating,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deck => "deck",
            Self::Engine => "engine",
            Self::Eto => "eto",
            Self::Catering => "catering",
            Self::Rating => "rating",
        }
    }

    /// Looks up a category by name (case-insensitive).
    ///
    /// An unrecognised name is a missing entity, not malformed input.
    pub fn parse(name: &str) -> Result<Self> {
        let needle = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| Error::NotFound(format!("cadet category '{name}'")))
    }
}

impl fmt::Display for CadetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cadet {
    pub id: String,
    pub name: String,
    pub category: CadetCategory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vessel {
    pub id: String,
    pub name: String,

    /// Ship type id; `None` means only unrestricted sections apply.
    pub ship_type: Option<String>,
}
