//! Local persistence for the template catalog, assignments, and completions.
//!
//! Everything lives in a single `SQLite` database:
//!
//! ```text
//! ~/.trb/trb.sqlite
//!   cadet, vessel               # reference records
//!   section, task               # template catalog
//!   assignment                  # lifecycle, one ACTIVE row per cadet
//!   completion, attachment      # append-only sign-offs
//! ```
//!
//! Each operation opens its own connection. Writes that check-then-act run in
//! `BEGIN IMMEDIATE` transactions so concurrent writers serialize on the
//! database lock; the unique indexes in [`schema`] back every invariant.

mod assignment;
mod completion;
mod roster;
mod schema;
mod snapshot;
mod template;

use std::{fs, path::PathBuf, time::Duration};

use jiff::{Timestamp, civil::Date};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

pub use assignment::{AssignmentHistory, HistoryIter};
pub use snapshot::Snapshot;

pub use crate::error::{Error, Result};

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `SQLite`-backed storage. Cheap to share: holds only the database path.
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    /// Opens (creating if needed) the database at `path` and applies the schema.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let storage = Self { path };
        let conn = storage.connect()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        schema::apply(&conn)?;
        debug!(path = %storage.path.display(), "storage ready");
        Ok(storage)
    }

    /// Returns the default database path: `~/.trb/trb.sqlite`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".trb").join("trb.sqlite"))
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }
}

/// Starts a transaction that takes the write lock immediately.
fn write_tx(conn: &mut Connection) -> Result<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid> {
    s.parse::<Uuid>()
        .map_err(|e| Error::Corrupt(format!("invalid {what}: {e}")))
}

fn parse_date(s: &str, what: &str) -> Result<Date> {
    s.parse::<Date>()
        .map_err(|e| Error::Corrupt(format!("invalid {what}: {e}")))
}

/// Renders a timestamp for storage: RFC 3339 in UTC with exactly nine
/// fractional digits, so text order is time order.
fn format_timestamp(ts: Timestamp) -> String {
    format!(
        "{}.{:09}Z",
        ts.strftime("%Y-%m-%dT%H:%M:%S"),
        ts.subsec_nanosecond()
    )
}

fn parse_timestamp(s: &str, what: &str) -> Result<Timestamp> {
    s.parse::<Timestamp>()
        .map_err(|e| Error::Corrupt(format!("invalid {what}: {e}")))
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared storage fixtures for tests across the crate.

    use jiff::civil::{Date, date};
    use tempfile::TempDir;

    use crate::model::{Cadet, CadetCategory, Catalog, Vessel};

    use super::Storage;

    pub fn test_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("trb.sqlite")).unwrap();
        (dir, storage)
    }

    pub fn start() -> Date {
        date(2024, 1, 10)
    }

    /// A catalog with one unrestricted section (three mandatory deck tasks, one
    /// optional deck task, one engine task) and one tanker-only section.
    pub fn sample_catalog() -> Catalog {
        toml::from_str(
            r#"
            [[section]]
            code = "SAF"
            title = "Safety familiarisation"
            order = 1

            [[section.task]]
            code = "SAF-01"
            category = "deck"
            description = "Locate muster station and lifejacket"
            order = 1

            [[section.task]]
            code = "SAF-02"
            category = "deck"
            description = "Identify fire alarm call points"
            order = 2

            [[section.task]]
            code = "SAF-03"
            category = "deck"
            description = "Explain abandon ship signal"
            order = 3

            [[section.task]]
            code = "SAF-04"
            category = "deck"
            description = "Tour of the galley"
            order = 4
            mandatory = false

            [[section.task]]
            code = "SAF-E1"
            category = "engine"
            description = "Locate emergency fire pump"
            order = 5

            [[section]]
            code = "TNK"
            title = "Tanker cargo operations"
            order = 2
            ship-type = "tanker"

            [[section.task]]
            code = "TNK-01"
            category = "deck"
            description = "Describe inert gas system"
            order = 1
            "#,
        )
        .unwrap()
    }

    /// Storage seeded with the sample catalog, deck cadet `C-1`, engine cadet
    /// `C-2`, tanker `V-T` and bulk carrier `V-B`.
    pub fn seeded_storage() -> (TempDir, Storage) {
        let (dir, storage) = test_storage();
        storage.import_catalog(&sample_catalog()).unwrap();
        storage
            .register_cadet(&Cadet {
                id: "C-1".into(),
                name: "Ana Reyes".into(),
                category: CadetCategory::Deck,
            })
            .unwrap();
        storage
            .register_cadet(&Cadet {
                id: "C-2".into(),
                name: "Tom Okafor".into(),
                category: CadetCategory::Engine,
            })
            .unwrap();
        storage
            .register_vessel(&Vessel {
                id: "V-T".into(),
                name: "MT Northern Star".into(),
                ship_type: Some("tanker".into()),
            })
            .unwrap();
        storage
            .register_vessel(&Vessel {
                id: "V-B".into(),
                name: "MV Cape Horn".into(),
                ship_type: Some("bulk".into()),
            })
            .unwrap();
        (dir, storage)
    }

    /// Looks up a task id by its code.
    pub fn task_id(storage: &Storage, code: &str) -> i64 {
        storage
            .list_applicable_tasks(CadetCategory::Deck, Some("tanker"))
            .unwrap()
            .into_iter()
            .chain(
                storage
                    .list_applicable_tasks(CadetCategory::Engine, None)
                    .unwrap(),
            )
            .find(|t| t.task.code == code)
            .map(|t| t.task.id)
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn new_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("trb.sqlite");
        Storage::new(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn stored_timestamps_sort_as_text() {
        let whole: Timestamp = "2024-01-10T00:00:00Z".parse().unwrap();
        let half: Timestamp = "2024-01-10T00:00:00.5Z".parse().unwrap();
        let tiny: Timestamp = "2024-01-10T00:00:00.000000001Z".parse().unwrap();

        assert_eq!(format_timestamp(whole), "2024-01-10T00:00:00.000000000Z");
        assert!(format_timestamp(whole) < format_timestamp(tiny));
        assert!(format_timestamp(tiny) < format_timestamp(half));
        assert_eq!(
            parse_timestamp(&format_timestamp(half), "ts").unwrap(),
            half
        );
    }

    #[test]
    fn reopening_existing_database_is_fine() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trb.sqlite");
        Storage::new(&path).unwrap();
        Storage::new(&path).unwrap();
    }
}
