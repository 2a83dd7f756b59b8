//! Assignment storage: create, close, load, and page through history.

use std::collections::VecDeque;

use jiff::{Timestamp, civil::Date};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Assignment, AssignmentStatus, CloseStatus};

use super::{
    Error, Result, Storage, format_timestamp, parse_date, parse_timestamp, parse_uuid,
    roster::{cadet_row, vessel_row},
    template::applicable_tasks,
    write_tx,
};

const COLUMNS: &str = "id, cadet_id, vessel_id, start_date, end_date, status, notes, \
                       closing_notes, created_at";

/// Rows fetched per round trip while iterating history.
const HISTORY_PAGE: usize = 32;

impl Storage {
    /// Posts a cadet to a vessel, creating an ACTIVE assignment.
    ///
    /// Fails with [`Error::Conflict`] if the cadet already has an ACTIVE
    /// assignment. The check and the insert share one write transaction, and
    /// the partial unique index on active rows backs it up.
    pub fn create_assignment(
        &self,
        cadet_id: &str,
        vessel_id: &str,
        start_date: Date,
        notes: Option<&str>,
    ) -> Result<Assignment> {
        let mut conn = self.connect()?;
        let tx = write_tx(&mut conn)?;

        if cadet_row(&tx, cadet_id)?.is_none() {
            return Err(Error::NotFound(format!("cadet {cadet_id}")));
        }
        if vessel_row(&tx, vessel_id)?.is_none() {
            return Err(Error::NotFound(format!("vessel {vessel_id}")));
        }
        if let Some(existing) = active_assignment_row(&tx, cadet_id)? {
            warn!(cadet = cadet_id, active = %existing.id, "rejected second active assignment");
            return Err(active_conflict(cadet_id, &existing.vessel_id));
        }

        let assignment = Assignment {
            id: Uuid::new_v4(),
            cadet_id: cadet_id.to_string(),
            vessel_id: vessel_id.to_string(),
            start_date,
            end_date: None,
            status: AssignmentStatus::Active,
            notes: notes.map(String::from),
            closing_notes: None,
            created_at: Timestamp::now(),
        };

        tx.execute(
            "INSERT INTO assignment (id, cadet_id, vessel_id, start_date, status, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                assignment.id.to_string(),
                &assignment.cadet_id,
                &assignment.vessel_id,
                assignment.start_date.to_string(),
                assignment.status.as_str(),
                &assignment.notes,
                format_timestamp(assignment.created_at),
            ],
        )
        .map_err(|e| {
            if Error::is_constraint_violation(&e) {
                active_conflict(cadet_id, vessel_id)
            } else {
                e.into()
            }
        })?;
        tx.commit()?;

        info!(
            assignment = %assignment.id,
            cadet = cadet_id,
            vessel = vessel_id,
            start = %start_date,
            "assignment created"
        );
        Ok(assignment)
    }

    /// Closes an ACTIVE assignment as completed or cancelled.
    ///
    /// One-way: the end date and terminal status are written once, under the
    /// precondition that the row is still ACTIVE.
    pub fn close_assignment(
        &self,
        id: Uuid,
        end_date: Date,
        status: CloseStatus,
        notes: Option<&str>,
    ) -> Result<Assignment> {
        let mut conn = self.connect()?;
        let tx = write_tx(&mut conn)?;

        let mut assignment =
            assignment_row(&tx, id)?.ok_or_else(|| Error::NotFound(format!("assignment {id}")))?;
        if !assignment.is_active() {
            warn!(assignment = %id, status = assignment.status.as_str(), "rejected close of closed assignment");
            return Err(Error::InvalidState(format!(
                "assignment {} is already {}",
                assignment.short_id(),
                assignment.status.as_str()
            )));
        }
        if end_date < assignment.start_date {
            return Err(Error::Validation(format!(
                "end date {end_date} is before start date {}",
                assignment.start_date
            )));
        }

        let status = AssignmentStatus::from(status);
        let rows = tx.execute(
            "UPDATE assignment SET end_date = ?1, status = ?2, closing_notes = ?3
             WHERE id = ?4 AND status = 'active'",
            rusqlite::params![end_date.to_string(), status.as_str(), notes, id.to_string()],
        )?;
        if rows == 0 {
            return Err(Error::InvalidState(format!(
                "assignment {} is no longer active",
                assignment.short_id()
            )));
        }
        let captured = capture_task_set(&tx, &assignment)?;
        tx.commit()?;

        assignment.end_date = Some(end_date);
        assignment.status = status;
        assignment.closing_notes = notes.map(String::from);
        info!(
            assignment = %id,
            status = status.as_str(),
            end = %end_date,
            tasks = captured,
            "assignment closed"
        );
        Ok(assignment)
    }

    /// Loads a single assignment.
    pub fn load_assignment(&self, id: Uuid) -> Result<Assignment> {
        let conn = self.connect()?;
        assignment_row(&conn, id)?.ok_or_else(|| Error::NotFound(format!("assignment {id}")))
    }

    /// The cadet's ACTIVE assignment, if any.
    pub fn active_assignment(&self, cadet_id: &str) -> Result<Option<Assignment>> {
        let conn = self.connect()?;
        active_assignment_row(&conn, cadet_id)
    }

    /// The assignment that best represents a cadet's time aboard a vessel:
    /// the ACTIVE one if present, otherwise the most recently closed.
    pub fn relevant_assignment(&self, cadet_id: &str, vessel_id: &str) -> Result<Option<Assignment>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM assignment
             WHERE cadet_id = ?1 AND vessel_id = ?2
             ORDER BY (status = 'active') DESC, end_date DESC, start_date DESC, created_at DESC
             LIMIT 1"
        );
        conn.query_row(&sql, [cadet_id, vessel_id], read_raw)
            .optional()?
            .map(RawAssignment::parse)
            .transpose()
    }

    /// Assignments whose id starts with `prefix`.
    pub fn find_assignments_by_prefix(&self, prefix: &str) -> Result<Vec<Assignment>> {
        let prefix = prefix.to_ascii_lowercase();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
            return Ok(Vec::new());
        }
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM assignment WHERE substr(id, 1, ?2) = ?1 ORDER BY created_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params![&prefix, prefix.len()], read_raw)?;
        let mut assignments = Vec::new();
        for row in rows {
            assignments.push(row?.parse()?);
        }
        Ok(assignments)
    }

    /// The cadet's assignments, most recent start date first.
    ///
    /// The returned history is lazy: rows are fetched a page at a time as the
    /// iterator advances, and every call to [`AssignmentHistory::iter`] starts
    /// over from the most recent assignment.
    pub fn assignment_history(&self, cadet_id: &str) -> Result<AssignmentHistory<'_>> {
        let conn = self.connect()?;
        if cadet_row(&conn, cadet_id)?.is_none() {
            return Err(Error::NotFound(format!("cadet {cadet_id}")));
        }
        Ok(AssignmentHistory {
            storage: self,
            cadet_id: cadet_id.to_string(),
            page_size: HISTORY_PAGE,
        })
    }
}

/// A restartable view over one cadet's assignments.
#[derive(Debug, Clone)]
pub struct AssignmentHistory<'a> {
    storage: &'a Storage,
    cadet_id: String,
    page_size: usize,
}

impl<'a> AssignmentHistory<'a> {
    pub fn iter(&self) -> HistoryIter<'a> {
        HistoryIter {
            storage: self.storage,
            cadet_id: self.cadet_id.clone(),
            page_size: self.page_size,
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    /// Drains the history into a vector.
    pub fn collect_all(&self) -> Result<Vec<Assignment>> {
        self.iter().collect()
    }

    #[cfg(test)]
    fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

impl<'a> IntoIterator for &AssignmentHistory<'a> {
    type Item = Result<Assignment>;
    type IntoIter = HistoryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Keyset position of the last row handed out: `(start_date, created_at, id)`.
type Cursor = (String, String, String);

/// Iterator over a cadet's assignments; see [`Storage::assignment_history`].
#[derive(Debug)]
pub struct HistoryIter<'a> {
    storage: &'a Storage,
    cadet_id: String,
    page_size: usize,
    buffer: VecDeque<RawAssignment>,
    cursor: Option<Cursor>,
    exhausted: bool,
}

impl HistoryIter<'_> {
    fn fetch_page(&mut self) -> Result<()> {
        let conn = self.storage.connect()?;
        let (start, created, id) = match &self.cursor {
            Some((s, c, i)) => (Some(s.as_str()), Some(c.as_str()), Some(i.as_str())),
            None => (None, None, None),
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM assignment
             WHERE cadet_id = ?1
               AND (?2 IS NULL OR (start_date, created_at, id) < (?2, ?3, ?4))
             ORDER BY start_date DESC, created_at DESC, id DESC
             LIMIT ?5"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![&self.cadet_id, start, created, id, self.page_size],
            read_raw,
        )?;
        for row in rows {
            self.buffer.push_back(row?);
        }
        if self.buffer.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = self.buffer.back() {
            self.cursor = Some((
                last.start_date.clone(),
                last.created_at.clone(),
                last.id.clone(),
            ));
        }
        debug!(cadet = %self.cadet_id, fetched = self.buffer.len(), "history page");
        Ok(())
    }
}

impl Iterator for HistoryIter<'_> {
    type Item = Result<Assignment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty()
            && !self.exhausted
            && let Err(e) = self.fetch_page()
        {
            self.exhausted = true;
            return Some(Err(e));
        }
        self.buffer.pop_front().map(RawAssignment::parse)
    }
}

pub(super) fn assignment_row(conn: &Connection, id: Uuid) -> Result<Option<Assignment>> {
    let sql = format!("SELECT {COLUMNS} FROM assignment WHERE id = ?1");
    conn.query_row(&sql, [id.to_string()], read_raw)
        .optional()?
        .map(RawAssignment::parse)
        .transpose()
}

fn active_assignment_row(conn: &Connection, cadet_id: &str) -> Result<Option<Assignment>> {
    let sql = format!("SELECT {COLUMNS} FROM assignment WHERE cadet_id = ?1 AND status = 'active'");
    conn.query_row(&sql, [cadet_id], read_raw)
        .optional()?
        .map(RawAssignment::parse)
        .transpose()
}

/// Records the tasks that apply to a closing assignment, so later catalog
/// imports cannot change its progress. Returns how many were recorded.
fn capture_task_set(conn: &Connection, assignment: &Assignment) -> Result<usize> {
    let cadet = cadet_row(conn, &assignment.cadet_id)?.ok_or_else(|| {
        Error::Corrupt(format!("assignment {} references a missing cadet", assignment.id))
    })?;
    let vessel = vessel_row(conn, &assignment.vessel_id)?.ok_or_else(|| {
        Error::Corrupt(format!("assignment {} references a missing vessel", assignment.id))
    })?;
    let tasks = applicable_tasks(conn, cadet.category, vessel.ship_type.as_deref())?;
    let mut stmt = conn.prepare(
        "INSERT INTO closed_task (assignment_id, task_id, mandatory) VALUES (?1, ?2, ?3)",
    )?;
    for entry in &tasks {
        stmt.execute(rusqlite::params![
            assignment.id.to_string(),
            entry.task.id,
            entry.task.mandatory
        ])?;
    }
    Ok(tasks.len())
}

fn active_conflict(cadet_id: &str, vessel_id: &str) -> Error {
    Error::Conflict(format!(
        "cadet {cadet_id} already has an active assignment (vessel {vessel_id})"
    ))
}

/// Column values exactly as stored.
#[derive(Debug)]
struct RawAssignment {
    id: String,
    cadet_id: String,
    vessel_id: String,
    start_date: String,
    end_date: Option<String>,
    status: String,
    notes: Option<String>,
    closing_notes: Option<String>,
    created_at: String,
}

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawAssignment> {
    Ok(RawAssignment {
        id: row.get(0)?,
        cadet_id: row.get(1)?,
        vessel_id: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        status: row.get(5)?,
        notes: row.get(6)?,
        closing_notes: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl RawAssignment {
    fn parse(self) -> Result<Assignment> {
        Ok(Assignment {
            id: parse_uuid(&self.id, "assignment id")?,
            start_date: parse_date(&self.start_date, "start_date")?,
            end_date: self
                .end_date
                .as_deref()
                .map(|d| parse_date(d, "end_date"))
                .transpose()?,
            status: AssignmentStatus::from_column(&self.status)?,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            cadet_id: self.cadet_id,
            vessel_id: self.vessel_id,
            notes: self.notes,
            closing_notes: self.closing_notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    use jiff::civil::date;

    use crate::storage::fixtures::{seeded_storage, start, task_id};

    #[test]
    fn create_and_load_assignment() {
        let (_dir, storage) = seeded_storage();
        let created = storage
            .create_assignment("C-1", "V-T", start(), Some("Joined at Rotterdam"))
            .unwrap();

        let loaded = storage.load_assignment(created.id).unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.status, AssignmentStatus::Active);
        assert_eq!(loaded.end_date, None);
    }

    #[test]
    fn second_active_assignment_conflicts() {
        let (_dir, storage) = seeded_storage();
        storage.create_assignment("C-1", "V-T", start(), None).unwrap();

        let err = storage
            .create_assignment("C-1", "V-B", date(2024, 2, 1), None)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn concurrent_creation_yields_one_active_assignment() {
        let (_dir, storage) = seeded_storage();

        let results: Vec<Result<Assignment>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let storage = storage.clone();
                    s.spawn(move || storage.create_assignment("C-1", "V-T", start(), None))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let created = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(Error::Conflict(_))))
            .count();
        assert_eq!(created, 1);
        assert_eq!(conflicts, 7);
        assert!(storage.active_assignment("C-1").unwrap().is_some());
    }

    #[test]
    fn create_for_unknown_cadet_or_vessel_fails() {
        let (_dir, storage) = seeded_storage();
        let err = storage.create_assignment("C-404", "V-T", start(), None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = storage.create_assignment("C-1", "V-404", start(), None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn close_is_one_way() {
        let (_dir, storage) = seeded_storage();
        let assignment = storage.create_assignment("C-1", "V-T", start(), None).unwrap();

        let closed = storage
            .close_assignment(
                assignment.id,
                date(2024, 6, 1),
                CloseStatus::Completed,
                Some("signed off"),
            )
            .unwrap();
        assert_eq!(closed.status, AssignmentStatus::Completed);
        assert_eq!(closed.end_date, Some(date(2024, 6, 1)));
        assert_eq!(storage.load_assignment(assignment.id).unwrap(), closed);

        let err = storage
            .close_assignment(assignment.id, date(2024, 7, 1), CloseStatus::Cancelled, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // End date is unchanged by the rejected close.
        let reloaded = storage.load_assignment(assignment.id).unwrap();
        assert_eq!(reloaded.end_date, Some(date(2024, 6, 1)));
        assert_eq!(reloaded.status, AssignmentStatus::Completed);
    }

    #[test]
    fn closed_assignment_rejects_new_completions() {
        let (_dir, storage) = seeded_storage();
        let assignment = storage.create_assignment("C-1", "V-T", start(), None).unwrap();
        storage
            .close_assignment(assignment.id, date(2024, 6, 1), CloseStatus::Cancelled, None)
            .unwrap();

        let err = storage
            .record_completion(assignment.id, task_id(&storage, "SAF-01"), "Master", None, &[])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn close_before_start_is_invalid() {
        let (_dir, storage) = seeded_storage();
        let assignment = storage.create_assignment("C-1", "V-T", start(), None).unwrap();

        let err = storage
            .close_assignment(assignment.id, date(2024, 1, 9), CloseStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(storage.load_assignment(assignment.id).unwrap().is_active());
    }

    #[test]
    fn close_on_start_date_is_allowed() {
        let (_dir, storage) = seeded_storage();
        let assignment = storage.create_assignment("C-1", "V-T", start(), None).unwrap();
        storage
            .close_assignment(assignment.id, start(), CloseStatus::Cancelled, None)
            .unwrap();
    }

    #[test]
    fn close_unknown_assignment_fails() {
        let (_dir, storage) = seeded_storage();
        let err = storage
            .close_assignment(Uuid::new_v4(), start(), CloseStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn new_assignment_allowed_after_close() {
        let (_dir, storage) = seeded_storage();
        let first = storage.create_assignment("C-1", "V-T", start(), None).unwrap();
        storage
            .close_assignment(first.id, date(2024, 6, 1), CloseStatus::Completed, None)
            .unwrap();

        let second = storage
            .create_assignment("C-1", "V-B", date(2024, 7, 1), None)
            .unwrap();
        assert_eq!(
            storage.active_assignment("C-1").unwrap().map(|a| a.id),
            Some(second.id)
        );
    }

    fn cycle(storage: &Storage, vessel: &str, from: Date, to: Date) -> Assignment {
        let a = storage.create_assignment("C-1", vessel, from, None).unwrap();
        storage
            .close_assignment(a.id, to, CloseStatus::Completed, None)
            .unwrap()
    }

    #[test]
    fn history_is_ordered_by_start_date_descending() {
        let (_dir, storage) = seeded_storage();
        let middle = cycle(&storage, "V-B", date(2023, 5, 1), date(2023, 8, 1));
        let oldest = cycle(&storage, "V-T", date(2022, 1, 1), date(2022, 3, 1));
        let newest = storage
            .create_assignment("C-1", "V-T", date(2024, 1, 10), None)
            .unwrap();

        let history = storage.assignment_history("C-1").unwrap();
        let ids: Vec<Uuid> = history.collect_all().unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, [newest.id, middle.id, oldest.id]);
    }

    #[test]
    fn history_pages_lazily_and_restarts() {
        let (_dir, storage) = seeded_storage();
        for month in 1..=5 {
            cycle(&storage, "V-B", date(2020, month, 1), date(2020, month, 20));
        }

        let history = storage.assignment_history("C-1").unwrap().with_page_size(2);
        let first: Vec<Date> = history
            .iter()
            .map(|a| a.unwrap().start_date)
            .collect();
        let second: Vec<Date> = (&history)
            .into_iter()
            .map(|a| a.unwrap().start_date)
            .collect();

        assert_eq!(first.len(), 5);
        assert_eq!(first[0], date(2020, 5, 1));
        assert_eq!(first[4], date(2020, 1, 1));
        assert_eq!(first, second);

        // Taking one item only touches the first page.
        let top = history.iter().next().unwrap().unwrap();
        assert_eq!(top.start_date, date(2020, 5, 1));
    }

    #[test]
    fn same_start_date_orders_by_creation_descending() {
        let (_dir, storage) = seeded_storage();
        let mut created = Vec::new();
        for vessel in ["V-T", "V-B", "V-T"] {
            let a = cycle(&storage, vessel, start(), start());
            created.push(a.id);
            thread::sleep(std::time::Duration::from_millis(3));
        }

        let history = storage.assignment_history("C-1").unwrap().with_page_size(1);
        let ids: Vec<Uuid> = history.iter().map(|a| a.unwrap().id).collect();
        created.reverse();
        assert_eq!(ids, created);

        // Closed on the same day from the same start: the latest created wins.
        assert_eq!(
            storage.relevant_assignment("C-1", "V-T").unwrap().unwrap().id,
            created[0]
        );
    }

    #[test]
    fn history_for_unknown_cadet_fails() {
        let (_dir, storage) = seeded_storage();
        let err = storage.assignment_history("C-404").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn relevant_assignment_prefers_active_then_latest_closed() {
        let (_dir, storage) = seeded_storage();
        assert!(storage.relevant_assignment("C-1", "V-T").unwrap().is_none());

        cycle(&storage, "V-T", date(2022, 1, 1), date(2022, 3, 1));
        let later = cycle(&storage, "V-T", date(2023, 1, 1), date(2023, 3, 1));
        cycle(&storage, "V-B", date(2023, 4, 1), date(2023, 5, 1));
        assert_eq!(
            storage.relevant_assignment("C-1", "V-T").unwrap().unwrap().id,
            later.id
        );

        let active = storage
            .create_assignment("C-1", "V-T", date(2024, 1, 1), None)
            .unwrap();
        assert_eq!(
            storage.relevant_assignment("C-1", "V-T").unwrap().unwrap().id,
            active.id
        );
    }

    #[test]
    fn prefix_lookup_matches_ids() {
        let (_dir, storage) = seeded_storage();
        let a = storage.create_assignment("C-1", "V-T", start(), None).unwrap();

        let found = storage.find_assignments_by_prefix(&a.short_id()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);

        assert!(storage.find_assignments_by_prefix("zz%").unwrap().is_empty());
    }
}
