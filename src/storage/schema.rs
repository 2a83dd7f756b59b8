//! Schema and constraint declarations, applied once when storage opens.
//!
//! The lifecycle invariants live here as indexes and triggers so that they
//! hold at the storage boundary no matter which code path writes.

use rusqlite::Connection;

use super::Result;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS cadet (
    id        TEXT PRIMARY KEY,
    name      TEXT NOT NULL,
    category  TEXT NOT NULL
              CHECK (category IN ('deck', 'engine', 'eto', 'catering', 'rating'))
);

CREATE TABLE IF NOT EXISTS vessel (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    ship_type  TEXT
);

CREATE TABLE IF NOT EXISTS section (
    id          INTEGER PRIMARY KEY,
    code        TEXT NOT NULL UNIQUE,
    title       TEXT NOT NULL,
    sort_order  INTEGER NOT NULL,
    ship_type   TEXT
);

CREATE TABLE IF NOT EXISTS task (
    id           INTEGER PRIMARY KEY,
    section_id   INTEGER NOT NULL REFERENCES section (id),
    category     TEXT NOT NULL
                 CHECK (category IN ('deck', 'engine', 'eto', 'catering', 'rating')),
    code         TEXT NOT NULL,
    description  TEXT NOT NULL,
    sort_order   INTEGER NOT NULL,
    mandatory    INTEGER NOT NULL CHECK (mandatory IN (0, 1)),
    UNIQUE (section_id, code)
);

CREATE TABLE IF NOT EXISTS assignment (
    id             TEXT PRIMARY KEY,
    cadet_id       TEXT NOT NULL REFERENCES cadet (id),
    vessel_id      TEXT NOT NULL REFERENCES vessel (id),
    start_date     TEXT NOT NULL,
    end_date       TEXT,
    status         TEXT NOT NULL CHECK (status IN ('active', 'completed', 'cancelled')),
    notes          TEXT,
    closing_notes  TEXT,
    created_at     TEXT NOT NULL,
    CHECK ((status = 'active') = (end_date IS NULL))
);

CREATE UNIQUE INDEX IF NOT EXISTS assignment_one_active_per_cadet
    ON assignment (cadet_id) WHERE status = 'active';

CREATE INDEX IF NOT EXISTS assignment_by_cadet
    ON assignment (cadet_id, start_date, created_at);

CREATE TABLE IF NOT EXISTS completion (
    id             TEXT PRIMARY KEY,
    assignment_id  TEXT NOT NULL REFERENCES assignment (id),
    task_id        INTEGER NOT NULL REFERENCES task (id),
    completed_at   TEXT NOT NULL,
    signed_by      TEXT NOT NULL,
    remarks        TEXT,
    UNIQUE (assignment_id, task_id)
);

CREATE TABLE IF NOT EXISTS attachment (
    completion_id  TEXT NOT NULL REFERENCES completion (id),
    position       INTEGER NOT NULL,
    file_name      TEXT NOT NULL,
    url            TEXT NOT NULL,
    PRIMARY KEY (completion_id, position)
);

-- The tasks that applied when an assignment closed, with their mandatory flag
-- at that moment. Closed progress is computed from these rows only.
CREATE TABLE IF NOT EXISTS closed_task (
    assignment_id  TEXT NOT NULL REFERENCES assignment (id),
    task_id        INTEGER NOT NULL REFERENCES task (id),
    mandatory      INTEGER NOT NULL CHECK (mandatory IN (0, 1)),
    PRIMARY KEY (assignment_id, task_id)
);

CREATE TRIGGER IF NOT EXISTS cadet_never_deleted
BEFORE DELETE ON cadet
BEGIN
    SELECT RAISE(ABORT, 'cadet records are never deleted');
END;

CREATE TRIGGER IF NOT EXISTS assignment_never_deleted
BEFORE DELETE ON assignment
BEGIN
    SELECT RAISE(ABORT, 'assignments are never deleted');
END;

CREATE TRIGGER IF NOT EXISTS assignment_closed_is_frozen
BEFORE UPDATE ON assignment
WHEN OLD.status <> 'active'
BEGIN
    SELECT RAISE(ABORT, 'closed assignments are immutable');
END;

CREATE TRIGGER IF NOT EXISTS completion_append_only_update
BEFORE UPDATE ON completion
BEGIN
    SELECT RAISE(ABORT, 'completion records are append-only');
END;

CREATE TRIGGER IF NOT EXISTS completion_append_only_delete
BEFORE DELETE ON completion
BEGIN
    SELECT RAISE(ABORT, 'completion records are append-only');
END;

CREATE TRIGGER IF NOT EXISTS closed_task_append_only_update
BEFORE UPDATE ON closed_task
BEGIN
    SELECT RAISE(ABORT, 'closed task sets are immutable');
END;

CREATE TRIGGER IF NOT EXISTS closed_task_append_only_delete
BEFORE DELETE ON closed_task
BEGIN
    SELECT RAISE(ABORT, 'closed task sets are immutable');
END;

CREATE TRIGGER IF NOT EXISTS attachment_append_only_update
BEFORE UPDATE ON attachment
BEGIN
    SELECT RAISE(ABORT, 'attachment references are append-only');
END;

CREATE TRIGGER IF NOT EXISTS attachment_append_only_delete
BEFORE DELETE ON attachment
BEGIN
    SELECT RAISE(ABORT, 'attachment references are append-only');
END;
";

/// Creates all tables, indexes, and triggers that don't exist yet.
pub(super) fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
