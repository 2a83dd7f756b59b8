//! Template catalog storage: applicable-task listing and catalog import.

use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;
use tracing::{debug, info};

use crate::model::{
    ApplicableTask, CadetCategory, Catalog, ImportReport, Section, SectionSpec, Task, TaskSpec,
};

use super::{Error, Result, Storage, write_tx};

impl Storage {
    /// Lists every task that applies to a cadet of `category` aboard a vessel
    /// of `ship_type`, ordered by section order and then task order.
    pub fn list_applicable_tasks(
        &self,
        category: CadetCategory,
        ship_type: Option<&str>,
    ) -> Result<Vec<ApplicableTask>> {
        let conn = self.connect()?;
        applicable_tasks(&conn, category, ship_type)
    }

    pub fn load_section(&self, id: i64) -> Result<Section> {
        let conn = self.connect()?;
        section_row(&conn, id)?.ok_or_else(|| Error::NotFound(format!("section {id}")))
    }

    pub fn load_task(&self, id: i64) -> Result<Task> {
        let conn = self.connect()?;
        task_row(&conn, id)?.ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    /// Applies an authored catalog in a single transaction.
    ///
    /// Sections match by code and tasks by `(section, code)`. A section is
    /// frozen once any completion references one of its tasks: it can then be
    /// neither edited nor extended, and new material goes under a new section
    /// code. Anything else is inserted or updated in place. A change to a
    /// frozen section fails the whole import with [`Error::InvalidState`] and
    /// nothing is written.
    pub fn import_catalog(&self, catalog: &Catalog) -> Result<ImportReport> {
        validate_catalog(catalog)?;

        let mut conn = self.connect()?;
        let tx = write_tx(&mut conn)?;
        let mut report = ImportReport::default();

        for spec in &catalog.sections {
            let section = import_section(&tx, spec, &mut report)?;
            for task in &spec.tasks {
                import_task(&tx, &section, task, &mut report)?;
            }
        }

        tx.commit()?;
        info!(
            sections_added = report.sections_added,
            sections_updated = report.sections_updated,
            tasks_added = report.tasks_added,
            tasks_updated = report.tasks_updated,
            "catalog imported"
        );
        Ok(report)
    }
}

/// Whether a section applies aboard a vessel of `ship_type`.
pub(super) fn section_applies(section: &Section, ship_type: Option<&str>) -> bool {
    match section.ship_type.as_deref() {
        None => true,
        Some(required) => ship_type == Some(required),
    }
}

pub(super) fn applicable_tasks(
    conn: &Connection,
    category: CadetCategory,
    ship_type: Option<&str>,
) -> Result<Vec<ApplicableTask>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.code, s.title, s.sort_order, s.ship_type,
                t.id, t.section_id, t.category, t.code, t.description, t.sort_order, t.mandatory
         FROM task t
         JOIN section s ON s.id = t.section_id
         WHERE t.category = ?1
         ORDER BY s.sort_order, s.id, t.sort_order, t.id",
    )?;
    let rows = stmt.query_map([category.as_str()], |row| read_applicable(row, category))?;

    let mut tasks = Vec::new();
    for row in rows {
        let entry = row?;
        if section_applies(&entry.section, ship_type) {
            tasks.push(entry);
        }
    }
    debug!(%category, ship_type = ?ship_type, count = tasks.len(), "listed applicable tasks");
    Ok(tasks)
}

/// The task set captured when an assignment closed, in template order, with
/// the mandatory flag as it was at closing.
pub(super) fn closed_tasks(
    conn: &Connection,
    assignment_id: Uuid,
    category: CadetCategory,
) -> Result<Vec<ApplicableTask>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.code, s.title, s.sort_order, s.ship_type,
                t.id, t.section_id, t.category, t.code, t.description, t.sort_order, ct.mandatory
         FROM closed_task ct
         JOIN task t ON t.id = ct.task_id
         JOIN section s ON s.id = t.section_id
         WHERE ct.assignment_id = ?1
         ORDER BY s.sort_order, s.id, t.sort_order, t.id",
    )?;
    let rows = stmt.query_map([assignment_id.to_string()], |row| read_applicable(row, category))?;
    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(row?);
    }
    debug!(assignment = %assignment_id, count = tasks.len(), "loaded closed task set");
    Ok(tasks)
}

fn read_applicable(row: &Row<'_>, category: CadetCategory) -> rusqlite::Result<ApplicableTask> {
    Ok(ApplicableTask {
        section: Section {
            id: row.get(0)?,
            code: row.get(1)?,
            title: row.get(2)?,
            order: row.get(3)?,
            ship_type: row.get(4)?,
        },
        task: Task {
            id: row.get(5)?,
            section_id: row.get(6)?,
            category,
            code: row.get(8)?,
            description: row.get(9)?,
            order: row.get(10)?,
            mandatory: row.get(11)?,
        },
    })
}

pub(super) fn section_row(conn: &Connection, id: i64) -> Result<Option<Section>> {
    Ok(conn
        .query_row(
            "SELECT id, code, title, sort_order, ship_type FROM section WHERE id = ?1",
            [id],
            |row| {
                Ok(Section {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    title: row.get(2)?,
                    order: row.get(3)?,
                    ship_type: row.get(4)?,
                })
            },
        )
        .optional()?)
}

pub(super) fn task_row(conn: &Connection, id: i64) -> Result<Option<Task>> {
    let row = conn
        .query_row(
            "SELECT id, section_id, category, code, description, sort_order, mandatory
             FROM task WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, bool>(6)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, section_id, category, code, description, order, mandatory)| {
        let category = CadetCategory::parse(&category)
            .map_err(|_| Error::Corrupt(format!("task {id} has unknown category {category}")))?;
        Ok(Task {
            id,
            section_id,
            category,
            code,
            description,
            order,
            mandatory,
        })
    })
    .transpose()
}

fn validate_catalog(catalog: &Catalog) -> Result<()> {
    let mut section_codes = HashSet::new();
    for section in &catalog.sections {
        if section.code.trim().is_empty() || section.title.trim().is_empty() {
            return Err(Error::Validation(
                "section code and title cannot be empty".into(),
            ));
        }
        if !section_codes.insert(section.code.as_str()) {
            return Err(Error::Validation(format!(
                "section {} appears more than once",
                section.code
            )));
        }
        let mut task_codes = HashSet::new();
        for task in &section.tasks {
            if task.code.trim().is_empty() || task.description.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "task in section {} has an empty code or description",
                    section.code
                )));
            }
            if !task_codes.insert(task.code.as_str()) {
                return Err(Error::Validation(format!(
                    "task {} appears more than once in section {}",
                    task.code, section.code
                )));
            }
        }
    }
    Ok(())
}

/// A section as matched or created during import.
struct ImportedSection {
    id: i64,
    code: String,

    /// Completion records referencing any task in the section.
    references: i64,
}

fn import_section(
    conn: &Connection,
    spec: &SectionSpec,
    report: &mut ImportReport,
) -> Result<ImportedSection> {
    let existing = conn
        .query_row(
            "SELECT id, code, title, sort_order, ship_type FROM section WHERE code = ?1",
            [&spec.code],
            |row| {
                Ok(Section {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    title: row.get(2)?,
                    order: row.get(3)?,
                    ship_type: row.get(4)?,
                })
            },
        )
        .optional()?;

    let Some(section) = existing else {
        conn.execute(
            "INSERT INTO section (code, title, sort_order, ship_type) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![&spec.code, &spec.title, spec.order, &spec.ship_type],
        )?;
        report.sections_added += 1;
        return Ok(ImportedSection {
            id: conn.last_insert_rowid(),
            code: spec.code.clone(),
            references: 0,
        });
    };

    let imported = ImportedSection {
        id: section.id,
        code: section.code.clone(),
        references: section_references(conn, section.id)?,
    };

    if section.title == spec.title && section.order == spec.order && section.ship_type == spec.ship_type {
        report.unchanged += 1;
        return Ok(imported);
    }

    if imported.references > 0 {
        return Err(frozen_section(&imported, "edited"));
    }

    conn.execute(
        "UPDATE section SET title = ?1, sort_order = ?2, ship_type = ?3 WHERE id = ?4",
        rusqlite::params![&spec.title, spec.order, &spec.ship_type, section.id],
    )?;
    report.sections_updated += 1;
    Ok(imported)
}

fn import_task(
    conn: &Connection,
    section: &ImportedSection,
    spec: &TaskSpec,
    report: &mut ImportReport,
) -> Result<()> {
    let existing_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM task WHERE section_id = ?1 AND code = ?2",
            rusqlite::params![section.id, &spec.code],
            |row| row.get(0),
        )
        .optional()?;

    let Some(task) = existing_id.map(|id| task_row(conn, id)).transpose()?.flatten() else {
        if section.references > 0 {
            return Err(frozen_section(section, &format!("extended with task {}", spec.code)));
        }
        conn.execute(
            "INSERT INTO task (section_id, category, code, description, sort_order, mandatory)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                section.id,
                spec.category.as_str(),
                &spec.code,
                &spec.description,
                spec.order,
                spec.mandatory,
            ],
        )?;
        report.tasks_added += 1;
        return Ok(());
    };

    if task.category == spec.category
        && task.description == spec.description
        && task.order == spec.order
        && task.mandatory == spec.mandatory
    {
        report.unchanged += 1;
        return Ok(());
    }

    if section.references > 0 {
        return Err(frozen_section(section, &format!("edited at task {}", spec.code)));
    }

    conn.execute(
        "UPDATE task SET category = ?1, description = ?2, sort_order = ?3, mandatory = ?4
         WHERE id = ?5",
        rusqlite::params![
            spec.category.as_str(),
            &spec.description,
            spec.order,
            spec.mandatory,
            task.id,
        ],
    )?;
    report.tasks_updated += 1;
    Ok(())
}

fn section_references(conn: &Connection, section_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM completion c JOIN task t ON t.id = c.task_id WHERE t.section_id = ?1",
        [section_id],
        |row| row.get(0),
    )?)
}

fn frozen_section(section: &ImportedSection, change: &str) -> Error {
    Error::InvalidState(format!(
        "section {} is referenced by {} completion record(s) and cannot be {change}; \
         publish the change under a new section code",
        section.code, section.references
    ))
}
