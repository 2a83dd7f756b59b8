//! Cadet and vessel reference records: register and load.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::model::{Cadet, CadetCategory, Vessel};

use super::{Error, Result, Storage, write_tx};

impl Storage {
    /// Registers a cadet, or updates its name if it already exists.
    ///
    /// The category is fixed once the cadet has any assignment: changing it
    /// would re-scope completions already recorded against other tasks.
    pub fn register_cadet(&self, cadet: &Cadet) -> Result<()> {
        require_non_empty(&cadet.id, "cadet id")?;
        require_non_empty(&cadet.name, "cadet name")?;

        let mut conn = self.connect()?;
        let tx = write_tx(&mut conn)?;
        match cadet_row(&tx, &cadet.id)? {
            None => {
                tx.execute(
                    "INSERT INTO cadet (id, name, category) VALUES (?1, ?2, ?3)",
                    rusqlite::params![&cadet.id, &cadet.name, cadet.category.as_str()],
                )?;
            }
            Some(existing) => {
                if existing.category != cadet.category && has_assignments(&tx, "cadet_id", &cadet.id)? {
                    return Err(Error::InvalidState(format!(
                        "cadet {} already has assignments as a {} cadet",
                        cadet.id, existing.category
                    )));
                }
                tx.execute(
                    "UPDATE cadet SET name = ?1, category = ?2 WHERE id = ?3",
                    rusqlite::params![&cadet.name, cadet.category.as_str(), &cadet.id],
                )?;
            }
        }
        tx.commit()?;
        info!(cadet = %cadet.id, category = %cadet.category, "cadet registered");
        Ok(())
    }

    /// Registers a vessel, or updates its name if it already exists.
    ///
    /// The ship type is fixed once the vessel has any assignment.
    pub fn register_vessel(&self, vessel: &Vessel) -> Result<()> {
        require_non_empty(&vessel.id, "vessel id")?;
        require_non_empty(&vessel.name, "vessel name")?;

        let mut conn = self.connect()?;
        let tx = write_tx(&mut conn)?;
        match vessel_row(&tx, &vessel.id)? {
            None => {
                tx.execute(
                    "INSERT INTO vessel (id, name, ship_type) VALUES (?1, ?2, ?3)",
                    rusqlite::params![&vessel.id, &vessel.name, &vessel.ship_type],
                )?;
            }
            Some(existing) => {
                if existing.ship_type != vessel.ship_type
                    && has_assignments(&tx, "vessel_id", &vessel.id)?
                {
                    return Err(Error::InvalidState(format!(
                        "vessel {} already has assignments; its ship type cannot change",
                        vessel.id
                    )));
                }
                tx.execute(
                    "UPDATE vessel SET name = ?1, ship_type = ?2 WHERE id = ?3",
                    rusqlite::params![&vessel.name, &vessel.ship_type, &vessel.id],
                )?;
            }
        }
        tx.commit()?;
        info!(vessel = %vessel.id, "vessel registered");
        Ok(())
    }

    pub fn load_cadet(&self, id: &str) -> Result<Cadet> {
        let conn = self.connect()?;
        cadet_row(&conn, id)?.ok_or_else(|| Error::NotFound(format!("cadet {id}")))
    }

    pub fn load_vessel(&self, id: &str) -> Result<Vessel> {
        let conn = self.connect()?;
        vessel_row(&conn, id)?.ok_or_else(|| Error::NotFound(format!("vessel {id}")))
    }
}

pub(super) fn cadet_row(conn: &Connection, id: &str) -> Result<Option<Cadet>> {
    let row = conn
        .query_row(
            "SELECT id, name, category FROM cadet WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, name, category)| {
        let category = CadetCategory::parse(&category)
            .map_err(|_| Error::Corrupt(format!("cadet {id} has unknown category {category}")))?;
        Ok(Cadet { id, name, category })
    })
    .transpose()
}

pub(super) fn vessel_row(conn: &Connection, id: &str) -> Result<Option<Vessel>> {
    Ok(conn
        .query_row(
            "SELECT id, name, ship_type FROM vessel WHERE id = ?1",
            [id],
            |row| {
                Ok(Vessel {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    ship_type: row.get(2)?,
                })
            },
        )
        .optional()?)
}

fn has_assignments(conn: &Connection, column: &str, id: &str) -> Result<bool> {
    let sql = format!("SELECT EXISTS (SELECT 1 FROM assignment WHERE {column} = ?1)");
    Ok(conn.query_row(&sql, [id], |row| row.get(0))?)
}

fn require_non_empty(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{what} cannot be empty")));
    }
    Ok(())
}
