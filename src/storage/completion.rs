//! Completion storage: record sign-offs and load them per assignment.

use std::collections::HashMap;

use jiff::Timestamp;
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{Attachment, Completion};

use super::{
    Error, Result, Storage,
    assignment::assignment_row,
    format_timestamp, parse_timestamp, parse_uuid,
    roster::{cadet_row, vessel_row},
    template::{section_applies, section_row, task_row},
    write_tx,
};

impl Storage {
    /// Records that a task was completed during an assignment.
    ///
    /// Runs in one write transaction, so a concurrent close either lands first
    /// (and this fails with [`Error::InvalidState`]) or after the completion is
    /// stored. A second completion for the same task fails with
    /// [`Error::Conflict`] and leaves the first untouched.
    pub fn record_completion(
        &self,
        assignment_id: Uuid,
        task_id: i64,
        signed_by: &str,
        remarks: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<Completion> {
        let mut conn = self.connect()?;
        let tx = write_tx(&mut conn)?;

        let assignment = assignment_row(&tx, assignment_id)?
            .ok_or_else(|| Error::NotFound(format!("assignment {assignment_id}")))?;
        if !assignment.is_active() {
            warn!(assignment = %assignment_id, task = task_id, "rejected completion on closed assignment");
            return Err(Error::InvalidState(format!(
                "assignment {} is {}; no further completions can be recorded",
                assignment.short_id(),
                assignment.status.as_str()
            )));
        }
        let task = task_row(&tx, task_id)?.ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;

        if signed_by.trim().is_empty() {
            return Err(Error::Validation("signed_by cannot be empty".into()));
        }
        if let Some(bad) = attachments
            .iter()
            .find(|a| a.file_name.trim().is_empty() || a.url.trim().is_empty())
        {
            return Err(Error::Validation(format!(
                "attachment '{}' needs both a file name and a url",
                bad.file_name
            )));
        }

        let cadet = cadet_row(&tx, &assignment.cadet_id)?.ok_or_else(|| {
            Error::Corrupt(format!("assignment {assignment_id} references a missing cadet"))
        })?;
        let vessel = vessel_row(&tx, &assignment.vessel_id)?.ok_or_else(|| {
            Error::Corrupt(format!("assignment {assignment_id} references a missing vessel"))
        })?;
        let section = section_row(&tx, task.section_id)?
            .ok_or_else(|| Error::Corrupt(format!("task {task_id} references a missing section")))?;

        if task.category != cadet.category {
            return Err(Error::Validation(format!(
                "task {} is for {} cadets; cadet {} is {}",
                task.code, task.category, cadet.id, cadet.category
            )));
        }
        if !section_applies(&section, vessel.ship_type.as_deref()) {
            return Err(Error::Validation(format!(
                "task {} belongs to section {}, which does not apply aboard vessel {}",
                task.code, section.code, vessel.id
            )));
        }

        let duplicate = completion_exists(&tx, assignment_id, task_id)?;
        if duplicate {
            return Err(duplicate_error(&task.code, &assignment.short_id()));
        }

        let completion = Completion {
            id: Uuid::new_v4(),
            assignment_id,
            task_id,
            completed_at: Timestamp::now(),
            signed_by: signed_by.trim().to_string(),
            remarks: remarks.map(String::from),
            attachments: attachments.to_vec(),
        };

        tx.execute(
            "INSERT INTO completion (id, assignment_id, task_id, completed_at, signed_by, remarks)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                completion.id.to_string(),
                assignment_id.to_string(),
                task_id,
                format_timestamp(completion.completed_at),
                &completion.signed_by,
                &completion.remarks,
            ],
        )
        .map_err(|e| {
            if Error::is_constraint_violation(&e) {
                duplicate_error(&task.code, &assignment.short_id())
            } else {
                e.into()
            }
        })?;
        for (position, attachment) in completion.attachments.iter().enumerate() {
            tx.execute(
                "INSERT INTO attachment (completion_id, position, file_name, url)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    completion.id.to_string(),
                    position,
                    &attachment.file_name,
                    &attachment.url,
                ],
            )?;
        }
        tx.commit()?;

        info!(
            assignment = %assignment_id,
            task = %task.code,
            signed_by = %completion.signed_by,
            attachments = completion.attachments.len(),
            "completion recorded"
        );
        Ok(completion)
    }

    /// Every completion recorded for an assignment, keyed by task id.
    pub fn completions_for_assignment(&self, assignment_id: Uuid) -> Result<HashMap<i64, Completion>> {
        let conn = self.connect()?;
        if assignment_row(&conn, assignment_id)?.is_none() {
            return Err(Error::NotFound(format!("assignment {assignment_id}")));
        }
        completions(&conn, assignment_id)
    }
}

pub(super) fn completions(conn: &Connection, assignment_id: Uuid) -> Result<HashMap<i64, Completion>> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, completed_at, signed_by, remarks
         FROM completion WHERE assignment_id = ?1",
    )?;
    let rows = stmt.query_map([assignment_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut by_task = HashMap::new();
    for row in rows {
        let (id, task_id, completed_at, signed_by, remarks) = row?;
        by_task.insert(
            task_id,
            Completion {
                id: parse_uuid(&id, "completion id")?,
                assignment_id,
                task_id,
                completed_at: parse_timestamp(&completed_at, "completed_at")?,
                signed_by,
                remarks,
                attachments: Vec::new(),
            },
        );
    }

    let mut stmt = conn.prepare(
        "SELECT c.task_id, a.file_name, a.url
         FROM attachment a JOIN completion c ON c.id = a.completion_id
         WHERE c.assignment_id = ?1
         ORDER BY c.task_id, a.position",
    )?;
    let rows = stmt.query_map([assignment_id.to_string()], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            Attachment {
                file_name: row.get(1)?,
                url: row.get(2)?,
            },
        ))
    })?;
    for row in rows {
        let (task_id, attachment) = row?;
        if let Some(completion) = by_task.get_mut(&task_id) {
            completion.attachments.push(attachment);
        }
    }

    Ok(by_task)
}

fn completion_exists(conn: &Connection, assignment_id: Uuid, task_id: i64) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM completion WHERE assignment_id = ?1 AND task_id = ?2",
            rusqlite::params![assignment_id.to_string(), task_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn duplicate_error(task_code: &str, assignment: &str) -> Error {
    Error::Conflict(format!(
        "task {task_code} is already signed off for assignment {assignment}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    use jiff::civil::date;

    use crate::model::CloseStatus;
    use crate::storage::fixtures::{seeded_storage, start, task_id};

    fn evidence() -> Vec<Attachment> {
        vec![
            Attachment {
                file_name: "muster.jpg".into(),
                url: "https://files.example/muster.jpg".into(),
            },
            Attachment {
                file_name: "drill-log.pdf".into(),
                url: "https://files.example/drill-log.pdf".into(),
            },
        ]
    }

    #[test]
    fn record_and_load_completion() {
        let (_dir, storage) = seeded_storage();
        let assignment = storage.create_assignment("C-1", "V-T", start(), None).unwrap();
        let task = task_id(&storage, "SAF-01");

        let recorded = storage
            .record_completion(assignment.id, task, "Chief Officer", Some("Well done"), &evidence())
            .unwrap();

        let loaded = storage.completions_for_assignment(assignment.id).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&task], recorded);
        assert_eq!(loaded[&task].attachments[1].file_name, "drill-log.pdf");
    }

    #[test]
    fn duplicate_completion_conflicts_and_keeps_original() {
        let (_dir, storage) = seeded_storage();
        let assignment = storage.create_assignment("C-1", "V-T", start(), None).unwrap();
        let task = task_id(&storage, "SAF-01");

        let original = storage
            .record_completion(assignment.id, task, "Chief Officer", Some("First"), &[])
            .unwrap();
        let err = storage
            .record_completion(assignment.id, task, "Master", Some("Second"), &evidence())
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let loaded = storage.completions_for_assignment(assignment.id).unwrap();
        assert_eq!(loaded[&task], original);
    }

    #[test]
    fn concurrent_duplicates_store_one_record() {
        let (_dir, storage) = seeded_storage();
        let assignment = storage.create_assignment("C-1", "V-T", start(), None).unwrap();
        let task = task_id(&storage, "SAF-02");

        let results: Vec<Result<Completion>> = thread::scope(|s| {
            let handles: Vec<_> = (0..6)
                .map(|i| {
                    let storage = storage.clone();
                    let signer = format!("Officer {i}");
                    s.spawn(move || storage.record_completion(assignment.id, task, &signer, None, &[]))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, Error::Conflict(_)))
        );
        assert_eq!(storage.completions_for_assignment(assignment.id).unwrap().len(), 1);
    }

    #[test]
    fn close_racing_completions_is_all_or_nothing_per_completion() {
        let (_dir, storage) = seeded_storage();
        let tasks: Vec<i64> = ["SAF-01", "SAF-02", "SAF-03", "SAF-04", "TNK-01"]
            .into_iter()
            .map(|code| task_id(&storage, code))
            .collect();

        for round in 1..=4 {
            let assignment = storage
                .create_assignment("C-1", "V-T", date(2024, 2 * round - 1, 1), None)
                .unwrap();

            let (closed_after, results) = thread::scope(|s| {
                let completers: Vec<_> = tasks
                    .iter()
                    .map(|&task| {
                        let storage = storage.clone();
                        s.spawn(move || storage.record_completion(assignment.id, task, "Master", None, &[]))
                    })
                    .collect();
                let closer = {
                    let storage = storage.clone();
                    s.spawn(move || {
                        storage
                            .close_assignment(assignment.id, date(2024, 2 * round, 1), CloseStatus::Completed, None)
                            .unwrap();
                        Timestamp::now()
                    })
                };
                let results: Vec<Result<Completion>> =
                    completers.into_iter().map(|h| h.join().unwrap()).collect();
                (closer.join().unwrap(), results)
            });

            let mut accepted = Vec::new();
            for result in results {
                match result {
                    Ok(completion) => {
                        assert!(completion.completed_at < closed_after);
                        accepted.push(completion.id);
                    }
                    Err(e) => assert!(matches!(e, Error::InvalidState(_)), "{e}"),
                }
            }

            let mut stored: Vec<Uuid> = storage
                .completions_for_assignment(assignment.id)
                .unwrap()
                .into_values()
                .map(|c| c.id)
                .collect();
            stored.sort();
            accepted.sort();
            assert_eq!(stored, accepted);

            let late = storage
                .record_completion(assignment.id, tasks[0], "Master", None, &[])
                .unwrap_err();
            assert!(matches!(late, Error::InvalidState(_)));
        }
    }

    #[test]
    fn category_mismatch_is_invalid_and_stores_nothing() {
        let (_dir, storage) = seeded_storage();
        let assignment = storage.create_assignment("C-1", "V-T", start(), None).unwrap();
        let engine_task = task_id(&storage, "SAF-E1");

        let err = storage
            .record_completion(assignment.id, engine_task, "Chief Engineer", None, &[])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(storage.completions_for_assignment(assignment.id).unwrap().is_empty());
    }

    #[test]
    fn ship_type_mismatch_is_invalid() {
        let (_dir, storage) = seeded_storage();
        let assignment = storage.create_assignment("C-1", "V-B", start(), None).unwrap();

        let err = storage
            .record_completion(assignment.id, task_id(&storage, "TNK-01"), "Master", None, &[])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn closed_assignment_is_frozen() {
        let (_dir, storage) = seeded_storage();
        let assignment = storage.create_assignment("C-1", "V-T", start(), None).unwrap();
        storage
            .close_assignment(assignment.id, date(2024, 6, 1), CloseStatus::Completed, None)
            .unwrap();

        let err = storage
            .record_completion(assignment.id, task_id(&storage, "SAF-01"), "Master", None, &[])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn unknown_assignment_or_task_is_not_found() {
        let (_dir, storage) = seeded_storage();
        let err = storage
            .record_completion(Uuid::new_v4(), task_id(&storage, "SAF-01"), "Master", None, &[])
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let assignment = storage.create_assignment("C-1", "V-T", start(), None).unwrap();
        let err = storage
            .record_completion(assignment.id, 9_999, "Master", None, &[])
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn blank_signer_and_bad_attachment_are_invalid() {
        let (_dir, storage) = seeded_storage();
        let assignment = storage.create_assignment("C-1", "V-T", start(), None).unwrap();
        let task = task_id(&storage, "SAF-01");

        let err = storage
            .record_completion(assignment.id, task, "   ", None, &[])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let bad = [Attachment {
            file_name: "photo.jpg".into(),
            url: String::new(),
        }];
        let err = storage
            .record_completion(assignment.id, task, "Master", None, &bad)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn completions_for_unknown_assignment_fail() {
        let (_dir, storage) = seeded_storage();
        let err = storage.completions_for_assignment(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
