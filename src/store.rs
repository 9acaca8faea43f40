use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot reach storage: {0}")]
    Connection(#[source] rusqlite::Error),
    #[error("cannot prepare storage directory: {0}")]
    DataDir(#[source] std::io::Error),
    #[error("schema setup failed: {0}")]
    Schema(#[source] rusqlite::Error),
    #[error("unique constraint violated: {0}")]
    Constraint(String),
    #[error("no student with id {0}")]
    NotFound(i64),
    #[error("sequence reconciliation failed: {0}")]
    Reconcile(#[source] rusqlite::Error),
    #[error("storage operation failed: {0}")]
    Db(#[from] rusqlite::Error),
}

impl StoreError {
    /// Stable code reported over the wire for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Connection(_) | StoreError::DataDir(_) => "db_open_failed",
            StoreError::Schema(_) => "schema_failed",
            StoreError::Constraint(_) => "constraint_violation",
            StoreError::NotFound(_) => "not_found",
            StoreError::Reconcile(_) => "reconcile_failed",
            StoreError::Db(_) => "db_query_failed",
        }
    }
}

/// A persisted roster row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub class_label: Option<String>,
    pub email: String,
    pub phone_number: String,
    pub updated_at: String,
}

/// An incoming row before storage has assigned an id. The upsert engine
/// never supplies `id`; conflict resolution is keyed on `email`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateStudent {
    pub name: String,
    pub age: i64,
    pub class_label: Option<String>,
    pub email: String,
    pub phone_number: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertReport {
    pub upserted: usize,
    pub failures: Vec<RowFailure>,
}

/// One rejected row, with its 1-based position in the submitted batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub message: String,
}

fn now_stamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn is_constraint(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn map_sql_err(e: rusqlite::Error) -> StoreError {
    if is_constraint(&e) {
        StoreError::Constraint(e.to_string())
    } else {
        StoreError::Db(e)
    }
}

/// Merge a batch of candidate rows into the roster, in input order.
///
/// The whole batch runs in one transaction. A row that trips a unique
/// constraint (a phone number already held by a different student) is
/// recorded in the report and skipped; statement-level atomicity keeps the
/// transaction usable, so the surviving rows still commit together. Any
/// other storage error rolls the whole batch back.
pub fn upsert_batch(
    conn: &Connection,
    batch: &[CandidateStudent],
) -> Result<UpsertReport, StoreError> {
    let tx = conn.unchecked_transaction()?;
    let mut report = UpsertReport::default();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO students(name, age, class_label, email, phone_number, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(email) DO UPDATE SET
               name = excluded.name,
               age = excluded.age,
               class_label = excluded.class_label,
               phone_number = excluded.phone_number,
               updated_at = excluded.updated_at",
        )?;
        for (i, cand) in batch.iter().enumerate() {
            let res = stmt.execute((
                &cand.name,
                cand.age,
                cand.class_label.as_deref(),
                &cand.email,
                &cand.phone_number,
                now_stamp(),
            ));
            match res {
                Ok(_) => report.upserted += 1,
                Err(e) if is_constraint(&e) => report.failures.push(RowFailure {
                    row: i + 1,
                    email: Some(cand.email.clone()),
                    message: e.to_string(),
                }),
                Err(e) => return Err(StoreError::Db(e)),
            }
        }
    }
    tx.commit()?;
    Ok(report)
}

/// Full replacement of all mutable fields by primary key.
pub fn update_record(
    conn: &Connection,
    id: i64,
    fields: &CandidateStudent,
) -> Result<(), StoreError> {
    let changed = conn
        .execute(
            "UPDATE students
             SET name = ?, age = ?, class_label = ?, email = ?, phone_number = ?, updated_at = ?
             WHERE id = ?",
            (
                &fields.name,
                fields.age,
                fields.class_label.as_deref(),
                &fields.email,
                &fields.phone_number,
                now_stamp(),
                id,
            ),
        )
        .map_err(map_sql_err)?;
    if changed == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}

/// Delete by primary key, then bring the id counter back in line. The
/// reconciliation runs before the delete reports success.
pub fn delete_record(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let changed = conn.execute("DELETE FROM students WHERE id = ?", [id])?;
    if changed == 0 {
        return Err(StoreError::NotFound(id));
    }
    reconcile_sequence(conn)?;
    Ok(())
}

/// Reset the AUTOINCREMENT counter to the current MAX(id), or 0 when the
/// table is empty so the next insert gets id 1. If nothing was ever
/// inserted there is no counter row and this is a no-op.
pub fn reconcile_sequence(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE sqlite_sequence
         SET seq = (SELECT COALESCE(MAX(id), 0) FROM students)
         WHERE name = 'students'",
        [],
    )
    .map_err(StoreError::Reconcile)?;
    Ok(())
}

/// All roster rows, ascending by id.
pub fn fetch_all(conn: &Connection) -> Result<Vec<StudentRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, age, class_label, email, phone_number, updated_at
         FROM students
         ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(StudentRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            age: row.get(2)?,
            class_label: row.get(3)?,
            email: row.get(4)?,
            phone_number: row.get(5)?,
            updated_at: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        ensure_schema(&conn).expect("schema");
        conn
    }

    fn cand(name: &str, age: i64, email: &str, phone: &str) -> CandidateStudent {
        CandidateStudent {
            name: name.to_string(),
            age,
            class_label: Some("10B".to_string()),
            email: email.to_string(),
            phone_number: phone.to_string(),
        }
    }

    #[test]
    fn upsert_inserts_new_rows_in_order() {
        let conn = test_conn();
        let report = upsert_batch(
            &conn,
            &[
                cand("Asha", 14, "asha@school.org", "100"),
                cand("Ben", 15, "ben@school.org", "101"),
            ],
        )
        .expect("upsert");
        assert_eq!(report.upserted, 2);
        assert!(report.failures.is_empty());

        let rows = fetch_all(&conn).expect("fetch");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].name, "Asha");
        assert_eq!(rows[1].id, 2);
        assert_eq!(rows[1].email, "ben@school.org");
    }

    #[test]
    fn upsert_is_idempotent_keyed_on_email() {
        let conn = test_conn();
        let batch = [
            cand("Asha", 14, "asha@school.org", "100"),
            cand("Ben", 15, "ben@school.org", "101"),
        ];
        upsert_batch(&conn, &batch).expect("first");
        upsert_batch(&conn, &batch).expect("second");

        let rows = fetch_all(&conn).expect("fetch");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[1].id, 2);
    }

    #[test]
    fn conflicting_email_overwrites_mutable_fields_and_keeps_id() {
        let conn = test_conn();
        upsert_batch(&conn, &[cand("A", 20, "a@x.com", "1")]).expect("first");
        upsert_batch(&conn, &[cand("A2", 21, "a@x.com", "2")]).expect("second");

        let rows = fetch_all(&conn).expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].name, "A2");
        assert_eq!(rows[0].age, 21);
        assert_eq!(rows[0].phone_number, "2");
        assert_eq!(rows[0].email, "a@x.com");
    }

    #[test]
    fn duplicate_email_within_one_batch_keeps_first_id() {
        let conn = test_conn();
        let report = upsert_batch(
            &conn,
            &[cand("First", 14, "dup@school.org", "100"), cand("Second", 15, "dup@school.org", "101")],
        )
        .expect("upsert");
        assert_eq!(report.upserted, 2);

        let rows = fetch_all(&conn).expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].name, "Second");
        assert_eq!(rows[0].phone_number, "101");
    }

    #[test]
    fn phone_clash_is_a_row_failure_not_a_batch_failure() {
        let conn = test_conn();
        let report = upsert_batch(
            &conn,
            &[
                cand("Asha", 14, "asha@school.org", "100"),
                cand("Ben", 15, "ben@school.org", "100"),
                cand("Cleo", 16, "cleo@school.org", "102"),
            ],
        )
        .expect("upsert");
        assert_eq!(report.upserted, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].row, 2);
        assert_eq!(report.failures[0].email.as_deref(), Some("ben@school.org"));

        let rows = fetch_all(&conn).expect("fetch");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].email, "asha@school.org");
        assert_eq!(rows[1].email, "cleo@school.org");
    }

    #[test]
    fn round_trip_preserves_fields_and_stamps_updated_at() {
        let conn = test_conn();
        let before = now_stamp();
        upsert_batch(&conn, &[cand("Asha", 14, "asha@school.org", "100")]).expect("upsert");

        let rows = fetch_all(&conn).expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Asha");
        assert_eq!(rows[0].age, 14);
        assert_eq!(rows[0].class_label.as_deref(), Some("10B"));
        assert_eq!(rows[0].phone_number, "100");
        assert!(rows[0].updated_at >= before, "{} < {}", rows[0].updated_at, before);
    }

    #[test]
    fn update_replaces_all_mutable_fields() {
        let conn = test_conn();
        upsert_batch(&conn, &[cand("Asha", 14, "asha@school.org", "100")]).expect("upsert");

        let mut fields = cand("Asha Rao", 15, "asha.rao@school.org", "200");
        fields.class_label = None;
        update_record(&conn, 1, &fields).expect("update");

        let rows = fetch_all(&conn).expect("fetch");
        assert_eq!(rows[0].name, "Asha Rao");
        assert_eq!(rows[0].age, 15);
        assert_eq!(rows[0].class_label, None);
        assert_eq!(rows[0].email, "asha.rao@school.org");
        assert_eq!(rows[0].phone_number, "200");
    }

    #[test]
    fn update_of_missing_id_is_not_found_and_leaves_table_unchanged() {
        let conn = test_conn();
        upsert_batch(&conn, &[cand("Asha", 14, "asha@school.org", "100")]).expect("upsert");
        let before = fetch_all(&conn).expect("fetch");

        let res = update_record(&conn, 99, &cand("Ghost", 1, "ghost@school.org", "999"));
        assert!(matches!(res, Err(StoreError::NotFound(99))));
        assert_eq!(fetch_all(&conn).expect("fetch").len(), before.len());
    }

    #[test]
    fn update_into_anothers_email_is_a_constraint_violation() {
        let conn = test_conn();
        upsert_batch(
            &conn,
            &[
                cand("Asha", 14, "asha@school.org", "100"),
                cand("Ben", 15, "ben@school.org", "101"),
            ],
        )
        .expect("upsert");

        let res = update_record(&conn, 2, &cand("Ben", 15, "asha@school.org", "101"));
        assert!(matches!(res, Err(StoreError::Constraint(_))));
    }

    #[test]
    fn delete_of_missing_id_is_not_found() {
        let conn = test_conn();
        let res = delete_record(&conn, 7);
        assert!(matches!(res, Err(StoreError::NotFound(7))));
    }

    #[test]
    fn deleting_max_id_frees_it_for_the_next_insert() {
        let conn = test_conn();
        upsert_batch(
            &conn,
            &[
                cand("Asha", 14, "asha@school.org", "100"),
                cand("Ben", 15, "ben@school.org", "101"),
                cand("Cleo", 16, "cleo@school.org", "102"),
            ],
        )
        .expect("upsert");

        delete_record(&conn, 3).expect("delete");
        upsert_batch(&conn, &[cand("Dev", 14, "dev@school.org", "103")]).expect("insert after delete");

        let rows = fetch_all(&conn).expect("fetch");
        assert_eq!(rows.last().map(|r| r.id), Some(3));
        assert_eq!(rows.last().map(|r| r.email.as_str()), Some("dev@school.org"));
    }

    #[test]
    fn deleting_everything_resets_ids_to_one() {
        let conn = test_conn();
        upsert_batch(
            &conn,
            &[
                cand("Asha", 14, "asha@school.org", "100"),
                cand("Ben", 15, "ben@school.org", "101"),
            ],
        )
        .expect("upsert");
        delete_record(&conn, 2).expect("delete 2");
        delete_record(&conn, 1).expect("delete 1");

        upsert_batch(&conn, &[cand("Cleo", 16, "cleo@school.org", "102")]).expect("fresh insert");
        let rows = fetch_all(&conn).expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
    }

    #[test]
    fn delete_of_middle_row_keeps_counter_at_max() {
        let conn = test_conn();
        upsert_batch(
            &conn,
            &[
                cand("Asha", 14, "asha@school.org", "100"),
                cand("Ben", 15, "ben@school.org", "101"),
                cand("Cleo", 16, "cleo@school.org", "102"),
            ],
        )
        .expect("upsert");

        delete_record(&conn, 2).expect("delete middle");
        upsert_batch(&conn, &[cand("Dev", 14, "dev@school.org", "103")]).expect("insert");

        let rows = fetch_all(&conn).expect("fetch");
        assert_eq!(rows.last().map(|r| r.id), Some(4));
    }
}
