use rusqlite::Connection;

use crate::store::StoreError;

/// Idempotent schema setup, run once per session at startup. `email` is the
/// natural key the upsert engine resolves conflicts on; the AUTOINCREMENT
/// counter is what the sequence reconciler rewinds after deletes.
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            age INTEGER NOT NULL,
            class_label TEXT,
            email TEXT NOT NULL UNIQUE,
            phone_number TEXT NOT NULL UNIQUE,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )",
        [],
    )
    .map_err(StoreError::Schema)?;
    Ok(())
}
