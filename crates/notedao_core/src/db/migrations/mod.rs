//! Ordered schema migrations tracked through `PRAGMA user_version`.
//!
//! # Invariants
//! - Versions are contiguous and start at 1.
//! - All pending steps run in one transaction; a failing step applies none.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

/// One schema step: `user_version` after it runs, plus its SQL.
type Step = (u32, &'static str);

const STEPS: &[Step] = &[
    (1, include_str!("0001_note.sql")),
    (2, include_str!("0002_notebook.sql")),
];

/// Newest schema version this build can open.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |(version, _)| *version)
}

/// Brings `conn` up to [`latest_version`] and returns how many steps ran.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file was written by a newer build.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<usize> {
    let from = schema_version(conn)?;
    let latest = latest_version();
    if from > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from,
            latest_supported: latest,
        });
    }

    let pending: Vec<&Step> = STEPS.iter().filter(|(version, _)| *version > from).collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    for (version, sql) in &pending {
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={from} to_version={latest} steps={}",
        pending.len()
    );
    Ok(pending.len())
}

fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
