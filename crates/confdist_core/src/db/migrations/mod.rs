//! Ordered schema steps for the record database.
//!
//! The schema version lives in `PRAGMA user_version`. Pending steps run in
//! one transaction, so a file is either fully upgraded or left untouched.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, Transaction};

/// `(version, sql)` pairs; versions start at 1 and increase by one.
const STEPS: &[(u32, &str)] = &[
    (1, include_str!("0001_records.sql")),
    (2, include_str!("0002_factory_members.sql")),
];

/// Schema version a freshly opened database ends up at.
pub fn target_version() -> u32 {
    STEPS.last().map_or(0, |&(version, _)| version)
}

/// Brings `conn` up to [`target_version`].
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let found = read_version(conn)?;
    let known = target_version();
    if found > known {
        return Err(DbError::SchemaTooNew { found, known });
    }

    let pending: Vec<_> = STEPS.iter().filter(|&&(version, _)| version > found).collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for &&(step, sql) in &pending {
        run_step(&tx, step, sql).map_err(|source| DbError::Upgrade { step, source })?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from={} to={} steps={}",
        found,
        known,
        pending.len()
    );
    Ok(())
}

fn run_step(tx: &Transaction<'_>, step: u32, sql: &str) -> rusqlite::Result<()> {
    tx.execute_batch(sql)?;
    tx.pragma_update(None, "user_version", step)
}

fn read_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
