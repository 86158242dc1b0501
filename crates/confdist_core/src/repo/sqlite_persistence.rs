//! SQLite-backed persistence port.
//!
//! # Responsibility
//! - Store record property sets as JSON text keyed by identity.
//! - Store factory membership as a JSON array keyed by factory identity.
//!
//! # Invariants
//! - Reads reject payloads that do not parse instead of masking them.
//! - One connection is shared behind a mutex; statements never run while
//!   the caller holds a record lock.

use crate::db::{open_db, open_db_in_memory};
use crate::model::properties::Properties;
use crate::repo::persistence::{PersistencePort, PersistenceResult};
use log::{debug, error};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// SQLite implementation of [`PersistencePort`].
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    /// Wraps a connection that already has migrations applied.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> PersistenceResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PersistencePort for SqlitePersistence {
    fn exists(&self, identity: &str) -> PersistenceResult<bool> {
        let conn = self.lock_conn();
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM config_records WHERE identity = ?1);",
            [identity],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn load(&self, identity: &str) -> PersistenceResult<Option<Properties>> {
        let conn = self.lock_conn();
        let payload: Option<String> = conn
            .query_row(
                "SELECT properties FROM config_records WHERE identity = ?1;",
                [identity],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(payload) => Ok(Some(parse_properties(identity, &payload)?)),
            None => Ok(None),
        }
    }

    fn load_all(&self) -> PersistenceResult<Vec<(String, PersistenceResult<Properties>)>> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare("SELECT identity, properties FROM config_records ORDER BY identity ASC;")?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            let identity: String = row.get("identity")?;
            let payload: String = row.get("properties")?;
            let properties = parse_properties(&identity, &payload);
            records.push((identity, properties));
        }

        Ok(records)
    }

    fn store(&self, identity: &str, properties: &Properties) -> PersistenceResult<()> {
        let payload = serde_json::to_string(properties)?;
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO config_records (identity, properties)
             VALUES (?1, ?2)
             ON CONFLICT(identity) DO UPDATE SET
                properties = excluded.properties,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![identity, payload],
        )?;
        debug!(
            "event=record_store module=persistence status=ok identity={} keys={}",
            identity,
            properties.len()
        );
        Ok(())
    }

    fn delete(&self, identity: &str) -> PersistenceResult<()> {
        let conn = self.lock_conn();
        let changed = conn.execute("DELETE FROM config_records WHERE identity = ?1;", [identity])?;
        debug!(
            "event=record_delete module=persistence status=ok identity={} removed={}",
            identity, changed
        );
        Ok(())
    }

    fn store_members(
        &self,
        factory_identity: &str,
        members: &BTreeSet<String>,
    ) -> PersistenceResult<()> {
        let payload = serde_json::to_string(members)?;
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO factory_members (factory_identity, members)
             VALUES (?1, ?2)
             ON CONFLICT(factory_identity) DO UPDATE SET
                members = excluded.members,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![factory_identity, payload],
        )?;
        Ok(())
    }

    fn load_members(&self, factory_identity: &str) -> PersistenceResult<Option<BTreeSet<String>>> {
        let conn = self.lock_conn();
        let payload: Option<String> = conn
            .query_row(
                "SELECT members FROM factory_members WHERE factory_identity = ?1;",
                [factory_identity],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    fn load_all_factories(&self) -> PersistenceResult<Vec<(String, BTreeSet<String>)>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT factory_identity, members FROM factory_members ORDER BY factory_identity ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut factories = Vec::new();

        while let Some(row) = rows.next()? {
            let factory_identity: String = row.get("factory_identity")?;
            let payload: String = row.get("members")?;
            factories.push((factory_identity, serde_json::from_str(&payload)?));
        }

        Ok(factories)
    }
}

fn parse_properties(identity: &str, payload: &str) -> PersistenceResult<Properties> {
    serde_json::from_str(payload).map_err(|err| {
        error!(
            "event=record_load module=persistence status=error identity={} error_code=invalid_payload error={}",
            identity, err
        );
        err.into()
    })
}
