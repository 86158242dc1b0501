//! Record store database: connection setup and schema upgrades.
//!
//! Every connection handed out by [`open_db`] or [`open_db_in_memory`] is
//! already on the newest schema this build knows; persistence code never
//! sees a half-migrated file.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The file was upgraded by a newer build; refusing to touch it.
    SchemaTooNew { found: u32, known: u32 },
    /// A schema step failed; nothing from the batch was committed.
    Upgrade { step: u32, source: rusqlite::Error },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::SchemaTooNew { found, known } => write!(
                f,
                "record database is at schema v{found}, this build only knows up to v{known}"
            ),
            Self::Upgrade { step, source } => {
                write!(f, "record database upgrade to v{step} failed: {source}")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::Upgrade { source: err, .. } => Some(err),
            Self::SchemaTooNew { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
