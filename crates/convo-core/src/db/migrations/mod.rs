//! Schema upgrades for `.convo/convo.db`.
//!
//! The version lives in `PRAGMA user_version` and is mirrored into
//! `store_meta.schema_version` so operators can read it with plain SQL.
//! A store written by a newer `convo` is refused rather than downgraded.

use super::schema;
use rusqlite::{Connection, types::Type};
use thiserror::Error;
use tracing::info;

/// One forward-only schema step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaStep {
    pub version: u32,
    pub name: &'static str,
    sql: &'static str,
}

pub const STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "conversations and messages",
        sql: schema::MIGRATION_V1_SQL,
    },
    SchemaStep {
        version: 2,
        name: "scan indexes and run lock",
        sql: schema::MIGRATION_V2_SQL,
    },
];

/// Schema version this build writes.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("store schema v{found} is newer than this convo build (v{supported}); upgrade convo")]
    TooNew { found: u32, supported: u32 },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Version recorded in `PRAGMA user_version`; 0 for a fresh file.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read or is negative.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(err)))
}

/// Steps not yet applied to a store at `version`.
#[must_use]
pub fn pending_steps(version: u32) -> impl Iterator<Item = &'static SchemaStep> {
    STEPS.iter().filter(move |step| step.version > version)
}

/// Bring the store up to [`LATEST_SCHEMA_VERSION`], one transaction per step.
/// Returns the resulting version.
///
/// # Errors
///
/// Returns [`SchemaError::TooNew`] for a store from a newer build, or the
/// SQLite error of the step that failed (earlier steps stay applied).
pub fn migrate(conn: &mut Connection) -> Result<u32, SchemaError> {
    let found = current_schema_version(conn)?;
    if found > LATEST_SCHEMA_VERSION {
        return Err(SchemaError::TooNew {
            found,
            supported: LATEST_SCHEMA_VERSION,
        });
    }

    let mut version = found;
    for step in pending_steps(found) {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", i64::from(step.version))?;
        tx.execute(
            "UPDATE store_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(step.version)],
        )?;
        tx.commit()?;
        info!(version = step.version, step = step.name, "store schema upgraded");
        version = step.version;
    }
    Ok(version)
}
