//! The SQLite file behind [`crate::store::SqliteStore`].
//!
//! Every connection, on disk or in memory, goes through [`prepare`]: it
//! checks the file belongs to convo, sets the pragmas the store relies on
//! (WAL, a busy timeout, cascading foreign keys) and upgrades the schema.

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// How long a writer waits on another connection's write before failing.
/// The HTTP surface and the CLI can share one store file.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `PRAGMA application_id` stamped on every store file (`"CONV"`).
pub const APPLICATION_ID: i32 = 0x434F_4E56;

/// Open the store at `path`, creating `.convo/` and the file on first use.
///
/// # Errors
///
/// Returns an error if the file cannot be opened, belongs to another
/// application, or cannot be brought to the current schema.
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create store directory {}", dir.display()))?;
    }
    let mut conn = Connection::open(path)
        .with_context(|| format!("open conversation store {}", path.display()))?;
    prepare(&mut conn).with_context(|| format!("prepare conversation store {}", path.display()))?;
    Ok(conn)
}

/// Fresh in-memory store, used by tests.
///
/// # Errors
///
/// Returns an error if the schema cannot be created.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory store")?;
    prepare(&mut conn)?;
    Ok(conn)
}

fn prepare(conn: &mut Connection) -> Result<()> {
    let stamped: i32 = conn.pragma_query_value(None, "application_id", |row| row.get(0))?;
    match stamped {
        0 => conn.pragma_update(None, "application_id", APPLICATION_ID)?,
        APPLICATION_ID => {}
        other => bail!("not a convo store (application_id {other:#x})"),
    }

    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    // journal_mode answers with a row, so it cannot go through pragma_update.
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    tracing::debug!(journal_mode = %mode, "store connection configured");
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;

    migrations::migrate(conn)?;
    Ok(())
}
