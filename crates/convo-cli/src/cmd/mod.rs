pub mod import;
pub mod init;
pub mod migrate;
pub mod normalize;
pub mod serve;
pub mod unlock;

use crate::output::{CliError, OutputMode, render_error};
use convo_core::config::{self, ProjectConfig};
use convo_core::error::ErrorCode;
use convo_core::store::SqliteStore;
use std::path::Path;

/// Load the project config and open its store, rendering a structured error
/// when the directory was never initialized or the config is broken.
pub(crate) fn open_project(
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<(ProjectConfig, SqliteStore)> {
    let db_path = config::db_path(project_root);
    if !db_path.exists() {
        let msg = format!("no convo project at {}", project_root.display());
        render_error(output, &CliError::from_code(ErrorCode::NotInitialized, &msg))?;
        anyhow::bail!("{msg}");
    }

    let cfg = match config::load_project_config(project_root) {
        Ok(cfg) => cfg,
        Err(err) => {
            let msg = format!("{err:#}");
            render_error(output, &CliError::from_code(ErrorCode::ConfigParseError, &msg))?;
            return Err(err);
        }
    };

    let store = SqliteStore::open(&db_path)?;
    Ok((cfg, store))
}
