use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::{Context as _, Result};
use clap::Args;
use convo_core::config;
use convo_core::db::migrations;
use convo_core::store::{SqliteStore, sqlite::StoreCounts};
use serde::Serialize;
use std::path::Path;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing `.convo/config.toml` with the defaults.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitReport {
    project_dir: String,
    database: String,
    schema_version: u32,
    config_written: bool,
    counts: StoreCounts,
}

/// Execute `convo init`. Creates, or brings up to date:
///
/// ```text
/// .convo/
///   convo.db      (migrated SQLite store)
///   config.toml   (default project config, kept if present)
/// ```
///
/// Running it again is safe: the database is only migrated forward and an
/// existing config is left alone unless `--force` is given.
///
/// # Errors
///
/// Returns an error if any filesystem or database operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project_dir = config::project_dir(project_root);
    std::fs::create_dir_all(&project_dir)
        .with_context(|| format!("Failed to create {}", project_dir.display()))?;

    if args.force {
        let path = config::config_path(project_root);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    let config_written = config::write_default_project_config(project_root)?;

    let db_path = config::db_path(project_root);
    let store = SqliteStore::open(&db_path)?;
    let schema_version = migrations::current_schema_version(store.connection())
        .context("Failed to read schema version")?;
    let counts = store.counts()?;

    tracing::info!(
        db = %db_path.display(),
        schema_version,
        config_written,
        "project initialized"
    );

    let report = InitReport {
        project_dir: project_dir.display().to_string(),
        database: db_path.display().to_string(),
        schema_version,
        config_written,
        counts,
    };

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(w, "initialized {}", r.project_dir)?;
            writeln!(w, "schema_version {}", r.schema_version)?;
            writeln!(w, "config_written {}", r.config_written)
        },
        |r, w| {
            pretty_section(w, "Initialized convo project")?;
            pretty_kv(w, "Database", &r.database)?;
            pretty_kv(w, "Schema", format!("v{}", r.schema_version))?;
            pretty_kv(
                w,
                "Config",
                if r.config_written {
                    "written with defaults"
                } else {
                    "kept existing"
                },
            )?;
            pretty_kv(
                w,
                "Conversations",
                format!("{} active, {} archived", r.counts.active, r.counts.archived),
            )?;
            writeln!(w)?;
            writeln!(w, "Next steps:")?;
            writeln!(w, "  convo import --file conversations.jsonl")?;
            writeln!(w, "  convo preview")
        },
    )
}
