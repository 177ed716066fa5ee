use crate::cmd::open_project;
use crate::output::OutputMode;
use crate::server::{self, AppState};
use anyhow::{Context as _, Result};
use clap::Args;
use convo_core::config;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (default: `CONVO_BIND`, then `server.bind`).
    #[arg(long)]
    pub bind: Option<String>,
}

/// Execute `convo serve`. Blocks until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the project is not initialized, the address cannot be
/// bound, or the server fails.
pub fn run_serve(args: &ServeArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    // Fail before binding if the store is missing or cannot be migrated.
    let (cfg, store) = open_project(output, project_root)?;
    drop(store);

    let bind = args
        .bind
        .clone()
        .unwrap_or_else(|| cfg.resolve_bind(std::env::var(config::BIND_ENV).ok()));
    let state = Arc::new(AppState::new(config::db_path(project_root), cfg));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    runtime.block_on(async move {
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("Failed to bind {bind}"))?;
        server::serve(listener, state).await
    })
}
