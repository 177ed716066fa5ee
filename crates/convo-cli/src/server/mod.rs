//! HTTP trigger surface for the migration runner.
//!
//! ```text
//! GET  /health                                       liveness
//! GET  /api/conversations/migrate?action=preview     forced dry run
//! POST /api/conversations/migrate                    dry or real run
//! ```
//!
//! Each run executes on the blocking pool against its own [`SqliteStore`]
//! connection; concurrent real runs are serialized by the store's run lock.

pub mod error;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use convo_core::config::ProjectConfig;
use convo_core::model::Channel;
use convo_core::runner::{MigrationReport, MigrationRunner, RunOptions, RunnerSettings};
use convo_core::store::SqliteStore;
use error::ServerError;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// State shared by every handler.
#[derive(Debug)]
pub struct AppState {
    pub db_path: PathBuf,
    pub config: ProjectConfig,
    runs: AtomicU64,
}

impl AppState {
    #[must_use]
    pub const fn new(db_path: PathBuf, config: ProjectConfig) -> Self {
        Self {
            db_path,
            config,
            runs: AtomicU64::new(0),
        }
    }

    fn next_holder(&self) -> String {
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        format!("http:{}:{run}", std::process::id())
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/conversations/migrate",
            get(preview_migration).post(run_migration),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct PreviewQuery {
    action: Option<String>,
    limit: Option<usize>,
}

/// Body of `POST /api/conversations/migrate`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MigrateRequest {
    dry_run: Option<bool>,
    limit: Option<usize>,
    delete_duplicates: Option<bool>,
    collections: Option<Vec<String>>,
}

impl MigrateRequest {
    /// Parse a request body; an empty body means all defaults.
    fn parse(body: &[u8]) -> Result<Self, ServerError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|err| ServerError::BadRequest(format!("malformed request body: {err}")))
    }

    fn into_options(self, config: &ProjectConfig) -> Result<RunOptions, ServerError> {
        let channels = self
            .collections
            .unwrap_or_default()
            .iter()
            .map(|name| {
                name.parse::<Channel>()
                    .map_err(|_| ServerError::BadRequest(format!("unknown collection '{name}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RunOptions {
            dry_run: self.dry_run.unwrap_or(true),
            limit: checked_limit(self.limit, config)?,
            delete_duplicates: self
                .delete_duplicates
                .unwrap_or(config.migration.delete_duplicates),
            channels,
        })
    }
}

fn checked_limit(limit: Option<usize>, config: &ProjectConfig) -> Result<usize, ServerError> {
    match limit {
        Some(0) => Err(ServerError::BadRequest("limit must be at least 1".into())),
        Some(limit) => Ok(limit),
        None => Ok(config.migration.default_limit),
    }
}

async fn preview_migration(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PreviewQuery>, axum::extract::rejection::QueryRejection>,
) -> Result<Json<MigrationReport>, ServerError> {
    let Query(query) = query.map_err(|err| ServerError::BadRequest(err.body_text()))?;
    match query.action.as_deref() {
        Some("preview") => {}
        Some(other) => {
            return Err(ServerError::BadRequest(format!(
                "unsupported action '{other}'; use action=preview or POST"
            )));
        }
        None => {
            return Err(ServerError::BadRequest(
                "missing action; use action=preview or POST".into(),
            ));
        }
    }
    let options = RunOptions::preview(checked_limit(query.limit, &state.config)?);
    execute(state, options).await.map(Json)
}

async fn run_migration(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<MigrationReport>, ServerError> {
    let options = MigrateRequest::parse(&body)?.into_options(&state.config)?;
    execute(state, options).await.map(Json)
}

/// Run on the blocking pool with a fresh store connection.
async fn execute(
    state: Arc<AppState>,
    options: RunOptions,
) -> Result<MigrationReport, ServerError> {
    let holder = state.next_holder();
    info!(
        holder = %holder,
        dry_run = options.dry_run,
        limit = options.limit,
        "migration requested"
    );
    tokio::task::spawn_blocking(move || -> Result<MigrationReport, ServerError> {
        let store = SqliteStore::open(&state.db_path)?;
        let settings = RunnerSettings::from_config(&state.config, holder)?;
        Ok(MigrationRunner::new(&store, settings).run(&options)?)
    })
    .await
    .map_err(|err| ServerError::Internal(format!("migration worker failed: {err}")))?
}
