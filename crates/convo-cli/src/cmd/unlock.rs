use crate::cmd::open_project;
use crate::output::{CliError, OutputMode, pretty_kv, pretty_section, render_error, render_mode};
use anyhow::Result;
use chrono::Utc;
use clap::Args;
use convo_core::store::{ConversationStore, LockInfo};
use serde::Serialize;
use std::path::Path;
use tracing::warn;

#[derive(Args, Debug)]
pub struct UnlockArgs {
    /// Only report the current holder; do not release.
    #[arg(long)]
    pub status: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnlockReport {
    released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock: Option<LockInfo>,
    expired: bool,
}

/// Execute `convo unlock`.
///
/// # Errors
///
/// Returns an error if the project is not initialized or the lock row cannot
/// be read or cleared.
pub fn run_unlock(args: &UnlockArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let (_cfg, store) = open_project(output, project_root)?;

    let result = if args.status {
        store.lock_status()
    } else {
        store.force_release_lock()
    };
    let lock = match result {
        Ok(lock) => lock,
        Err(err) => {
            render_error(output, &CliError::from_code(err.code(), err.to_string()))?;
            return Err(err.into());
        }
    };

    let expired = lock.as_ref().is_some_and(|info| info.is_expired(Utc::now()));
    let released = !args.status && lock.is_some();
    if released
        && !expired
        && let Some(info) = &lock
    {
        warn!(holder = %info.holder, "force-released a live migration lock");
    }

    let report = UnlockReport {
        released,
        lock,
        expired,
    };
    render_mode(
        output,
        &report,
        |r, w| match &r.lock {
            Some(info) => writeln!(
                w,
                "{} {} expires_at={}{}",
                if r.released { "released" } else { "held" },
                info.holder,
                info.expires_at.to_rfc3339(),
                if r.expired { " expired" } else { "" }
            ),
            None => writeln!(w, "unlocked"),
        },
        |r, w| {
            pretty_section(w, "Run lock")?;
            match &r.lock {
                Some(info) => {
                    pretty_kv(w, "Holder", &info.holder)?;
                    pretty_kv(w, "Acquired", info.acquired_at.to_rfc3339())?;
                    pretty_kv(
                        w,
                        "Expires",
                        format!(
                            "{}{}",
                            info.expires_at.to_rfc3339(),
                            if r.expired { " (expired)" } else { "" }
                        ),
                    )?;
                    pretty_kv(w, "State", if r.released { "released" } else { "held" })
                }
                None => pretty_kv(w, "State", "not held"),
            }
        },
    )
}
