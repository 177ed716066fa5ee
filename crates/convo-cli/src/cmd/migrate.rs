use crate::cmd::open_project;
use crate::output::{
    CliError, OutputMode, pretty_kv, pretty_rule, pretty_section, render_error, render_mode,
};
use anyhow::Result;
use clap::Args;
use convo_core::model::Channel;
use convo_core::runner::{
    ErrorKind, GroupStatus, MigrationError, MigrationReport, MigrationRunner, RunOptions,
    RunnerSettings,
};
use std::io::{self, Write};
use std::path::Path;

#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// Maximum number of conversations to load (default: `migration.default_limit`).
    #[arg(long)]
    pub limit: Option<usize>,

    /// Only consider this channel (repeatable; default: all channels).
    #[arg(long)]
    pub channel: Vec<Channel>,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Maximum number of conversations to load (default: `migration.default_limit`).
    #[arg(long)]
    pub limit: Option<usize>,

    /// Only consider this channel (repeatable; default: all channels).
    #[arg(long)]
    pub channel: Vec<Channel>,

    /// Delete duplicates instead of archiving them.
    #[arg(long, conflicts_with = "archive")]
    pub delete: bool,

    /// Archive duplicates even when `migration.delete_duplicates` is set.
    #[arg(long)]
    pub archive: bool,

    /// Plan only; same as `convo preview`.
    #[arg(long)]
    pub dry_run: bool,
}

impl MigrateArgs {
    /// Discard mode for this run: an explicit flag wins over the config.
    #[must_use]
    pub const fn delete_duplicates(&self, configured: bool) -> bool {
        if self.delete {
            true
        } else if self.archive {
            false
        } else {
            configured
        }
    }
}

/// Execute `convo preview`.
///
/// # Errors
///
/// Returns an error if the project is not initialized or loading fails.
pub fn run_preview(args: &PreviewArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    execute(output, project_root, |cfg| RunOptions {
        channels: args.channel.clone(),
        ..RunOptions::preview(args.limit.unwrap_or(cfg.migration.default_limit))
    })
}

/// Execute `convo migrate`.
///
/// Group failures are reported, not fatal: the command succeeds once the run
/// completes, even partially.
///
/// # Errors
///
/// Returns an error if the project is not initialized, another run holds the
/// lock, or loading fails.
pub fn run_migrate(args: &MigrateArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    execute(output, project_root, |cfg| RunOptions {
        dry_run: args.dry_run,
        limit: args.limit.unwrap_or(cfg.migration.default_limit),
        delete_duplicates: args.delete_duplicates(cfg.migration.delete_duplicates),
        channels: args.channel.clone(),
    })
}

fn execute(
    output: OutputMode,
    project_root: &Path,
    options: impl FnOnce(&convo_core::config::ProjectConfig) -> RunOptions,
) -> Result<()> {
    let (cfg, store) = open_project(output, project_root)?;
    let options = options(&cfg);
    let settings = RunnerSettings::from_config(&cfg, format!("cli:{}", std::process::id()))?;

    match MigrationRunner::new(&store, settings).run(&options) {
        Ok(report) => render_report(output, &report),
        Err(err) => {
            if let MigrationError::Load { report, .. } = &err
                && !output.is_json()
            {
                // Pretty/text still show how far the load got.
                write_text(&mut io::stderr().lock(), report)?;
            }
            let mut cli = CliError::from(&err);
            if let Some(report) = err.report() {
                cli.message = format!(
                    "{} (after {} records scanned)",
                    cli.message, report.records_scanned
                );
            }
            render_error(output, &cli)?;
            Err(err.into())
        }
    }
}

fn render_report(output: OutputMode, report: &MigrationReport) -> Result<()> {
    render_mode(output, report, |r, w| write_text(w, r), |r, w| write_pretty(w, r))
}

fn write_text(w: &mut dyn Write, r: &MigrationReport) -> io::Result<()> {
    writeln!(
        w,
        "{} scanned={} groups={} merged={} failed={} messages={} archived={} deleted={} unmatched={}",
        if r.dry_run { "preview" } else { "migrate" },
        r.records_scanned,
        r.groups_found,
        r.groups_merged,
        r.groups_failed,
        r.messages_merged,
        r.records_archived,
        r.records_deleted,
        r.unmatched.len(),
    )?;
    for group in &r.groups {
        writeln!(
            w,
            "{} {} primary={} discard={} +{}",
            status_label(group.status),
            group.group_key,
            group.primary_id.as_deref().unwrap_or("-"),
            group.discarded_ids.join(","),
            group.appended_message_count,
        )?;
    }
    for error in &r.errors {
        writeln!(
            w,
            "error {} {} {}",
            error.group_key,
            kind_label(error.kind),
            error.message
        )?;
    }
    Ok(())
}

fn write_pretty(w: &mut dyn Write, r: &MigrationReport) -> io::Result<()> {
    pretty_section(
        w,
        if r.dry_run {
            "Migration preview (dry run)"
        } else {
            "Migration run"
        },
    )?;
    pretty_kv(w, "Scanned", r.records_scanned.to_string())?;
    pretty_kv(w, "Groups", r.groups_found.to_string())?;
    if !r.dry_run {
        pretty_kv(w, "Merged", r.groups_merged.to_string())?;
        pretty_kv(w, "Failed", r.groups_failed.to_string())?;
    }
    let verb = if r.dry_run { "would be " } else { "" };
    pretty_kv(w, "Messages", format!("{} {verb}appended", r.messages_merged))?;
    pretty_kv(
        w,
        "Duplicates",
        format!(
            "{} {verb}archived, {} {verb}deleted",
            r.records_archived, r.records_deleted
        ),
    )?;
    pretty_kv(w, "Unmatched", r.unmatched.len().to_string())?;

    if !r.groups.is_empty() {
        writeln!(w)?;
        for group in &r.groups {
            writeln!(
                w,
                "  [{:<7}] {}  keep {}  drop {}  (+{} messages)",
                status_label(group.status),
                group.group_key,
                group.primary_id.as_deref().unwrap_or("-"),
                group.discarded_ids.join(", "),
                group.appended_message_count,
            )?;
            if let Some(error) = &group.error {
                writeln!(w, "            {error}")?;
            }
        }
    }

    if !r.unmatched.is_empty() {
        writeln!(w)?;
        writeln!(w, "Unmatched records")?;
        pretty_rule(w)?;
        for record in &r.unmatched {
            writeln!(
                w,
                "  {:<24} {:<10} [{}] {}",
                record.record_id,
                record.channel.as_str(),
                record.error_code,
                record.reason
            )?;
        }
    }
    Ok(())
}

const fn status_label(status: GroupStatus) -> &'static str {
    match status {
        GroupStatus::Planned => "planned",
        GroupStatus::Merged => "merged",
        GroupStatus::Failed => "failed",
    }
}

const fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Normalization => "normalization",
        ErrorKind::Planning => "planning",
        ErrorKind::GroupMerge => "group_merge",
        ErrorKind::Lock => "lock",
    }
}
