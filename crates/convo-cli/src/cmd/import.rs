use crate::cmd::open_project;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Args;
use convo_core::error::ErrorCode;
use convo_core::model::RawConversation;
use convo_core::store::ConversationStore;
use convo_core::store::sqlite::StoreCounts;
use serde::Serialize;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Newline-delimited JSON file of conversation documents (`-` for stdin).
    #[arg(long, short = 'f')]
    pub file: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectedLine {
    line: usize,
    error_code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportReport {
    imported: usize,
    rejected: Vec<RejectedLine>,
    counts: StoreCounts,
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Parse one document line into a record.
fn parse_line(line: &str) -> Result<convo_core::model::ConversationRecord, RejectedLine> {
    let reject = |message: String| RejectedLine {
        line: 0,
        error_code: ErrorCode::InvalidRecord.code(),
        message,
    };
    let raw: RawConversation =
        serde_json::from_str(line).map_err(|err| reject(format!("malformed JSON: {err}")))?;
    // An empty id is replaced by a generated one on insert.
    raw.into_record(String::new, Utc::now())
        .map_err(|err| reject(err.to_string()))
}

/// Execute `convo import`.
///
/// Every non-blank line is validated through the load-boundary schema.
/// Invalid lines are reported and skipped; a store failure aborts the import.
///
/// # Errors
///
/// Returns an error if the project is not initialized, the input cannot be
/// read, or a record cannot be written.
pub fn run_import(
    args: &ImportArgs,
    output: OutputMode,
    quiet: bool,
    project_root: &Path,
) -> Result<()> {
    let (_cfg, store) = open_project(output, project_root)?;
    let reader = open_input(&args.file)?;

    let mut imported = 0usize;
    let mut rejected = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("Failed to read line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok(record) => {
                let id = store
                    .insert(&record)
                    .with_context(|| format!("Failed to store line {line_no}"))?;
                tracing::debug!(line = line_no, id = %id, "imported conversation");
                imported += 1;
            }
            Err(mut reason) => {
                reason.line = line_no;
                warn!(line = line_no, "rejected document: {}", reason.message);
                rejected.push(reason);
            }
        }
    }

    let counts = store.counts()?;
    info!(imported, rejected = rejected.len(), "import finished");

    let report = ImportReport {
        imported,
        rejected,
        counts,
    };
    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(w, "imported {}", r.imported)?;
            writeln!(w, "rejected {}", r.rejected.len())?;
            for line in &r.rejected {
                writeln!(w, "line {} {} {}", line.line, line.error_code, line.message)?;
            }
            Ok(())
        },
        |r, w| {
            pretty_section(w, "Import")?;
            pretty_kv(w, "Imported", r.imported.to_string())?;
            pretty_kv(w, "Rejected", r.rejected.len().to_string())?;
            pretty_kv(
                w,
                "Store",
                format!(
                    "{} active, {} archived, {} messages",
                    r.counts.active, r.counts.archived, r.counts.messages
                ),
            )?;
            if !quiet && !r.rejected.is_empty() {
                writeln!(w)?;
                for line in &r.rejected {
                    writeln!(w, "  line {:<6} [{}] {}", line.line, line.error_code, line.message)?;
                }
            }
            Ok(())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use convo_core::model::Channel;

    #[test]
    fn legacy_whatsapp_document_parses() {
        let record = parse_line(
            r#"{"id":"c1","phoneNumber":"0531 494 25 94","whatsappMetadata":{"profileName":"Ayse"}}"#,
        )
        .expect("valid document");
        assert_eq!(record.channel, Channel::Whatsapp);
        assert_eq!(record.identity, "0531 494 25 94");
        assert_eq!(record.metadata["profileName"], "Ayse");
    }

    #[test]
    fn malformed_json_is_rejected_with_code() {
        let err = parse_line("{not json").expect_err("must reject");
        assert_eq!(err.error_code, "E2003");
        assert!(err.message.starts_with("malformed JSON"));
    }

    #[test]
    fn missing_identity_is_rejected() {
        let err = parse_line(r#"{"id":"c2","channel":"email"}"#).expect_err("must reject");
        assert!(err.message.contains("identity"));
    }
}
