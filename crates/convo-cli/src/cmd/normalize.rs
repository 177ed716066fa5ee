use crate::output::{CliError, OutputMode, render, render_error};
use anyhow::Result;
use clap::Args;
use convo_core::config;
use convo_core::model::Channel;
use convo_core::normalize::{IdentityNormalizer, PhoneNormalizer};
use serde::Serialize;
use std::path::Path;

#[derive(Args, Debug)]
pub struct NormalizeArgs {
    /// Raw identities to normalize.
    #[arg(required = true)]
    pub values: Vec<String>,

    /// Channel whose identity rules apply.
    #[arg(long, short = 'c', default_value = "whatsapp")]
    pub channel: Channel,

    /// Country code for numbers written without one (overrides config).
    #[arg(long)]
    pub country_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Normalized {
    input: String,
    channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
}

fn normalize_all(
    normalizer: &IdentityNormalizer,
    channel: Channel,
    values: &[String],
) -> Vec<Normalized> {
    values
        .iter()
        .map(|raw| match normalizer.normalize(channel, raw) {
            Ok(key) => Normalized {
                input: raw.clone(),
                channel,
                key: Some(key),
                error: None,
                error_code: None,
            },
            Err(err) => Normalized {
                input: raw.clone(),
                channel,
                key: None,
                error: Some(err.to_string()),
                error_code: Some(err.code().code()),
            },
        })
        .collect()
}

/// Execute `convo normalize`. Works outside an initialized project; inside
/// one, the configured default country code applies.
///
/// # Errors
///
/// Returns an error if the country code is invalid or any value fails to
/// normalize (after printing every result).
pub fn run_normalize(args: &NormalizeArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let phone = match &args.country_code {
        Some(code) => match PhoneNormalizer::new(code) {
            Ok(phone) => phone,
            Err(err) => {
                render_error(output, &CliError::from_code(err.code(), err.to_string()))?;
                anyhow::bail!("{err}");
            }
        },
        None => config::load_project_config(project_root)?.phone_normalizer()?,
    };

    let results = normalize_all(&IdentityNormalizer::new(phone), args.channel, &args.values);
    let failed = results.iter().filter(|r| r.key.is_none()).count();

    render(output, &results, |items, w| {
        for item in items {
            match (&item.key, &item.error) {
                (Some(key), _) => writeln!(w, "{key}\t{}", item.input)?,
                (None, Some(error)) => writeln!(w, "!\t{}\t{error}", item.input)?,
                (None, None) => {}
            }
        }
        Ok(())
    })?;

    if failed > 0 {
        anyhow::bail!("{failed} of {} values could not be normalized", results.len());
    }
    Ok(())
}
