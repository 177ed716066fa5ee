#![forbid(unsafe_code)]

mod cmd;
mod output;
mod server;

use clap::{Parser, Subcommand};
use output::OutputMode;
use std::env;
use std::io;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "convo: conversation identity and merge engine",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a convo project",
        long_about = "Create .convo/ with a migrated database and a default config.toml.",
        after_help = "EXAMPLES:\n    # Initialize the current directory\n    convo init\n\n    # Emit machine-readable output\n    convo init --json"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Import conversation documents",
        long_about = "Load newline-delimited JSON conversation documents into the store. \
                      Legacy field spellings are accepted; invalid lines are reported.",
        after_help = "EXAMPLES:\n    # Import an export\n    convo import --file conversations.jsonl\n\n    # Emit machine-readable output\n    convo import --file conversations.jsonl --json"
    )]
    Import(cmd::import::ImportArgs),

    #[command(
        next_help_heading = "Inspect",
        about = "Normalize identities",
        long_about = "Print the normalized identity key for each argument, or why it has none.",
        after_help = "EXAMPLES:\n    # Normalize local and international forms\n    convo normalize \"0531 494 25 94\" \"+90 531-494-2594\"\n\n    # Normalize an Instagram handle\n    convo normalize --channel instagram @Ayse.K"
    )]
    Normalize(cmd::normalize::NormalizeArgs),

    #[command(
        next_help_heading = "Migrate",
        about = "Preview duplicate merges",
        long_about = "Dry-run the migration: find duplicate groups and report the planned \
                      merges without writing or taking the run lock.",
        after_help = "EXAMPLES:\n    # Preview everything\n    convo preview\n\n    # Preview the first 500 WhatsApp records\n    convo preview --limit 500 --channel whatsapp\n\n    # Emit machine-readable output\n    convo preview --json"
    )]
    Preview(cmd::migrate::PreviewArgs),

    #[command(
        next_help_heading = "Migrate",
        about = "Merge duplicate conversations",
        long_about = "Merge every duplicate group into its primary conversation. Duplicates \
                      are archived unless --delete is given or the config sets \
                      migration.delete_duplicates (--archive overrides it).",
        after_help = "EXAMPLES:\n    # Merge and archive duplicates\n    convo migrate\n\n    # Merge and delete duplicates on one channel\n    convo migrate --channel instagram --delete\n\n    # Archive for this run even if the config deletes\n    convo migrate --archive\n\n    # Same as preview\n    convo migrate --dry-run"
    )]
    Migrate(cmd::migrate::MigrateArgs),

    #[command(
        next_help_heading = "Migrate",
        about = "Clear a stale run lock",
        long_about = "Force-release the migration run lock, reporting who held it.",
        after_help = "EXAMPLES:\n    # Show the lock holder without clearing it\n    convo unlock --status\n\n    # Clear a lock left by a crashed run\n    convo unlock"
    )]
    Unlock(cmd::unlock::UnlockArgs),

    #[command(
        next_help_heading = "Serve",
        about = "Start the HTTP trigger",
        long_about = "Serve /health and /api/conversations/migrate for the CRM admin UI.",
        after_help = "EXAMPLES:\n    # Serve on the configured address\n    convo serve\n\n    # Serve on all interfaces\n    convo serve --bind 0.0.0.0:8787"
    )]
    Serve(cmd::serve::ServeArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CONVO_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "convo=debug,convo_core=debug,info"
        } else {
            "convo=info,convo_core=info,warn"
        })
    });

    let format = env::var("CONVO_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output; logs go to stderr.
    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = std::env::current_dir()?;
    let output = cli.output_mode();

    match cli.command {
        Commands::Init(ref args) => cmd::init::run_init(args, output, &project_root),
        Commands::Import(ref args) => {
            cmd::import::run_import(args, output, cli.quiet, &project_root)
        }
        Commands::Normalize(ref args) => {
            cmd::normalize::run_normalize(args, output, &project_root)
        }
        Commands::Preview(ref args) => cmd::migrate::run_preview(args, output, &project_root),
        Commands::Migrate(ref args) => cmd::migrate::run_migrate(args, output, &project_root),
        Commands::Unlock(ref args) => cmd::unlock::run_unlock(args, output, &project_root),
        Commands::Serve(ref args) => cmd::serve::run_serve(args, output, &project_root),
    }
}
