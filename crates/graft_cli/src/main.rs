//! Graft CLI - Command-line interface for checking bridge metadata.

use clap::{Parser, Subcommand};
use console::style;
use graft_core::GraftError;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(name = "graft")]
#[command(about = "Consistency checks for bridged version control history", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new graft repository
    Init,
    /// Check bridge metadata consistency
    Fsck {
        /// Validate manifest hashes
        #[arg(long)]
        manifests: bool,
        /// Validate file hashes
        #[arg(long)]
        files: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Specific commits, changesets or refs to check
        revisions: Vec<String>,
    },
    /// Compute and apply binary deltas
    Delta {
        #[command(subcommand)]
        command: DeltaCommands,
    },
}

#[derive(Subcommand)]
enum DeltaCommands {
    /// Write the delta turning OLD into NEW
    Encode {
        /// Original content
        old: PathBuf,
        /// Updated content
        new: PathBuf,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Apply DELTA to BASE
    Apply {
        /// Content the delta was computed against
        base: PathBuf,
        /// Delta file
        delta: PathBuf,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    // Respects RUST_LOG (e.g., RUST_LOG=graft_core=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Fsck {
            manifests,
            files,
            json,
            revisions,
        } => commands::fsck::run(revisions, manifests, files, json),
        Commands::Delta { command } => match command {
            DeltaCommands::Encode { old, new, output } => {
                commands::delta::encode(&old, &new, output.as_deref())
            }
            DeltaCommands::Apply {
                base,
                delta,
                output,
            } => commands::delta::apply(&base, &delta, output.as_deref()),
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            if let Some(hint) = e
                .downcast_ref::<GraftError>()
                .and_then(GraftError::recovery_suggestion)
            {
                eprintln!("  {} {}", style("→").cyan(), hint);
            }
            ExitCode::from(1)
        }
    }
}
