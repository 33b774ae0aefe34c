//! Initialize a new graft repository.

use anyhow::{Context, Result};
use graft_core::{GraftRepo, METADATA_VERSION};
use std::process::ExitCode;

/// Initialize a new graft repository in the current directory.
pub fn run() -> Result<ExitCode> {
    let repo = GraftRepo::init(".").context("Failed to initialize graft repository")?;

    println!("Initialized graft repository in .graft/");
    println!();
    println!("Directory structure:");
    println!("  .graft/objects/        - Target objects (zstd, sharded)");
    println!("  .graft/refs/           - Target refs");
    println!("  .graft/metadata.redb   - Bridge metadata (format {})", METADATA_VERSION);
    println!();
    println!(
        "Configuration written to {}",
        repo.graft_dir().join("config.toml").display()
    );

    Ok(ExitCode::SUCCESS)
}
