//! Bridge consistency check command.

use anyhow::Result;
use console::style;
use graft_core::{CheckStatus, GraftRepo, VerifyConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;

/// Check bridge metadata and exit with 0 (clean), 2 (fixed) or 1 (broken).
pub fn run(revisions: Vec<String>, manifests: bool, files: bool, json: bool) -> Result<ExitCode> {
    let mut repo = GraftRepo::open(".")?;

    let config = VerifyConfig {
        revisions,
        check_manifests: manifests,
        check_files: files,
    };

    let pb = if json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message("Reading metadata...");
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let progress = |phase: &str, done: usize| pb.set_message(format!("{}: {}", phase, done));
    let result = repo.fsck_with_progress(&config, &progress);
    pb.finish_and_clear();
    let report = result?;

    if json {
        println!("{}", report.to_json()?);
        return Ok(ExitCode::from(report.status().exit_code()));
    }

    println!("{}", style("Fsck Report:").bold());
    println!("  Commits checked:    {}", style(report.commits_checked).cyan());
    println!("  Changesets checked: {}", style(report.changesets_checked).cyan());
    println!("  Manifests checked:  {}", style(report.manifests_checked).cyan());
    if config.check_files || repo.config().fsck.check_files || report.files_checked > 0 {
        println!("  Files checked:      {}", style(report.files_checked).cyan());
    }
    if report.upgraded_files > 0 {
        println!("  Files upgraded:     {}", style(report.upgraded_files).cyan());
    }

    if !report.findings.is_empty() {
        println!();
        println!("{}", style("Findings:").bold());
        for finding in &report.findings {
            if finding.is_integrity() {
                println!("  {} {}", style("×").red(), finding);
            } else {
                println!("  {} {}", style("⚠").yellow(), finding);
            }
        }
    }

    if !report.fixes.is_empty() {
        println!();
        println!("{}", style("Repairs:").bold());
        for fix in &report.fixes {
            println!("  {} {}", style("✓").green(), fix);
        }
    }

    println!();
    match report.status() {
        CheckStatus::Clean => {
            println!("{} {}", style("✓").green(), style(report.summary()).green())
        }
        CheckStatus::Fixed => println!("{}", style(report.summary()).yellow().bold()),
        CheckStatus::Broken => println!("{}", style(report.summary()).red().bold()),
    }

    Ok(ExitCode::from(report.status().exit_code()))
}
