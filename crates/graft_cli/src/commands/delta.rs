//! Binary delta commands.

use anyhow::{Context, Result};
use graft_core::delta;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use tracing::debug;

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn write_output(output: Option<&Path>, data: &[u8]) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(data)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

/// Write the delta turning `old` into `new`.
pub fn encode(old: &Path, new: &Path, output: Option<&Path>) -> Result<ExitCode> {
    let a = read(old)?;
    let b = read(new)?;
    let patch = delta::encode(&a, &b).context("Failed to encode delta")?;
    debug!(
        old = a.len(),
        new = b.len(),
        delta = patch.len(),
        hunks = delta::hunks(&patch).count(),
        "encoded delta"
    );
    write_output(output, &patch)?;
    Ok(ExitCode::SUCCESS)
}

/// Apply `delta_path` to `base`.
pub fn apply(base: &Path, delta_path: &Path, output: Option<&Path>) -> Result<ExitCode> {
    let a = read(base)?;
    let patch = read(delta_path)?;
    let result = delta::apply(&a, &patch)
        .with_context(|| format!("Failed to apply {}", delta_path.display()))?;
    write_output(output, &result)?;
    Ok(ExitCode::SUCCESS)
}
