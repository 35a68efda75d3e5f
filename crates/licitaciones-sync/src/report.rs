use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::SyncSummary;

pub const SUMMARY_FILE: &str = "sync_summary.json";

/// Writes `<reports_root>/<run_id>/sync_summary.json` and returns its path.
pub async fn write_run_report(reports_root: &Path, summary: &SyncSummary) -> Result<PathBuf> {
    let run_dir = reports_root.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let path = run_dir.join(SUMMARY_FILE);
    let bytes = serde_json::to_vec_pretty(summary).context("serializing sync summary")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;

    Ok(path)
}
