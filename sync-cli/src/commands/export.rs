//! Write a snapshot backup.

use anyhow::{Context, Result};
use std::path::Path;
use walletsync_client::SharedState;

/// Run the export command.
pub async fn run(state: &SharedState, file: &Path) -> Result<()> {
    let snapshot: serde_json::Value = serde_json::from_str(&state.export_snapshot()?)?;
    let contents = serde_json::to_string_pretty(&snapshot)?;
    tokio::fs::write(file, contents)
        .await
        .with_context(|| format!("Failed to write {}", file.display()))?;
    println!("Exported sync state to {}", file.display());
    Ok(())
}
