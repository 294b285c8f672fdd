//! Restore a snapshot backup.

use anyhow::{Context, Result};
use std::path::Path;
use walletsync_client::SharedState;

/// Run the import command.
///
/// The backup is validated before anything is replaced.
pub async fn run(state: &SharedState, file: &Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    state
        .import_snapshot(&contents)
        .await
        .with_context(|| format!("Rejected backup {}", file.display()))?;
    let accounts = state.read(|s| s.account_ids().len());
    println!("Imported sync state for {} account(s) from {}", accounts, file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;
    use walletsync_client::{HashColorGenerator, MemoryStateStorage};
    use walletsync_types::AccountId;

    fn state() -> SharedState {
        SharedState::new(
            Arc::new(MemoryStateStorage::new()),
            Arc::new(HashColorGenerator),
        )
    }

    #[tokio::test]
    async fn imports_valid_backup() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("backup.json");
        std::fs::write(
            &file,
            r#"{"version":1,"accounts":{"vault":{"processedEvents":["e1","e1"]}}}"#,
        )
        .unwrap();

        let state = state();
        run(&state, &file).await.unwrap();
        assert_eq!(
            state.read(|s| s.get_processed_events(&AccountId::from("vault")).len()),
            1
        );
    }

    #[tokio::test]
    async fn rejects_invalid_backup_and_keeps_state() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("backup.json");
        std::fs::write(&file, r#"{"version":1,"accounts":{"vault":{"members":[{"npub":1}]}}}"#)
            .unwrap();

        let state = state();
        state.update(|s| s.add_trusted_device(&AccountId::from("keep"), "npub1dev"));

        let err = run(&state, &file).await.unwrap_err();
        assert!(format!("{:#}", err).contains("members[0]"));
        assert!(state.read(|s| s.account(&AccountId::from("keep")).is_some()));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(run(&state(), &dir.path().join("nope.json")).await.is_err());
    }
}
