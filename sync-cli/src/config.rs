//! Settings and state loading for sync-cli.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walletsync_client::{HashColorGenerator, SharedState, SqliteStateStorage, SyncSettings};

/// Settings file looked up in the data directory when `--config` is absent.
pub const SETTINGS_FILE: &str = "sync.toml";

/// Get the default data directory for walletsync-cli.
pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "walletsync", "walletsync-cli")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Load settings from `--config`, else `<data_dir>/sync.toml`, else defaults.
pub fn load_settings(config: Option<&Path>, data_dir: &Path) -> Result<SyncSettings> {
    let path = match config {
        Some(path) => path.to_path_buf(),
        None => {
            let candidate = data_dir.join(SETTINGS_FILE);
            if !candidate.exists() {
                return Ok(SyncSettings::default());
            }
            candidate
        }
    };
    SyncSettings::from_file(&path).with_context(|| format!("Invalid settings in {}", path.display()))
}

/// Resolve the database path. Relative paths live in the data directory.
pub fn database_path(settings: &SyncSettings, database: Option<&Path>, data_dir: &Path) -> PathBuf {
    let path = database.unwrap_or(settings.storage.database.as_path());
    if path.is_absolute() || database.is_some() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}

/// Open the state database and load the persisted store.
pub async fn open_state(database: &Path, state_key: &str) -> Result<SharedState> {
    if let Some(parent) = database.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create data directory")?;
    }
    let storage = SqliteStateStorage::open(database, state_key)
        .await
        .with_context(|| format!("Failed to open state database {}", database.display()))?;
    SharedState::load(Arc::new(storage), Arc::new(HashColorGenerator))
        .await
        .context("Persisted sync state is unreadable")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn missing_settings_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let settings = load_settings(None, dir.path()).unwrap();
        assert_eq!(settings.storage.state_key, "nostr-sync-state");
    }

    #[test]
    fn settings_file_in_data_dir_is_picked_up() {
        let dir = tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join(SETTINGS_FILE)).unwrap();
        writeln!(file, "[storage]\nstate_key = \"custom\"").unwrap();

        let settings = load_settings(None, dir.path()).unwrap();
        assert_eq!(settings.storage.state_key, "custom");
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_settings(Some(&dir.path().join("nope.toml")), dir.path()).is_err());
    }

    #[test]
    fn relative_database_lives_in_data_dir() {
        let settings = SyncSettings::default();
        let data_dir = Path::new("/data");
        assert_eq!(
            database_path(&settings, None, data_dir),
            PathBuf::from("/data/walletsync.db")
        );
        assert_eq!(
            database_path(&settings, Some(Path::new("here.db")), data_dir),
            PathBuf::from("here.db")
        );
    }

    #[tokio::test]
    async fn open_state_creates_empty_database() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("nested").join("state.db");
        let state = open_state(&db, "nostr-sync-state").await.unwrap();
        assert!(state.read(|s| s.account_ids().is_empty()));
        assert!(db.exists());
    }
}
