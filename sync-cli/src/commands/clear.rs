//! Reset one account's sync state.

use anyhow::{Context, Result};
use walletsync_client::SharedState;
use walletsync_types::AccountId;

/// Run the clear command.
pub async fn run(state: &SharedState, account: &str) -> Result<()> {
    let account_id = AccountId::new(account)?;
    if state.read(|s| s.account(&account_id).is_none()) {
        println!("No sync state for account {}; nothing to clear.", account_id);
        return Ok(());
    }
    state
        .clear_nostr_state(&account_id)
        .await
        .context("Failed to persist cleared state")?;
    println!("Cleared sync state for account {}.", account_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use walletsync_client::{HashColorGenerator, MemoryStateStorage};

    #[tokio::test]
    async fn clears_only_the_named_account() {
        let storage = Arc::new(MemoryStateStorage::new());
        let state = SharedState::new(storage.clone(), Arc::new(HashColorGenerator));
        state.update(|s| {
            s.add_processed_event(&AccountId::from("a"), "e1");
            s.add_processed_event(&AccountId::from("b"), "e1");
        });

        run(&state, "a").await.unwrap();

        assert!(state.read(|s| s.get_processed_events(&AccountId::from("a")).is_empty()));
        assert_eq!(state.read(|s| s.get_processed_events(&AccountId::from("b")).len()), 1);
        assert_eq!(storage.save_count(), 1);
    }

    #[tokio::test]
    async fn unknown_account_is_a_noop() {
        let storage = Arc::new(MemoryStateStorage::new());
        let state = SharedState::new(storage.clone(), Arc::new(HashColorGenerator));
        run(&state, "ghost").await.unwrap();
        assert_eq!(storage.save_count(), 0);
    }

    #[tokio::test]
    async fn blank_account_is_rejected() {
        let state = SharedState::new(
            Arc::new(MemoryStateStorage::new()),
            Arc::new(HashColorGenerator),
        );
        assert!(run(&state, "  ").await.is_err());
    }
}
