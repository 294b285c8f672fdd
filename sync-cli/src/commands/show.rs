//! Print one account's state.

use anyhow::{bail, Result};
use walletsync_client::SharedState;
use walletsync_core::SyncStateStore;
use walletsync_types::AccountId;

/// Run the show command.
pub fn run(state: &SharedState, account: &str) -> Result<()> {
    let account_id = AccountId::new(account)?;
    println!("{}", state.read(|store| render(store, &account_id))?);
    Ok(())
}

/// Pretty JSON for one account.
pub fn render(store: &SyncStateStore, account_id: &AccountId) -> Result<String> {
    let Some(account) = store.account(account_id) else {
        bail!("No sync state for account {}", account_id);
    };
    Ok(serde_json::to_string_pretty(account)?)
}
