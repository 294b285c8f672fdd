//! Show sync status.

use anyhow::Result;
use std::fmt::Write;
use walletsync_client::SharedState;
use walletsync_core::SyncStateStore;

/// Run the status command.
pub fn run(state: &SharedState) -> Result<()> {
    print!("{}", state.read(render));
    Ok(())
}

/// Render the per-account summary.
pub fn render(store: &SyncStateStore) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== walletsync status ===");
    let _ = writeln!(out);

    let accounts = store.account_ids();
    if accounts.is_empty() {
        let _ = writeln!(out, "No accounts have sync state.");
    }

    for id in &accounts {
        let _ = writeln!(out, "Account {}:", id);
        let _ = writeln!(out, "  Members:          {}", store.get_members(id).len());
        let _ = writeln!(out, "  Trusted devices:  {}", store.get_trusted_devices(id).len());
        let _ = writeln!(out, "  Processed msgs:   {}", store.get_processed_message_ids(id).len());
        let _ = writeln!(out, "  Processed events: {}", store.get_processed_events(id).len());
        let _ = writeln!(
            out,
            "  Protocol EOSE:    {}",
            format_checkpoint(store.get_last_protocol_eose(id))
        );
        let _ = writeln!(
            out,
            "  Data EOSE:        {}",
            format_checkpoint(store.get_last_data_exchange_eose(id))
        );
        let _ = writeln!(out);
    }

    let pending = if store.transaction_to_share.is_some() {
        "1 transaction waiting to be shared"
    } else {
        "empty"
    };
    let _ = writeln!(out, "Outbound mailbox: {}", pending);
    out
}

/// Format a checkpoint as its timestamp plus a rough age.
fn format_checkpoint(ts: Option<u64>) -> String {
    match ts {
        Some(ts) => format!("{} ({})", ts, format_age(ts)),
        None => "never".to_string(),
    }
}

/// Format a Unix timestamp as a human-readable age.
fn format_age(ts: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let diff = now.saturating_sub(ts);

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletsync_types::{AccountId, TransactionToShare};

    #[test]
    fn empty_store() {
        let out = render(&SyncStateStore::new());
        assert!(out.contains("No accounts have sync state."));
        assert!(out.contains("Outbound mailbox: empty"));
    }

    #[test]
    fn summarizes_each_account() {
        let mut store = SyncStateStore::new();
        let vault = AccountId::from("vault");
        store.add_member(&vault, "npub1a", "#112233");
        store.add_member(&vault, "npub1b", "#445566");
        store.add_processed_message_id(&vault, "m1");
        store.add_processed_event(&vault, "e1");
        store.add_processed_event(&vault, "e2");
        store.set_last_protocol_eose(&vault, 1_700_000_000);
        store.set_transaction_to_share(Some(TransactionToShare::new("sign", "cHNidP8B")));

        let out = render(&store);
        assert!(out.contains("Account vault:"));
        assert!(out.contains("Members:          2"));
        assert!(out.contains("Processed events: 2"));
        assert!(out.contains("Protocol EOSE:    1700000000 ("));
        assert!(out.contains("Data EOSE:        never"));
        assert!(out.contains("1 transaction waiting to be shared"));
    }

    #[test]
    fn format_age_works() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();

        assert_eq!(format_age(now), "just now");
        assert!(format_age(now - 120).contains("minutes"));
        assert!(format_age(now - 7200).contains("hours"));
        assert!(format_age(now - 172800).contains("days"));
    }
}
