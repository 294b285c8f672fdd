//! Envelope opening.
//!
//! Decryption and decoding of relay events is delegated to an
//! [`EnvelopeOpener`]. The orchestrator only cares about the outcome: a
//! [`DecryptedMessage`] to hand to the processor, or an [`OpenError`] that
//! marks the event as handled and moves on.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use walletsync_types::{AccountConfig, DecryptedMessage, Envelope};

/// Why an envelope could not be opened.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The envelope does not have the expected shape.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// The envelope is addressed to someone else.
    #[error("envelope not addressed to this account")]
    NotForUs,

    /// Decryption failed.
    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// Turns relay envelopes into decrypted messages for one account.
#[async_trait]
pub trait EnvelopeOpener: Send + Sync {
    /// Open `envelope` with `account`'s keys.
    async fn open(
        &self,
        account: &AccountConfig,
        envelope: &Envelope,
    ) -> Result<DecryptedMessage, OpenError>;
}

/// Opener for testing.
///
/// Treats envelope content as plaintext JSON
/// `{"id": ..., "sender": ..., "body": ...}`. An optional `"to"` field names
/// the only account allowed to open it.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockOpener;

#[derive(Deserialize)]
struct MockPlaintext {
    id: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    to: Option<String>,
}

impl MockOpener {
    /// Build envelope content that [`MockOpener`] will open.
    pub fn content(message_id: &str, sender: &str, body: &str) -> String {
        serde_json::json!({ "id": message_id, "sender": sender, "body": body }).to_string()
    }
}

#[async_trait]
impl EnvelopeOpener for MockOpener {
    async fn open(
        &self,
        account: &AccountConfig,
        envelope: &Envelope,
    ) -> Result<DecryptedMessage, OpenError> {
        let plain: MockPlaintext = serde_json::from_str(&envelope.content)
            .map_err(|e| OpenError::Malformed(e.to_string()))?;

        if plain.to.as_deref().is_some_and(|to| to != account.id.as_str()) {
            return Err(OpenError::NotForUs);
        }

        Ok(DecryptedMessage {
            message_id: plain.id,
            event_id: envelope.event_id.clone(),
            sender: plain.sender,
            created_at: envelope.created_at,
            body: plain.body,
        })
    }
}
