//! What the relay delivers, and what a message processor receives.

use serde::{Deserialize, Serialize};

/// An encrypted event as delivered by a relay.
///
/// The payload is opaque here; only the envelope opener can read it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Relay-level event id. Used to skip redelivered events before decrypting.
    pub event_id: String,
    /// Unix timestamp (seconds) the relay reports for the event.
    pub created_at: u64,
    /// Event kind as reported by the relay.
    pub kind: u16,
    /// Encrypted content.
    pub content: String,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(event_id: impl Into<String>, created_at: u64, kind: u16, content: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            created_at,
            kind,
            content: content.into(),
        }
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("event_id", &self.event_id)
            .field("created_at", &self.created_at)
            .field("kind", &self.kind)
            .field("content", &format!("[{} bytes REDACTED]", self.content.len()))
            .finish()
    }
}

/// A decrypted message handed to the registered processor.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedMessage {
    /// Application-level message id. Stable across re-wrapping, unlike `event_id`.
    pub message_id: String,
    /// Relay event id of the envelope this came from.
    pub event_id: String,
    /// Sender identity.
    pub sender: String,
    /// Unix timestamp (seconds) of the envelope.
    pub created_at: u64,
    /// Plaintext body. The core never interprets it.
    pub body: String,
}

impl std::fmt::Debug for DecryptedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedMessage")
            .field("message_id", &self.message_id)
            .field("event_id", &self.event_id)
            .field("sender", &self.sender)
            .field("created_at", &self.created_at)
            .field("body", &format!("[{} bytes REDACTED]", self.body.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_debug_redacts_content() {
        let env = Envelope::new("ev1", 1_705_000_000, 1059, "ciphertext-goes-here");
        let debug = format!("{:?}", env);
        assert!(debug.contains("[20 bytes REDACTED]"), "got: {}", debug);
        assert!(!debug.contains("ciphertext-goes-here"));
    }

    #[test]
    fn decrypted_message_debug_redacts_body() {
        let msg = DecryptedMessage {
            message_id: "m1".into(),
            event_id: "ev1".into(),
            sender: "npub1sender".into(),
            created_at: 0,
            body: "label: cold storage".into(),
        };
        let debug = format!("{:?}", msg);
        assert!(!debug.contains("cold storage"));
    }
}
