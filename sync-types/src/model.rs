//! Shared, non-financial account state.

use serde::{Deserialize, Serialize};

/// A member of a multi-device / multi-signer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// The member's public identity.
    pub npub: String,
    /// Display colour, derived deterministically from `npub`.
    pub color: String,
}

/// PSBT payload carried by an outbound share. Opaque to the sync core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionData {
    /// Base64 combined PSBT.
    pub combined_psbt: String,
}

/// Single-slot outbound mailbox entry handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionToShare {
    /// Human-readable note sent with the transaction.
    pub message: String,
    /// The transaction itself.
    pub transaction_data: TransactionData,
}

impl TransactionToShare {
    /// Create a new share payload.
    pub fn new(message: impl Into<String>, combined_psbt: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transaction_data: TransactionData {
                combined_psbt: combined_psbt.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_to_share_uses_camel_case() {
        let share = TransactionToShare::new("please sign", "cHNidP8B");
        let json = serde_json::to_value(&share).unwrap();
        assert_eq!(json["transactionData"]["combinedPsbt"], "cHNidP8B");
        assert_eq!(json["message"], "please sign");
    }
}
