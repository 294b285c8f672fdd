//! Member display colours.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Produces the display colour for a member identity.
#[async_trait]
pub trait ColorGenerator: Send + Sync {
    /// Colour for `npub`, as `#rrggbb`.
    async fn color_for(&self, npub: &str) -> String;
}

/// Deterministic colour from the first three bytes of SHA-256(npub).
#[derive(Debug, Default, Clone, Copy)]
pub struct HashColorGenerator;

#[async_trait]
impl ColorGenerator for HashColorGenerator {
    async fn color_for(&self, npub: &str) -> String {
        let digest = Sha256::digest(npub.as_bytes());
        format!("#{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_npub_same_color() {
        let a = HashColorGenerator.color_for("npub1alice").await;
        let b = HashColorGenerator.color_for("npub1alice").await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn color_is_hex_triplet() {
        let c = HashColorGenerator.color_for("npub1bob").await;
        assert_eq!(c.len(), 7);
        assert!(c.starts_with('#'));
        assert!(c[1..].chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn different_npubs_usually_differ() {
        let a = HashColorGenerator.color_for("npub1alice").await;
        let b = HashColorGenerator.color_for("npub1bob").await;
        assert_ne!(a, b);
    }
}
