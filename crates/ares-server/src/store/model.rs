use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// Stored in redb as bincode-encoded bytes, keyed by `id`.
/// `ciphertext` is AES-128-CBC output; timestamps are plaintext so the reaper
/// can evict without decrypting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretRecord {
    /// 32 hex chars; doubles as the capability token.
    #[zeroize(skip)]
    pub id: String,
    pub ciphertext: Vec<u8>,
    /// Per-record random 16-byte IV.
    pub nonce: Vec<u8>,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: i64,
    /// Unix timestamp (seconds) from which the record is no longer readable.
    pub expires_at: i64,
    /// Set together with `accessed`, exactly once.
    pub accessed_at: Option<i64>,
    pub accessed: bool,
}

impl SecretRecord {
    pub fn new(
        id: String,
        ciphertext: Vec<u8>,
        nonce: Vec<u8>,
        created_at: i64,
        expires_at: i64,
    ) -> Self {
        Self {
            id,
            ciphertext,
            nonce,
            created_at,
            expires_at,
            accessed_at: None,
            accessed: false,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Readable iff not yet consumed and not past expiry.
    pub fn is_readable(&self, now: i64) -> bool {
        !self.accessed && !self.is_expired(now)
    }

    /// Counted by the active-secrets gauge.
    pub fn is_active(&self, now: i64) -> bool {
        !self.accessed && self.expires_at >= now
    }
}
