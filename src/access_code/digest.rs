use sha2::{Digest, Sha256};

/// Hash function used for the proof-tag check.
///
/// Implementations must be deterministic and return lowercase hex.
pub trait DigestHex: Send + Sync {
    fn digest_hex(&self, input: &str) -> String;
}

/// SHA-256, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hex;

impl DigestHex for Sha256Hex {
    fn digest_hex(&self, input: &str) -> String {
        hex::encode(Sha256::digest(input.as_bytes()))
    }
}
