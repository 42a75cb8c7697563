//! Short content fingerprints used as dedup keys.

use ring::digest::{digest, SHA256};

/// Hex characters kept from the digest. Collisions at this length are
/// acceptable inside a dedup window of tens of seconds.
pub const FINGERPRINT_LEN: usize = 16;

/// Stable fingerprint of normalized content: the first 16 hex chars of its
/// SHA-256.
pub fn fingerprint(content: &str) -> String {
    let hash = digest(&SHA256, content.as_bytes());
    let mut out = String::with_capacity(FINGERPRINT_LEN);
    for byte in hash.as_ref().iter().take(FINGERPRINT_LEN / 2) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
