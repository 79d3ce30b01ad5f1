use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `data`. Used as the request identifier in audit
/// lookups and never reversible.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 applied to the hex form of the first digest.
pub fn double_fingerprint(data: &[u8]) -> String {
    fingerprint(fingerprint(data).as_bytes())
}
