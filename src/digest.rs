//! Content hashing for checksums and content addressing.
//!
//! Every checksum field in the MV2S container is a 32-byte SHA-256 digest.
//! The format is pinned to SHA-256 so independent implementations agree
//! byte-for-byte on header, TOC and WAL record checksums.

use sha2::{Digest, Sha256 as Sha256Inner};

/// 32-byte digest value used by every checksum slot in the container.
pub type Digest32 = [u8; 32];

/// Streaming SHA-256 hasher.
pub struct Sha256 {
    inner: Sha256Inner,
}

impl Sha256 {
    pub fn new() -> Self {
        Self {
            inner: Sha256Inner::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finalize(self) -> Digest32 {
        self.inner.finalize().into()
    }
}

impl Default for Sha256 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot digest of a byte slice.
pub fn sha256(bytes: &[u8]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Digest of the empty byte string. Padding WAL records carry this value.
pub fn empty_digest() -> Digest32 {
    sha256(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(digest: &Digest32) -> String {
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn empty_input_matches_standard_vector() {
        assert_eq!(
            hex(&sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn abc_matches_standard_vector() {
        assert_eq!(
            hex(&sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn streaming_equals_one_shot() {
        let mut hasher = Sha256::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), sha256(b"hello world"));
    }

    #[test]
    fn empty_digest_is_cached_value() {
        assert_eq!(empty_digest(), sha256(&[]));
    }
}
