//! Footer codec.
//!
//! The footer is always the trailing 64 bytes of a valid store file. It
//! names the TOC immediately preceding it and carries the committed
//! generation, which is how the open path ranks footer candidates.
//!
//! ```text
//! Offset  Size  Field
//! 0       8     magic: b"MV2SFOOT"
//! 8       8     toc_len
//! 16      32    toc_hash
//! 48      8     generation
//! 56      8     wal_committed_seq
//! ```

use crate::digest::Digest32;
use crate::error::{Result, WaxError};
use crate::format::FOOTER_MAGIC;

pub const FOOTER_SIZE: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Footer {
    pub toc_len: u64,
    pub toc_hash: Digest32,
    pub generation: u64,
    pub wal_committed_seq: u64,
}

pub fn decode_footer(footer_bytes: &[u8]) -> Result<Footer> {
    if footer_bytes.len() != FOOTER_SIZE as usize {
        return Err(WaxError::format("footer size mismatch"));
    }
    if footer_bytes[..8] != FOOTER_MAGIC {
        return Err(WaxError::format("footer magic mismatch"));
    }
    Ok(Footer {
        toc_len: u64::from_le_bytes(footer_bytes[8..16].try_into().unwrap()),
        toc_hash: footer_bytes[16..48].try_into().unwrap(),
        generation: u64::from_le_bytes(footer_bytes[48..56].try_into().unwrap()),
        wal_committed_seq: u64::from_le_bytes(footer_bytes[56..64].try_into().unwrap()),
    })
}

pub fn encode_footer(footer: &Footer) -> [u8; FOOTER_SIZE as usize] {
    let mut bytes = [0u8; FOOTER_SIZE as usize];
    bytes[..8].copy_from_slice(&FOOTER_MAGIC);
    bytes[8..16].copy_from_slice(&footer.toc_len.to_le_bytes());
    bytes[16..48].copy_from_slice(&footer.toc_hash);
    bytes[48..56].copy_from_slice(&footer.generation.to_le_bytes());
    bytes[56..64].copy_from_slice(&footer.wal_committed_seq.to_le_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let footer = Footer {
            toc_len: 1234,
            toc_hash: [0x42; 32],
            generation: 17,
            wal_committed_seq: 99,
        };
        let bytes = encode_footer(&footer);
        assert_eq!(decode_footer(&bytes).unwrap(), footer);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = encode_footer(&Footer::default());
        bytes[0] ^= 0xFF;
        let err = decode_footer(&bytes).unwrap_err();
        assert!(err.to_string().contains("footer magic mismatch"));
    }

    #[test]
    fn wrong_size_rejected() {
        let err = decode_footer(&[0u8; 63]).unwrap_err();
        assert!(err.to_string().contains("footer size mismatch"));
    }
}
