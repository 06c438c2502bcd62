//! CRC32 payload checksum.
//!
//! Only payload bytes are covered; control-only segments carry no checksum
//! and are never validated.  A mismatch always means corruption: the caller
//! drops the segment and relies on retransmission.

use crate::error::ChecksumMismatch;

/// Compute the CRC32 (IEEE) of `payload`.
pub fn compute(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// `true` when `carried` matches a fresh checksum of `payload`.
pub fn is_valid(carried: u32, payload: &[u8]) -> bool {
    compute(payload) == carried
}

/// Like [`is_valid`] but reports both values on failure.
pub fn validate(carried: u32, payload: &[u8]) -> Result<(), ChecksumMismatch> {
    if is_valid(carried, payload) {
        Ok(())
    } else {
        Err(ChecksumMismatch {
            carried,
            computed: compute(payload),
        })
    }
}
