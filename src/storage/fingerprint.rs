//! Artifact fingerprints used as URL storage keys

use crate::source::ChunkSource;
use sha2::{Digest, Sha256};
use std::io;

/// Number of leading bytes hashed into a fingerprint
pub const FINGERPRINT_BLOCK_SIZE: usize = 64 * 1024;

/// Compute a stable fingerprint for `source`.
///
/// Hex SHA-256 over the total size and the first
/// [`FINGERPRINT_BLOCK_SIZE`] bytes. Two files with the same size and the
/// same leading block share a fingerprint.
pub fn fingerprint<S: ChunkSource + ?Sized>(source: &mut S) -> io::Result<String> {
    let size = source.total_size()?;
    let head = source.read(0, FINGERPRINT_BLOCK_SIZE)?;

    let mut hasher = Sha256::new();
    hasher.update(format!("size:{}", size).as_bytes());
    hasher.update(&head);
    Ok(hex::encode(hasher.finalize()))
}
