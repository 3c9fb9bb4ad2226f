//! SHA-1 checksums for downloaded plugin binaries.
//!
//! Plugin repositories publish SHA-1 digests alongside each binary; this
//! matches that protocol, it is not a general integrity mechanism.

use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::PluginResult;

/// Hex-encoded SHA-1 of a byte slice.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-1 of a file's contents.
pub async fn sha1_hex_file(path: &Path) -> PluginResult<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(sha1_hex(&bytes))
}
