//! Encoding helpers for the form-encoded inventory, catalog and profile
//! submissions.

use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::Result;
use base64::{engine::general_purpose, Engine};
use bzip2::{write::BzEncoder, Compression};
use sha2::{Digest, Sha256};

/// bz2-compress `data` and base64 the result.
pub fn encode(data: &[u8]) -> Result<String> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(general_purpose::STANDARD.encode(compressed))
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:02x}", hasher.finalize())
}

/// Read a file and hash it. A missing file yields empty contents and the
/// hash of nothing, so callers can compare against server hashes blindly.
pub fn file_and_hash(path: &Path) -> Result<(Vec<u8>, String)> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    let hash = sha256_hex(&contents);
    Ok((contents, hash))
}
