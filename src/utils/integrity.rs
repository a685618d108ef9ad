//! Hashing and message authentication helpers for firmware verification

use crate::error::{GatewayError, GatewayResult};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Buffer size for streaming hash computation
pub const HASH_BUFFER_SIZE: usize = 4096;

/// Compute the SHA-256 of a byte slice as a lowercase hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Stream a file through SHA-256, returning the lowercase hex digest and
/// the number of bytes hashed
pub fn sha256_file_hex<P: AsRef<Path>>(path: P) -> GatewayResult<(String, u64)> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}

/// Compute HMAC-SHA256 over `data` with the pre-shared key, as lowercase hex
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> GatewayResult<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| GatewayError::Integrity(format!("Invalid HMAC key: {}", e)))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex-encoded HMAC-SHA256 tag in constant time
pub fn verify_hmac_sha256(key: &[u8], data: &[u8], mac_hex: &str) -> GatewayResult<bool> {
    let expected = hex::decode(mac_hex.trim())
        .map_err(|e| GatewayError::Protocol(format!("Invalid MAC hex: {}", e)))?;

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| GatewayError::Integrity(format!("Invalid HMAC key: {}", e)))?;
    mac.update(data);

    // verify_slice is constant-time
    Ok(mac.verify_slice(&expected).is_ok())
}
