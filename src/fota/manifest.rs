// src/fota/manifest.rs
//! Cloud-published firmware manifest

use crate::error::GatewayResult;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct WireManifest {
    #[serde(default)]
    version: String,
    #[serde(default)]
    size: u32,
    #[serde(default)]
    hash: String,
    #[serde(default = "default_chunk_size")]
    chunk_size: u32,
}

fn default_chunk_size() -> u32 {
    1024
}

#[derive(Debug, Deserialize)]
struct WireFota {
    manifest: Option<WireManifest>,
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    fota: Option<WireFota>,
}

/// Descriptor of an available firmware image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FotaManifest {
    pub version: String,
    pub size: u32,
    /// SHA-256 of the full image, lowercase hex
    pub hash: String,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub valid: bool,
}

impl FotaManifest {
    /// Parse a manifest response body.
    ///
    /// A response without `fota.manifest` is not an error; it parses to an
    /// invalid manifest meaning "no update available".
    pub fn parse(body: &str) -> GatewayResult<Self> {
        let envelope: WireEnvelope = serde_json::from_str(body)?;

        let Some(wire) = envelope.fota.and_then(|f| f.manifest) else {
            return Ok(Self::default());
        };

        let total_chunks = if wire.size > 0 && wire.chunk_size > 0 {
            wire.size.div_ceil(wire.chunk_size)
        } else {
            0
        };

        let valid = !wire.version.is_empty() && wire.size > 0 && !wire.hash.is_empty();

        Ok(Self {
            version: wire.version,
            size: wire.size,
            hash: wire.hash,
            chunk_size: wire.chunk_size,
            total_chunks,
            valid,
        })
    }
}
