// src/fota/manager.rs
//! Firmware-over-the-air update pipeline
//!
//! Chunked download with per-chunk HMAC authentication, whole-image
//! SHA-256 verification, partition swap through the [`OtaPartitions`]
//! seam, boot-attempt-counted rollback, and resumable persistence.

use crate::config::FotaSettings;
use crate::error::{GatewayError, GatewayResult};
use crate::fota::manifest::FotaManifest;
use crate::fota::partitions::{OtaPartitions, RollbackTarget};
use crate::fota::state::{FotaProgress, FotaState, PersistedFotaState};
use crate::hal::HttpClient;
use crate::utils::integrity::{sha256_file_hex, verify_hmac_sha256, HASH_BUFFER_SIZE};
use crate::utils::time::Clock;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Boot attempts before the boot-check triggers a rollback
pub const MAX_BOOT_ATTEMPTS: u32 = 3;

/// Chunks between state-file persists while downloading
const STATE_SAVE_EVERY_CHUNKS: u32 = 5;

#[derive(Debug, Deserialize)]
struct ChunkWire {
    chunk_number: u32,
    data: String,
    mac: String,
}

/// Drives the firmware update state machine.
///
/// The manager owns its state exclusively; run it from a single task and
/// call [`FotaManager::tick`] periodically, or drive the individual
/// operations directly.
pub struct FotaManager {
    http: Arc<dyn HttpClient>,
    partitions: Arc<dyn OtaPartitions>,
    settings: FotaSettings,
    cloud_base_url: String,
    time: Arc<dyn Clock>,

    manifest: FotaManifest,
    progress: FotaProgress,
    chunks_downloaded: Vec<bool>,

    last_report_ms: u64,
    last_chunk_ms: u64,
}

impl FotaManager {
    pub fn new(
        http: Arc<dyn HttpClient>,
        partitions: Arc<dyn OtaPartitions>,
        settings: FotaSettings,
        cloud_base_url: impl Into<String>,
        time: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            partitions,
            settings,
            cloud_base_url: cloud_base_url.into(),
            time,
            manifest: FotaManifest::default(),
            progress: FotaProgress::default(),
            chunks_downloaded: Vec::new(),
            last_report_ms: 0,
            last_chunk_ms: 0,
        }
    }

    pub fn state(&self) -> FotaState {
        self.progress.state
    }

    pub fn progress(&self) -> FotaProgress {
        self.progress.clone()
    }

    pub fn manifest(&self) -> &FotaManifest {
        &self.manifest
    }

    pub fn is_in_progress(&self) -> bool {
        self.progress.is_in_progress()
    }

    fn state_file(&self) -> PathBuf {
        self.settings.data_dir.join("fota_state.json")
    }

    fn boot_count_file(&self) -> PathBuf {
        self.settings.data_dir.join("boot_count.txt")
    }

    fn version_file(&self) -> PathBuf {
        self.settings.data_dir.join("version.txt")
    }

    fn firmware_file(&self) -> PathBuf {
        self.settings.data_dir.join("firmware.bin")
    }

    fn status_url(&self) -> String {
        format!("{}{}", self.cloud_base_url, self.settings.status_endpoint)
    }

    /// Initialize the manager: bootstrap persisted files, restore prior
    /// state, and run the boot-count rollback check.
    ///
    /// Returns `Ok(false)` when a rollback was triggered.
    pub async fn begin(&mut self) -> GatewayResult<bool> {
        info!("Initializing FOTA manager");
        std::fs::create_dir_all(&self.settings.data_dir)?;

        if !self.version_file().exists() {
            std::fs::write(self.version_file(), concat!(env!("CARGO_PKG_VERSION"), "\n"))?;
        }
        if !self.boot_count_file().exists() {
            std::fs::write(self.boot_count_file(), "0\n")?;
        }

        if self.load_state() {
            info!(
                "Restored FOTA state: {:?}, chunks {}/{}",
                self.progress.state, self.progress.chunks_received, self.progress.total_chunks
            );

            if self.is_in_progress() {
                let boot_count = self.boot_count();
                if boot_count >= MAX_BOOT_ATTEMPTS {
                    error!("Boot count exceeded ({}), triggering rollback", boot_count);
                    self.rollback("Boot count exceeded after update").await?;
                    return Ok(false);
                }
                self.increment_boot_count();
            }
        }

        self.progress.current_version = self.current_firmware_version();
        info!("Current firmware version: {}", self.progress.current_version);
        Ok(true)
    }

    /// Fetch the manifest and decide whether an update is available
    pub async fn check_for_update(&mut self) -> GatewayResult<bool> {
        info!("Checking for firmware updates");
        self.set_state(FotaState::CheckingManifest, "");

        match self.fetch_manifest().await {
            Ok(()) => {}
            Err(e) => {
                self.set_state(FotaState::Idle, &format!("Failed to fetch manifest: {}", e));
                return Err(e);
            }
        }

        if !self.manifest.valid {
            info!("No firmware update available");
            self.set_state(FotaState::Idle, "");
            return Ok(false);
        }

        if self.manifest.version == self.progress.current_version {
            info!(
                "Firmware version {} matches current, no update needed",
                self.manifest.version
            );
            self.set_state(FotaState::Idle, "");
            return Ok(false);
        }

        info!(
            "New firmware available: {} (current: {}), {} bytes in {} chunks",
            self.manifest.version,
            self.progress.current_version,
            self.manifest.size,
            self.manifest.total_chunks
        );

        self.progress.new_version = self.manifest.version.clone();
        self.progress.total_chunks = self.manifest.total_chunks;
        self.progress.total_bytes = self.manifest.size;
        self.set_state(FotaState::Idle, "");
        Ok(true)
    }

    /// Begin downloading the manifested image
    pub fn start_download(&mut self) -> GatewayResult<()> {
        if !self.manifest.valid {
            return Err(GatewayError::State(
                "Cannot start download without a valid manifest".to_string(),
            ));
        }

        info!(
            "Starting firmware download: version={}, size={}",
            self.manifest.version, self.manifest.size
        );

        self.set_state(FotaState::Downloading, "");
        self.chunks_downloaded = vec![false; self.manifest.total_chunks as usize];
        self.progress.chunks_received = 0;
        self.progress.bytes_received = 0;

        let firmware = self.firmware_file();
        if firmware.exists() {
            std::fs::remove_file(&firmware)?;
        }

        self.save_state();
        Ok(())
    }

    /// Fetch the next missing chunk, or finish the pipeline when all
    /// chunks are in. Invalid-state calls are logged and return false.
    pub async fn process_chunk(&mut self) -> bool {
        if self.progress.state != FotaState::Downloading {
            warn!("process_chunk called while not downloading");
            return false;
        }

        if self.manifest.total_chunks == 0
            || self.chunks_downloaded.len() != self.manifest.total_chunks as usize
        {
            self.set_state(FotaState::Failed, "Corrupted download state");
            return false;
        }

        let next = self.chunks_downloaded.iter().position(|&done| !done);
        let Some(chunk_number) = next else {
            info!("All chunks downloaded, verifying firmware");
            self.set_state(FotaState::Verifying, "");

            if !self.verify_firmware() {
                return false;
            }
            return self.apply_update().await;
        };

        if let Err(e) = self.fetch_chunk(chunk_number as u32).await {
            self.set_state(
                FotaState::Failed,
                &format!("Failed to fetch chunk {}: {}", chunk_number, e),
            );
            return false;
        }

        self.report_progress(false).await;
        true
    }

    /// Stream the assembled image and compare it against the manifest
    pub fn verify_firmware(&mut self) -> bool {
        info!("Verifying firmware integrity");
        self.set_state(FotaState::Verifying, "");

        let (hash, size) = match sha256_file_hex(self.firmware_file()) {
            Ok(result) => result,
            Err(e) => {
                self.set_state(FotaState::Failed, &format!("Cannot read firmware image: {}", e));
                return false;
            }
        };

        if size != u64::from(self.manifest.size) {
            self.set_state(
                FotaState::Failed,
                &format!("Size mismatch: expected {}, got {}", self.manifest.size, size),
            );
            return false;
        }

        if hash != self.manifest.hash.to_lowercase() {
            self.set_state(
                FotaState::Failed,
                &format!("Hash mismatch: expected {}, got {}", self.manifest.hash, hash),
            );
            self.log_event("verification_failed", "Hash mismatch");
            return false;
        }

        info!("Firmware verification successful: hash={}", hash);
        self.progress.verified = true;
        self.set_state(FotaState::Writing, "");
        self.log_event("firmware_verified", &format!("Hash: {}", hash));
        true
    }

    /// Write the verified image to the inactive partition and reboot
    pub async fn apply_update(&mut self) -> bool {
        if !self.progress.verified {
            error!("Cannot apply update: firmware not verified");
            return false;
        }

        info!("Applying firmware update");
        self.set_state(FotaState::Writing, "");

        let result = self.write_image();
        let written = match result {
            Ok(written) => written,
            Err(e) => {
                self.set_state(FotaState::Failed, &e.to_string());
                return false;
            }
        };

        info!("Firmware written successfully: {} bytes", written);
        self.set_state(FotaState::Rebooting, "");
        self.clear_boot_count();
        self.save_state();
        self.log_event(
            "firmware_applied",
            &format!("Version: {}, Size: {}", self.manifest.version, written),
        );

        self.report_progress(true).await;
        self.post_status(json!({
            "fota_status": {
                "boot_status": "pending_reboot",
                "new_version": self.manifest.version,
            }
        }))
        .await;

        self.partitions.reboot();
        true
    }

    fn write_image(&self) -> GatewayResult<u64> {
        let mut source = std::fs::File::open(self.firmware_file())?;
        let size = source.metadata()?.len();
        let mut target = self.partitions.open_update_target(size)?;

        let mut buffer = [0u8; HASH_BUFFER_SIZE];
        let mut written: u64 = 0;
        loop {
            let read = source.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            target.write_all(&buffer[..read]).map_err(|e| {
                GatewayError::Resource(format!("Partition write failed at {}: {}", written, e))
            })?;
            written += read as u64;
        }
        target.flush()?;
        drop(target);

        self.partitions.commit_update()?;
        Ok(written)
    }

    /// Switch the boot selector back to a prior image and reboot
    pub async fn rollback(&mut self, reason: &str) -> GatewayResult<()> {
        error!("Initiating rollback: {}", reason);
        self.set_state(FotaState::Rollback, reason);
        self.log_event("rollback_triggered", reason);
        self.report_progress(true).await;

        match self.partitions.rollback_target() {
            Some(RollbackTarget::Factory) => {
                info!("Rolling back to factory partition");
                self.partitions.rollback(RollbackTarget::Factory)?;
                self.log_event("rollback_to_factory", "Reverting to factory firmware");
            }
            Some(RollbackTarget::PreviousOta) => {
                info!("Rolling back to previous OTA partition");
                self.partitions.rollback(RollbackTarget::PreviousOta)?;
                self.log_event("rollback_to_previous_ota", "Reverting to previous OTA partition");
            }
            None => {
                self.set_state(FotaState::Failed, "No rollback partition available");
                return Err(GatewayError::Resource(
                    "No rollback partition available".to_string(),
                ));
            }
        }

        self.reset();
        self.partitions.reboot();
        Ok(())
    }

    /// Post progress to the cloud, throttled to the report interval
    /// unless forced
    pub async fn report_progress(&mut self, force: bool) -> bool {
        let now = self.time.now_millis();
        if !force && now.saturating_sub(self.last_report_ms) < self.settings.report_interval_ms {
            return true;
        }
        self.last_report_ms = now;

        let mut status = serde_json::Map::new();

        if self.progress.state == FotaState::Downloading {
            status.insert("chunk_received".into(), json!(self.progress.chunks_received));
            status.insert("total_chunks".into(), json!(self.progress.total_chunks));
            let pct = if self.progress.total_chunks > 0 {
                f64::from(self.progress.chunks_received) / f64::from(self.progress.total_chunks)
                    * 100.0
            } else {
                0.0
            };
            status.insert("progress".into(), json!(pct));
        }

        if self.progress.state == FotaState::Verifying || self.progress.verified {
            status.insert("verified".into(), json!(self.progress.verified));
        }

        if self.progress.state == FotaState::Rollback {
            status.insert("rollback".into(), json!(true));
            status.insert("error".into(), json!(self.progress.error_message));
        }

        if self.progress.state == FotaState::Failed {
            status.insert("error".into(), json!(self.progress.error_message));
        }

        self.post_status(json!({ "fota_status": status })).await
    }

    /// Report post-reboot boot status; a zero boot count is a success
    pub async fn report_boot_status(&mut self) -> bool {
        info!("Reporting boot status");

        let boot_count = self.boot_count();
        let mut status = serde_json::Map::new();

        if boot_count == 0 {
            status.insert("boot_status".into(), json!("success"));
            status.insert("new_version".into(), json!(self.current_firmware_version()));
            self.clear_boot_count();
            self.log_event(
                "boot_successful",
                &format!("Version: {}", self.current_firmware_version()),
            );
        } else {
            status.insert("boot_status".into(), json!("failed"));
            status.insert("boot_count".into(), json!(boot_count));
            if boot_count >= MAX_BOOT_ATTEMPTS {
                status.insert("rollback".into(), json!(true));
                self.log_event(
                    "boot_failed_max_attempts",
                    &format!("Boot count: {}", boot_count),
                );
            } else {
                self.log_event("boot_failed", &format!("Boot count: {}", boot_count));
            }
            warn!("Boot count: {}", boot_count);
        }

        self.post_status(json!({ "fota_status": status })).await
    }

    /// Abandon the current update and remove the scratch image
    pub fn cancel(&mut self) {
        info!("Cancelling FOTA operation");
        self.set_state(FotaState::Idle, "Cancelled");
        let firmware = self.firmware_file();
        if firmware.exists() {
            let _ = std::fs::remove_file(firmware);
        }
        self.reset();
    }

    /// Clear all update state, including the persisted state file
    pub fn reset(&mut self) {
        self.progress = FotaProgress {
            current_version: self.current_firmware_version(),
            ..FotaProgress::default()
        };
        self.manifest = FotaManifest::default();
        self.chunks_downloaded.clear();

        let state_file = self.state_file();
        if state_file.exists() {
            let _ = std::fs::remove_file(state_file);
        }
    }

    /// Background step: fetch at most one chunk per chunk interval
    pub async fn tick(&mut self) {
        if self.progress.state != FotaState::Downloading {
            return;
        }

        let now = self.time.now_millis();
        if now.saturating_sub(self.last_chunk_ms) < self.settings.chunk_interval_ms {
            return;
        }
        self.last_chunk_ms = now;

        if !self.process_chunk().await {
            warn!("Chunk processing failed, waiting for manual retry or reset");
        }
    }

    // ---- helpers ----

    async fn fetch_manifest(&mut self) -> GatewayResult<()> {
        debug!("Fetching manifest from cloud");
        let url = format!("{}{}", self.cloud_base_url, self.settings.manifest_endpoint);

        let resp = self.http.get(&url).await?;
        if !resp.is_success() {
            return Err(GatewayError::Transport(format!(
                "Manifest fetch failed: status {}",
                resp.status
            )));
        }

        self.manifest = FotaManifest::parse(&resp.body)?;
        if self.manifest.valid {
            info!(
                "Manifest loaded: version={}, size={}, chunks={}",
                self.manifest.version, self.manifest.size, self.manifest.total_chunks
            );
        }
        Ok(())
    }

    async fn fetch_chunk(&mut self, chunk_number: u32) -> GatewayResult<()> {
        debug!(
            "Fetching chunk {}/{}",
            chunk_number + 1,
            self.manifest.total_chunks
        );

        let url = format!(
            "{}{}?chunk_number={}",
            self.cloud_base_url, self.settings.chunk_endpoint, chunk_number
        );

        let resp = self.http.get(&url).await?;
        if !resp.is_success() {
            return Err(GatewayError::Transport(format!(
                "Chunk fetch failed: status {}",
                resp.status
            )));
        }

        let chunk: ChunkWire = serde_json::from_str(&resp.body)?;
        if chunk.chunk_number != chunk_number {
            return Err(GatewayError::Protocol(format!(
                "Chunk number mismatch: requested {}, got {}",
                chunk_number, chunk.chunk_number
            )));
        }

        let data = BASE64
            .decode(chunk.data.as_bytes())
            .map_err(|e| GatewayError::Protocol(format!("Invalid chunk base64: {}", e)))?;

        if self.settings.psk.is_empty() {
            warn!("No pre-shared key configured, skipping chunk HMAC verification");
        } else if !verify_hmac_sha256(self.settings.psk.as_bytes(), &data, &chunk.mac)? {
            self.log_event("chunk_hmac_failed", &format!("Chunk: {}", chunk_number));
            return Err(GatewayError::Integrity(format!(
                "Chunk {} HMAC verification failed",
                chunk_number
            )));
        }

        self.append_chunk(chunk_number, &data)?;

        self.chunks_downloaded[chunk_number as usize] = true;
        self.progress.chunks_received += 1;
        self.progress.bytes_received += data.len() as u32;

        info!(
            "Chunk {} downloaded and verified ({}/{})",
            chunk_number, self.progress.chunks_received, self.manifest.total_chunks
        );

        if self.progress.chunks_received % STATE_SAVE_EVERY_CHUNKS == 0
            || self.progress.chunks_received == self.manifest.total_chunks
        {
            self.save_state();
        }

        Ok(())
    }

    fn append_chunk(&self, chunk_number: u32, data: &[u8]) -> GatewayResult<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(chunk_number != 0)
            .write(true)
            .truncate(chunk_number == 0)
            .open(self.firmware_file())?;
        file.write_all(data)?;
        Ok(())
    }

    fn save_state(&self) {
        let state = PersistedFotaState {
            state: self.progress.state,
            version: self.manifest.version.clone(),
            chunks_received: self.progress.chunks_received,
            total_chunks: self.progress.total_chunks,
            verified: self.progress.verified,
            chunks: self
                .chunks_downloaded
                .iter()
                .map(|&done| u8::from(done))
                .collect(),
        };

        if let Err(e) = state.save(self.state_file()) {
            error!("Failed to persist FOTA state: {}", e);
        }
    }

    fn load_state(&mut self) -> bool {
        let Some(state) = PersistedFotaState::load(self.state_file()) else {
            return false;
        };

        self.progress.state = state.state;
        self.progress.chunks_received = state.chunks_received;
        self.progress.total_chunks = state.total_chunks;
        self.progress.verified = state.verified;
        self.progress.new_version = state.version.clone();
        self.manifest.version = state.version;
        self.chunks_downloaded = state.chunks.iter().map(|&c| c != 0).collect();
        true
    }

    /// Restore the downloadable manifest after a resume, so the chunk
    /// loop can continue from the persisted bitmap
    pub fn resume_with_manifest(&mut self, manifest: FotaManifest) -> GatewayResult<()> {
        if self.progress.state != FotaState::Downloading {
            return Err(GatewayError::State(
                "Resume is only valid in the Downloading state".to_string(),
            ));
        }
        if manifest.total_chunks as usize != self.chunks_downloaded.len() {
            return Err(GatewayError::State(format!(
                "Manifest chunk count {} does not match persisted bitmap {}",
                manifest.total_chunks,
                self.chunks_downloaded.len()
            )));
        }
        self.manifest = manifest;
        Ok(())
    }

    async fn post_status(&self, body: serde_json::Value) -> bool {
        let payload = body.to_string();
        match self
            .http
            .post(&self.status_url(), payload.as_bytes(), "application/json")
            .await
        {
            Ok(resp) if resp.is_success() => true,
            Ok(resp) => {
                warn!("Failed to report FOTA status: status={}", resp.status);
                false
            }
            Err(e) => {
                warn!("Failed to report FOTA status: {}", e);
                false
            }
        }
    }

    fn set_state(&mut self, state: FotaState, error: &str) {
        self.progress.state = state;
        self.progress.error_message = error.to_string();

        if error.is_empty() {
            info!("FOTA state changed to {:?}", state);
        } else {
            error!("FOTA state changed to {:?}: {}", state, error);
        }
    }

    pub fn boot_count(&self) -> u32 {
        std::fs::read_to_string(self.boot_count_file())
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn increment_boot_count(&self) {
        let count = self.boot_count() + 1;
        if let Err(e) = std::fs::write(self.boot_count_file(), format!("{}\n", count)) {
            error!("Failed to write boot count: {}", e);
        }
    }

    fn clear_boot_count(&self) {
        let file = self.boot_count_file();
        if file.exists() {
            let _ = std::fs::remove_file(file);
        }
    }

    pub fn current_firmware_version(&self) -> String {
        std::fs::read_to_string(self.version_file())
            .ok()
            .and_then(|s| s.lines().next().map(|l| l.trim().to_string()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    }

    fn log_event(&self, event_type: &str, details: &str) {
        info!("[FOTA EVENT] {}: {}", event_type, details);
    }
}
