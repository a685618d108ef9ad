// src/fota/partitions.rs
//! Boot partition control seam
//!
//! The real device swaps OTA partitions in flash; hosted builds and tests
//! use a directory-backed stand-in. The manager only ever talks to the
//! trait.

use crate::error::{GatewayError, GatewayResult};
use log::info;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

/// Where a rollback can land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackTarget {
    Factory,
    PreviousOta,
}

/// Partition and reboot operations behind the FOTA manager
pub trait OtaPartitions: Send + Sync {
    /// Open the inactive OTA slot for writing a new image of `size` bytes
    fn open_update_target(&self, size: u64) -> GatewayResult<Box<dyn Write + Send>>;

    /// Mark the freshly written image as the boot partition
    fn commit_update(&self) -> GatewayResult<()>;

    /// Best available rollback destination, if any
    fn rollback_target(&self) -> Option<RollbackTarget>;

    /// Point the boot selector at the rollback destination
    fn rollback(&self, target: RollbackTarget) -> GatewayResult<()>;

    /// Request a device reboot
    fn reboot(&self);
}

/// Directory-backed partition controller.
///
/// Images land in `ota_next.bin`; the boot selection is a one-line marker
/// file. Reboots are counted rather than performed.
pub struct DirPartitions {
    dir: PathBuf,
    has_factory: bool,
    reboots: AtomicU32,
}

impl DirPartitions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            has_factory: true,
            reboots: AtomicU32::new(0),
        }
    }

    pub fn without_factory(dir: impl Into<PathBuf>) -> Self {
        Self {
            has_factory: false,
            ..Self::new(dir)
        }
    }

    fn boot_marker(&self) -> PathBuf {
        self.dir.join("boot_partition.txt")
    }

    /// Currently selected boot partition label
    pub fn boot_selection(&self) -> Option<String> {
        std::fs::read_to_string(self.boot_marker())
            .ok()
            .map(|s| s.trim().to_string())
    }

    pub fn image_path(&self) -> PathBuf {
        self.dir.join("ota_next.bin")
    }

    /// Number of reboots requested so far
    pub fn reboot_count(&self) -> u32 {
        self.reboots.load(Ordering::Relaxed)
    }
}

impl OtaPartitions for DirPartitions {
    fn open_update_target(&self, size: u64) -> GatewayResult<Box<dyn Write + Send>> {
        std::fs::create_dir_all(&self.dir)?;
        info!("Opening OTA slot for {} byte image", size);
        let file = std::fs::File::create(self.image_path())?;
        Ok(Box::new(file))
    }

    fn commit_update(&self) -> GatewayResult<()> {
        std::fs::write(self.boot_marker(), "ota_next\n")?;
        Ok(())
    }

    fn rollback_target(&self) -> Option<RollbackTarget> {
        if self.has_factory {
            Some(RollbackTarget::Factory)
        } else if self.image_path().exists() {
            Some(RollbackTarget::PreviousOta)
        } else {
            None
        }
    }

    fn rollback(&self, target: RollbackTarget) -> GatewayResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let label = match target {
            RollbackTarget::Factory => "factory",
            RollbackTarget::PreviousOta => "ota_previous",
        };
        std::fs::write(self.boot_marker(), format!("{}\n", label))
            .map_err(|e| GatewayError::Resource(format!("Boot selector write failed: {}", e)))
    }

    fn reboot(&self) {
        self.reboots.fetch_add(1, Ordering::Relaxed);
        info!("Reboot requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_commit() {
        let dir = tempdir().unwrap();
        let partitions = DirPartitions::new(dir.path());

        let mut target = partitions.open_update_target(4).unwrap();
        target.write_all(b"data").unwrap();
        drop(target);

        partitions.commit_update().unwrap();
        assert_eq!(partitions.boot_selection().as_deref(), Some("ota_next"));
        assert_eq!(std::fs::read(partitions.image_path()).unwrap(), b"data");
    }

    #[test]
    fn test_rollback_prefers_factory() {
        let dir = tempdir().unwrap();
        let partitions = DirPartitions::new(dir.path());

        assert_eq!(partitions.rollback_target(), Some(RollbackTarget::Factory));
        partitions.rollback(RollbackTarget::Factory).unwrap();
        assert_eq!(partitions.boot_selection().as_deref(), Some("factory"));
    }

    #[test]
    fn test_rollback_without_factory() {
        let dir = tempdir().unwrap();
        let partitions = DirPartitions::without_factory(dir.path());

        // No factory and no previous image: nowhere to roll back to
        assert_eq!(partitions.rollback_target(), None);

        let mut target = partitions.open_update_target(1).unwrap();
        target.write_all(b"x").unwrap();
        drop(target);
        assert_eq!(
            partitions.rollback_target(),
            Some(RollbackTarget::PreviousOta)
        );
    }

    #[test]
    fn test_reboot_is_counted() {
        let dir = tempdir().unwrap();
        let partitions = DirPartitions::new(dir.path());
        assert_eq!(partitions.reboot_count(), 0);
        partitions.reboot();
        assert_eq!(partitions.reboot_count(), 1);
    }
}
