//! Pre-flight disk space validation for exports

use crate::platform::{HostSystem, VmPlatform};
use crate::{Error, Result};
use std::path::Path;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Bytes as GB rounded to two decimals
pub fn to_gb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_GB * 100.0).round() / 100.0
}

/// Advisory size of a VM's backing storage at check time.
/// Dynamic and differencing disks may export smaller than this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapacityEstimate {
    pub bytes: u64,
    /// Disk files that were measured
    pub files: usize,
    /// Disk files that could not be read
    pub skipped: usize,
}

impl CapacityEstimate {
    pub fn gigabytes(&self) -> f64 {
        to_gb(self.bytes)
    }
}

pub struct CapacityChecker<'a> {
    platform: &'a dyn VmPlatform,
    host: &'a dyn HostSystem,
}

impl<'a> CapacityChecker<'a> {
    pub fn new(platform: &'a dyn VmPlatform, host: &'a dyn HostSystem) -> Self {
        Self { platform, host }
    }

    /// Sum the size of every disk attached to `vm`; unreadable disks are skipped
    pub fn estimate_size(&self, vm: &str) -> Result<CapacityEstimate> {
        let mut estimate = CapacityEstimate::default();

        for disk in self.platform.disk_paths(vm)? {
            match std::fs::metadata(&disk) {
                Ok(meta) => {
                    estimate.bytes = estimate.bytes.saturating_add(meta.len());
                    estimate.files += 1;
                }
                Err(e) => {
                    tracing::warn!(vm, disk = %disk.display(), error = %e, "Skipping unreadable disk in size estimate");
                    estimate.skipped += 1;
                }
            }
        }

        tracing::info!(vm, size_gb = estimate.gigabytes(), files = estimate.files, "Estimated export size");
        Ok(estimate)
    }

    /// Free bytes on the volume holding `path`, or `InsufficientSpace` when
    /// they do not cover `reserve + estimated`
    pub fn check_free_space(&self, path: &Path, reserve: u64, estimated: u64) -> Result<u64> {
        let available = self.host.free_space(path)?;
        let required = reserve.saturating_add(estimated);

        if available < required {
            return Err(Error::InsufficientSpace {
                path: path.to_path_buf(),
                required,
                available,
            });
        }

        tracing::debug!(
            path = %path.display(),
            free_gb = to_gb(available),
            required_gb = to_gb(required),
            "Free space check passed"
        );
        Ok(available)
    }
}
