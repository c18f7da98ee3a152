//! Capacity of the volume holding a path.

#![allow(missing_docs)]

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DscError, Result};

/// Byte counts for one mounted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeUsage {
    pub total: u64,
    pub used: u64,
    /// Space available to unprivileged users.
    pub available: u64,
}

impl VolumeUsage {
    /// Fraction of the volume in use, `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn used_fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.used as f64 / self.total as f64).clamp(0.0, 1.0)
    }
}

/// Query the volume containing `path` via `statvfs`.
#[cfg(unix)]
#[allow(clippy::useless_conversion)]
pub fn volume_usage(path: &Path) -> Result<VolumeUsage> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|errno| {
        DscError::from_io(path, std::io::Error::from_raw_os_error(errno as i32))
    })?;
    let fragment = u64::from(stat.fragment_size());
    let total = u64::from(stat.blocks()).saturating_mul(fragment);
    let free = u64::from(stat.blocks_free()).saturating_mul(fragment);
    let available = u64::from(stat.blocks_available()).saturating_mul(fragment);
    Ok(VolumeUsage {
        total,
        used: total.saturating_sub(free),
        available,
    })
}

#[cfg(not(unix))]
pub fn volume_usage(path: &Path) -> Result<VolumeUsage> {
    Err(DscError::UnsupportedPlatform {
        details: format!("volume usage for {} needs statvfs", path.display()),
    })
}
