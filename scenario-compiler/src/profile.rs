//! Target-device optimization profiles.
//!
//! A profile is a fixed knob set resolved once per compile and passed by
//! value to every stage. There is no process-wide configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTarget {
    AppleSilicon,
    #[default]
    Generic,
}

impl DeviceTarget {
    pub fn name(self) -> &'static str {
        match self {
            DeviceTarget::AppleSilicon => "apple_silicon",
            DeviceTarget::Generic => "generic",
        }
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apple_silicon" | "apple-silicon" => Ok(DeviceTarget::AppleSilicon),
            "generic" => Ok(DeviceTarget::Generic),
            other => Err(format!(
                "unknown target '{other}' (expected apple_silicon or generic)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationProfile {
    pub target: DeviceTarget,
    pub use_fp16: bool,
    pub use_shared_memory: bool,
    pub tile_size: u32,
    pub use_simdgroup: bool,
    pub threadgroup_size: [u32; 3],
}

/// Threadgroup memory available to shared-memory tiling, in bytes.
pub const SHARED_MEMORY_BYTES: u32 = 32 * 1024;

impl OptimizationProfile {
    pub const APPLE_SILICON: OptimizationProfile = OptimizationProfile {
        target: DeviceTarget::AppleSilicon,
        use_fp16: true,
        use_shared_memory: true,
        tile_size: 32,
        use_simdgroup: true,
        threadgroup_size: [32, 1, 1],
    };

    pub const GENERIC: OptimizationProfile = OptimizationProfile {
        target: DeviceTarget::Generic,
        use_fp16: false,
        use_shared_memory: true,
        tile_size: 16,
        use_simdgroup: false,
        threadgroup_size: [256, 1, 1],
    };

    pub const fn resolve(target: DeviceTarget) -> OptimizationProfile {
        match target {
            DeviceTarget::AppleSilicon => Self::APPLE_SILICON,
            DeviceTarget::Generic => Self::GENERIC,
        }
    }

    /// Bytes per tensor element.
    pub const fn dtype_size(&self) -> u64 {
        if self.use_fp16 {
            2
        } else {
            4
        }
    }
}

impl Default for OptimizationProfile {
    fn default() -> Self {
        Self::GENERIC
    }
}
