use std::fmt;

use serde::{Deserialize, Serialize};

/// CPU share of a plan, held as an exact number of millicores so that
/// fractional plans (0.5, 1.25 cores) survive round trips without float drift.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vcpu {
    millis: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VcpuError {
    #[error("vcpu must be a positive finite number, got {0}")]
    OutOfRange(f64),
}

impl Vcpu {
    pub const fn from_millis(millis: u32) -> Self {
        Self { millis }
    }

    /// Convert a decimal core count (as stored in the plans table) to millicores,
    /// rounding to the nearest millicore.
    pub fn from_cores(cores: f64) -> Result<Self, VcpuError> {
        if !cores.is_finite() || cores <= 0.0 || cores > f64::from(u32::MAX) / 1000.0 {
            return Err(VcpuError::OutOfRange(cores));
        }
        let millis = (cores * 1000.0).round() as u32;
        if millis == 0 {
            return Err(VcpuError::OutOfRange(cores));
        }
        Ok(Self { millis })
    }

    pub fn millis(self) -> u32 {
        self.millis
    }
}

impl fmt::Display for Vcpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.millis / 1000;
        let frac = self.millis % 1000;
        if frac == 0 {
            write!(f, "{whole}")
        } else {
            let frac = format!("{frac:03}");
            write!(f, "{whole}.{}", frac.trim_end_matches('0'))
        }
    }
}

/// A resource tier. Reference data: looked up, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub id: i64,
    pub vcpu: Vcpu,
    /// Memory ceiling in MiB.
    pub ram_mib: u32,
}
