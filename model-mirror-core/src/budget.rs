//! Disk space admission rule for the download queue.
//!
//! An item may start only if, after charging its estimated size,
//! the volume still keeps `min_free_space` bytes free and the sum of all
//! in-flight reservations stays within `total_space`.

use std::time::Duration;

use crate::contract::ConfigError;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Converts a byte count to GiB for log output.
pub fn as_gib(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}

/// Validated space budget. Only constructible with `min_free_space < total_space`,
/// otherwise the queue could stall forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionBudget {
    total_space: u64,
    min_free_space: u64,
    backoff: Duration,
}

/// Outcome of checking one candidate against the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Admitting would leave less than the free space floor on disk.
    InsufficientFreeSpace,
    /// Admitting would push in-flight reservations past the ceiling.
    CeilingExceeded,
}

impl AdmissionBudget {
    pub fn new(total_space: u64, min_free_space: u64, backoff: Duration) -> Result<Self, ConfigError> {
        if min_free_space >= total_space {
            return Err(ConfigError::FloorNotBelowCeiling {
                floor: min_free_space,
                ceiling: total_space,
            });
        }
        Ok(Self {
            total_space,
            min_free_space,
            backoff,
        })
    }

    pub fn total_space(&self) -> u64 {
        self.total_space
    }

    pub fn min_free_space(&self) -> u64 {
        self.min_free_space
    }

    /// How long the queue waits before re-polling a blocked head item.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Whether an item of `size` fits given current `free_space` and `reserved` in-flight bytes.
    pub fn check(&self, free_space: u64, reserved: u64, size: u64) -> Admission {
        let keeps_floor = free_space
            .checked_sub(size)
            .is_some_and(|left| left >= self.min_free_space);
        if !keeps_floor {
            return Admission::InsufficientFreeSpace;
        }
        match reserved.checked_add(size) {
            Some(total) if total <= self.total_space => Admission::Admit,
            _ => Admission::CeilingExceeded,
        }
    }

    /// An item larger than the ceiling can never be admitted, whatever else completes.
    pub fn can_ever_fit(&self, size: u64) -> bool {
        size <= self.total_space
    }
}
