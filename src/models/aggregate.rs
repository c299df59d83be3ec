//! Per facility + device type inventory counters
//!
//! Counters are a cached projection of the item statuses. They are only ever
//! moved by a [`CounterDelta`] applied in the same unit of work as the item
//! status change it mirrors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::enums::{DeviceStatus, DeviceType, StatusBucket};

/// Aggregate counter snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct DeviceTypeAggregate {
    pub facility_id: i64,
    pub device_type: DeviceType,
    pub qty_total: i32,
    pub qty_available: i32,
    pub qty_rented: i32,
    /// Covers both `broken` and `maintenance` items
    pub qty_broken: i32,
    pub updated_at: DateTime<Utc>,
}

impl DeviceTypeAggregate {
    /// Snapshot for a (facility, type) pair that has no items yet
    pub fn empty(facility_id: i64, device_type: DeviceType) -> Self {
        Self {
            facility_id,
            device_type,
            qty_total: 0,
            qty_available: 0,
            qty_rented: 0,
            qty_broken: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts {
            available: self.qty_available,
            rented: self.qty_rented,
            broken: self.qty_broken,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.qty_total == self.qty_available + self.qty_rented + self.qty_broken
    }

    /// Apply a delta, refusing to take any counter below zero.
    pub fn apply(&mut self, delta: &CounterDelta) -> Result<(), String> {
        let next = (
            self.qty_total + delta.total,
            self.qty_available + delta.available,
            self.qty_rented + delta.rented,
            self.qty_broken + delta.broken,
        );
        if next.0 < 0 || next.1 < 0 || next.2 < 0 || next.3 < 0 {
            return Err(format!(
                "counter underflow for facility {} {}",
                self.facility_id, self.device_type
            ));
        }
        self.qty_total = next.0;
        self.qty_available = next.1;
        self.qty_rented = next.2;
        self.qty_broken = next.3;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Counter movement caused by one item mutation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub total: i32,
    pub available: i32,
    pub rented: i32,
    pub broken: i32,
}

impl CounterDelta {
    fn bucket_mut(&mut self, bucket: StatusBucket) -> &mut i32 {
        match bucket {
            StatusBucket::Available => &mut self.available,
            StatusBucket::Rented => &mut self.rented,
            StatusBucket::Broken => &mut self.broken,
        }
    }

    /// Item status change. Moves inside the broken bucket are a no-op.
    pub fn transition(from: DeviceStatus, to: DeviceStatus) -> Self {
        let mut delta = Self::default();
        if from.bucket() != to.bucket() {
            *delta.bucket_mut(from.bucket()) -= 1;
            *delta.bucket_mut(to.bucket()) += 1;
        }
        delta
    }

    /// A newly registered item (always `available`)
    pub fn registration() -> Self {
        Self {
            total: 1,
            available: 1,
            ..Self::default()
        }
    }

    /// Removal of an item currently in `status`
    pub fn removal(status: DeviceStatus) -> Self {
        let mut delta = Self {
            total: -1,
            ..Self::default()
        };
        *delta.bucket_mut(status.bucket()) -= 1;
        delta
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Live item counts per bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusCounts {
    pub available: i32,
    pub rented: i32,
    pub broken: i32,
}

impl StatusCounts {
    pub fn total(&self) -> i32 {
        self.available + self.rented + self.broken
    }

    pub fn add(&mut self, status: DeviceStatus, count: i32) {
        match status.bucket() {
            StatusBucket::Available => self.available += count,
            StatusBucket::Rented => self.rented += count,
            StatusBucket::Broken => self.broken += count,
        }
    }
}

/// Difference found and corrected by counter reconciliation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AggregateDrift {
    pub device_type: DeviceType,
    pub recorded: StatusCounts,
    pub actual: StatusCounts,
}
