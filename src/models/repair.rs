//! Repair case model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use super::enums::{DeviceStatus, DeviceType, RepairStatus};

/// Repair record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Repair {
    pub id: i64,
    pub facility_id: i64,
    pub device_item_id: i64,
    pub device_type: DeviceType,
    pub issue_description: String,
    pub status: RepairStatus,
    pub cost: Option<Decimal>,
    pub vendor: Option<String>,
    pub memo: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Report a broken device
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateRepair {
    pub device_item_id: i64,
    /// Must match the item's registered type
    pub device_type: DeviceType,
    #[validate(length(min = 1, message = "Issue description is required"))]
    pub issue_description: String,
    pub cost: Option<Decimal>,
    #[validate(length(max = 100))]
    pub vendor: Option<String>,
    pub memo: Option<String>,
}

/// Update repair request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateRepair {
    pub status: Option<RepairStatus>,
    #[validate(length(min = 1))]
    pub issue_description: Option<String>,
    pub cost: Option<Decimal>,
    #[validate(length(max = 100))]
    pub vendor: Option<String>,
    pub memo: Option<String>,
    /// Explicit completion time; stamped automatically when absent
    pub completed_at: Option<DateTime<Utc>>,
}

/// Repair list filters
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct RepairQuery {
    pub status: Option<RepairStatus>,
    pub device_item_id: Option<i64>,
}

impl RepairQuery {
    pub fn matches(&self, repair: &Repair) -> bool {
        self.status.map_or(true, |s| s == repair.status)
            && self.device_item_id.map_or(true, |id| id == repair.device_item_id)
    }
}

/// Item flip required when a repair changes status.
///
/// Only crossing the open/completed boundary touches the item.
pub fn item_transition(from: RepairStatus, to: RepairStatus) -> Option<(DeviceStatus, DeviceStatus)> {
    match (from.is_open(), to.is_open()) {
        (true, false) => Some((DeviceStatus::Broken, DeviceStatus::Available)),
        (false, true) => Some((DeviceStatus::Available, DeviceStatus::Broken)),
        _ => None,
    }
}

/// Values written when a repair is inserted
#[derive(Debug, Clone)]
pub struct NewRepair {
    pub facility_id: i64,
    pub device_item_id: i64,
    pub device_type: DeviceType,
    pub issue_description: String,
    pub cost: Option<Decimal>,
    pub vendor: Option<String>,
    pub memo: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Resolved repair row after an update
#[derive(Debug, Clone)]
pub struct RepairPatch {
    pub status: RepairStatus,
    pub issue_description: String,
    pub cost: Option<Decimal>,
    pub vendor: Option<String>,
    pub memo: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_states_do_not_touch_item() {
        assert_eq!(item_transition(RepairStatus::Reported, RepairStatus::InRepair), None);
        assert_eq!(item_transition(RepairStatus::InRepair, RepairStatus::Reported), None);
        assert_eq!(item_transition(RepairStatus::Completed, RepairStatus::Completed), None);
    }

    #[test]
    fn test_completion_restores_item() {
        assert_eq!(
            item_transition(RepairStatus::InRepair, RepairStatus::Completed),
            Some((DeviceStatus::Broken, DeviceStatus::Available))
        );
        assert_eq!(
            item_transition(RepairStatus::Reported, RepairStatus::Completed),
            Some((DeviceStatus::Broken, DeviceStatus::Available))
        );
    }

    #[test]
    fn test_reopening_breaks_item_again() {
        assert_eq!(
            item_transition(RepairStatus::Completed, RepairStatus::InRepair),
            Some((DeviceStatus::Available, DeviceStatus::Broken))
        );
    }
}
