//! Shared domain enums (stored as Postgres enum types)

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// DeviceType
// ---------------------------------------------------------------------------

/// Kind of assistive device
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "device_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    ArGlass,
    BoneConduction,
    Smartphone,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceType::ArGlass => "AR_GLASS",
            DeviceType::BoneConduction => "BONE_CONDUCTION",
            DeviceType::Smartphone => "SMARTPHONE",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// DeviceStatus
// ---------------------------------------------------------------------------

/// Status of one physical device item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "device_status", rename_all = "lowercase")]
pub enum DeviceStatus {
    Available,
    Rented,
    Broken,
    Maintenance,
}

/// Aggregate counter bucket a device status is counted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBucket {
    Available,
    Rented,
    Broken,
}

impl DeviceStatus {
    /// `broken` and `maintenance` share the broken counter.
    pub fn bucket(self) -> StatusBucket {
        match self {
            DeviceStatus::Available => StatusBucket::Available,
            DeviceStatus::Rented => StatusBucket::Rented,
            DeviceStatus::Broken | DeviceStatus::Maintenance => StatusBucket::Broken,
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceStatus::Available => "available",
            DeviceStatus::Rented => "rented",
            DeviceStatus::Broken => "broken",
            DeviceStatus::Maintenance => "maintenance",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// RentalStatus
// ---------------------------------------------------------------------------

/// Rental lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "rental_status")]
pub enum RentalStatus {
    #[serde(rename = "대여중")]
    #[sqlx(rename = "대여중")]
    Active,
    #[serde(rename = "반납완료")]
    #[sqlx(rename = "반납완료")]
    Returned,
    #[serde(rename = "연체")]
    #[sqlx(rename = "연체")]
    Overdue,
}

impl RentalStatus {
    /// Active and overdue rentals still hold their devices.
    pub fn is_open(self) -> bool {
        !matches!(self, RentalStatus::Returned)
    }
}

impl std::fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RentalStatus::Active => "대여중",
            RentalStatus::Returned => "반납완료",
            RentalStatus::Overdue => "연체",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// RepairStatus
// ---------------------------------------------------------------------------

/// Repair case status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "repair_status")]
pub enum RepairStatus {
    #[serde(rename = "신고접수")]
    #[sqlx(rename = "신고접수")]
    Reported,
    #[serde(rename = "수리중")]
    #[sqlx(rename = "수리중")]
    InRepair,
    #[serde(rename = "수리완료")]
    #[sqlx(rename = "수리완료")]
    Completed,
}

impl RepairStatus {
    pub fn is_open(self) -> bool {
        !matches!(self, RepairStatus::Completed)
    }
}

impl std::fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RepairStatus::Reported => "신고접수",
            RepairStatus::InRepair => "수리중",
            RepairStatus::Completed => "수리완료",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maintenance_counts_as_broken() {
        assert_eq!(DeviceStatus::Maintenance.bucket(), StatusBucket::Broken);
        assert_eq!(DeviceStatus::Broken.bucket(), StatusBucket::Broken);
        assert_eq!(DeviceStatus::Rented.bucket(), StatusBucket::Rented);
    }

    #[test]
    fn test_korean_status_labels_serialize() {
        assert_eq!(serde_json::to_string(&RentalStatus::Active).unwrap(), "\"대여중\"");
        assert_eq!(serde_json::to_string(&RepairStatus::Completed).unwrap(), "\"수리완료\"");
        let parsed: RentalStatus = serde_json::from_str("\"연체\"").unwrap();
        assert_eq!(parsed, RentalStatus::Overdue);
    }

    #[test]
    fn test_device_type_wire_names() {
        assert_eq!(serde_json::to_string(&DeviceType::ArGlass).unwrap(), "\"AR_GLASS\"");
        let parsed: DeviceType = serde_json::from_str("\"BONE_CONDUCTION\"").unwrap();
        assert_eq!(parsed, DeviceType::BoneConduction);
    }

    #[test]
    fn test_open_states() {
        assert!(RentalStatus::Overdue.is_open());
        assert!(!RentalStatus::Returned.is_open());
        assert!(RepairStatus::InRepair.is_open());
        assert!(!RepairStatus::Completed.is_open());
    }
}
