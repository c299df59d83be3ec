//! Rental (loan of one or more device items) model and related types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use super::enums::{DeviceType, RentalStatus};

/// Rental record from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Rental {
    pub id: i64,
    pub facility_id: i64,
    pub borrower_name: String,
    pub borrower_phone: Option<String>,
    pub borrower_birth_date: Option<NaiveDate>,
    pub rental_date: DateTime<Utc>,
    pub expected_return_date: DateTime<Utc>,
    pub actual_return_date: Option<DateTime<Utc>>,
    pub status: RentalStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a rental line is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RentalDeviceBinding {
    /// Line reserved one specific device item
    Item { device_item_id: i64 },
    /// Bulk line from before item tracking: only a type and a quantity
    Legacy { quantity: i32 },
}

impl RentalDeviceBinding {
    pub fn quantity(&self) -> i32 {
        match self {
            RentalDeviceBinding::Item { .. } => 1,
            RentalDeviceBinding::Legacy { quantity } => *quantity,
        }
    }

    pub fn device_item_id(&self) -> Option<i64> {
        match self {
            RentalDeviceBinding::Item { device_item_id } => Some(*device_item_id),
            RentalDeviceBinding::Legacy { .. } => None,
        }
    }
}

/// Rental line (junction between a rental and a device item)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RentalDevice {
    pub id: i64,
    pub rental_id: i64,
    pub device_type: DeviceType,
    pub binding: RentalDeviceBinding,
    pub is_returned: bool,
    pub returned_at: Option<DateTime<Utc>>,
    pub return_condition: Option<String>,
}

/// Raw rental_devices row
#[derive(Debug, Clone, FromRow)]
pub struct RentalDeviceRow {
    pub id: i64,
    pub rental_id: i64,
    pub device_item_id: Option<i64>,
    pub device_type: DeviceType,
    pub quantity: i32,
    pub is_returned: bool,
    pub returned_at: Option<DateTime<Utc>>,
    pub return_condition: Option<String>,
}

impl From<RentalDeviceRow> for RentalDevice {
    fn from(row: RentalDeviceRow) -> Self {
        let binding = match row.device_item_id {
            Some(device_item_id) => RentalDeviceBinding::Item { device_item_id },
            None => RentalDeviceBinding::Legacy {
                quantity: row.quantity,
            },
        };
        Self {
            id: row.id,
            rental_id: row.rental_id,
            device_type: row.device_type,
            binding,
            is_returned: row.is_returned,
            returned_at: row.returned_at,
            return_condition: row.return_condition,
        }
    }
}

/// Overdue urgency bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OverdueSeverity {
    Warning,
    Critical,
}

/// Derived overdue information for an open rental
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OverdueInfo {
    pub elapsed_hours: i64,
    pub severity: OverdueSeverity,
}

/// Rental with its lines and derived overdue state
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RentalDetails {
    pub rental: Rental,
    pub devices: Vec<RentalDevice>,
    pub overdue: Option<OverdueInfo>,
}

/// One requested device type line
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RentalDeviceLine {
    pub device_type: DeviceType,
    #[validate(range(min = 1, max = 100, message = "Quantity must be between 1 and 100"))]
    pub quantity: i32,
    /// Specific items to reserve; when set its length must equal `quantity`
    pub device_item_ids: Option<Vec<i64>>,
}

/// Create rental request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[validate(schema(function = "validate_create_rental"))]
pub struct CreateRental {
    #[validate(length(min = 1, max = 100, message = "Borrower name is required"))]
    pub borrower_name: String,
    pub borrower_phone: Option<String>,
    pub borrower_birth_date: Option<NaiveDate>,
    /// Defaults to now
    pub rental_date: Option<DateTime<Utc>>,
    pub expected_return_date: DateTime<Utc>,
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "At least one device line is required"), nested)]
    pub devices: Vec<RentalDeviceLine>,
}

fn validate_create_rental(data: &CreateRental) -> Result<(), ValidationError> {
    if let Some(start) = data.rental_date {
        if start > data.expected_return_date {
            return Err(ValidationError::new("rental_window")
                .with_message("Rental date must not be after the expected return date".into()));
        }
    }

    let mut seen = std::collections::HashSet::new();
    for line in &data.devices {
        if let Some(ids) = &line.device_item_ids {
            if ids.len() != line.quantity as usize {
                return Err(ValidationError::new("device_item_ids")
                    .with_message("device_item_ids length must equal quantity".into()));
            }
            for id in ids {
                if !seen.insert(*id) {
                    return Err(ValidationError::new("device_item_ids")
                        .with_message(format!("Device item {} requested twice", id).into()));
                }
            }
        }
    }
    Ok(())
}

/// Return rental request
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ReturnRental {
    /// Defaults to now
    pub returned_at: Option<DateTime<Utc>>,
    pub return_condition: Option<String>,
    pub notes: Option<String>,
}

/// Rental list filters
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct RentalQuery {
    pub status: Option<RentalStatus>,
    pub overdue_only: Option<bool>,
}

/// Result of persisting overdue status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OverdueSweep {
    /// Rentals moved from `대여중` to `연체` by this run
    pub marked: u64,
}

/// Values written when a rental is inserted
#[derive(Debug, Clone)]
pub struct NewRental {
    pub facility_id: i64,
    pub borrower_name: String,
    pub borrower_phone: Option<String>,
    pub borrower_birth_date: Option<NaiveDate>,
    pub rental_date: DateTime<Utc>,
    pub expected_return_date: DateTime<Utc>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(lines: Vec<RentalDeviceLine>) -> CreateRental {
        let now = Utc::now();
        CreateRental {
            borrower_name: "Kim".to_string(),
            borrower_phone: None,
            borrower_birth_date: None,
            rental_date: Some(now),
            expected_return_date: now + Duration::days(7),
            notes: None,
            devices: lines,
        }
    }

    #[test]
    fn test_rejects_inverted_window() {
        let mut data = request(vec![RentalDeviceLine {
            device_type: DeviceType::ArGlass,
            quantity: 1,
            device_item_ids: None,
        }]);
        data.expected_return_date = Utc::now() - Duration::days(1);
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_lines_and_zero_quantity() {
        assert!(request(vec![]).validate().is_err());
        let data = request(vec![RentalDeviceLine {
            device_type: DeviceType::Smartphone,
            quantity: 0,
            device_item_ids: None,
        }]);
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_explicit_ids_must_match_quantity_and_be_unique() {
        let data = request(vec![RentalDeviceLine {
            device_type: DeviceType::ArGlass,
            quantity: 2,
            device_item_ids: Some(vec![4]),
        }]);
        assert!(data.validate().is_err());

        let data = request(vec![
            RentalDeviceLine {
                device_type: DeviceType::ArGlass,
                quantity: 1,
                device_item_ids: Some(vec![4]),
            },
            RentalDeviceLine {
                device_type: DeviceType::ArGlass,
                quantity: 1,
                device_item_ids: Some(vec![4]),
            },
        ]);
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_legacy_row_binding() {
        let row = RentalDeviceRow {
            id: 1,
            rental_id: 9,
            device_item_id: None,
            device_type: DeviceType::BoneConduction,
            quantity: 3,
            is_returned: false,
            returned_at: None,
            return_condition: None,
        };
        let device: RentalDevice = row.into();
        assert_eq!(device.binding, RentalDeviceBinding::Legacy { quantity: 3 });
        assert_eq!(device.binding.device_item_id(), None);
    }
}
