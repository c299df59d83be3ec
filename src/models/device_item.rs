//! Device item (one physical unit) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use super::enums::{DeviceStatus, DeviceType};

/// Device item record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct DeviceItem {
    pub id: i64,
    pub facility_id: i64,
    pub device_type: DeviceType,
    /// Unique device code (label printed on the unit)
    pub device_code: String,
    pub serial_number: Option<String>,
    pub status: DeviceStatus,
    pub registered_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Register device item request. New items always start `available`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateDeviceItem {
    pub device_type: DeviceType,
    #[validate(length(min = 1, max = 64, message = "Device code must be 1-64 characters"))]
    pub device_code: String,
    #[validate(length(max = 128))]
    pub serial_number: Option<String>,
    pub notes: Option<String>,
}

/// Update device item request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateDeviceItem {
    #[validate(length(min = 1, max = 64, message = "Device code must be 1-64 characters"))]
    pub device_code: Option<String>,
    #[validate(length(max = 128))]
    pub serial_number: Option<String>,
    /// Only `available`, `broken` and `maintenance` may be set here
    pub status: Option<DeviceStatus>,
    pub notes: Option<String>,
}

/// Device item list filters
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct DeviceItemQuery {
    pub device_type: Option<DeviceType>,
    pub status: Option<DeviceStatus>,
}

impl DeviceItemQuery {
    pub fn matches(&self, item: &DeviceItem) -> bool {
        self.device_type.map_or(true, |t| t == item.device_type)
            && self.status.map_or(true, |s| s == item.status)
    }
}

/// Field changes written by the store (status goes through guarded transitions)
#[derive(Debug, Clone, Default)]
pub struct DeviceItemPatch {
    pub device_code: Option<String>,
    pub serial_number: Option<String>,
    pub notes: Option<String>,
}

impl From<&UpdateDeviceItem> for DeviceItemPatch {
    fn from(data: &UpdateDeviceItem) -> Self {
        Self {
            device_code: data.device_code.clone(),
            serial_number: data.serial_number.clone(),
            notes: data.notes.clone(),
        }
    }
}

impl DeviceItemPatch {
    pub fn is_empty(&self) -> bool {
        self.device_code.is_none() && self.serial_number.is_none() && self.notes.is_none()
    }
}
