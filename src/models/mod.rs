//! Data models for the device rental engine

pub mod aggregate;
pub mod device_item;
pub mod enums;
pub mod rental;
pub mod repair;

// Re-export commonly used types
pub use aggregate::{CounterDelta, DeviceTypeAggregate};
pub use device_item::DeviceItem;
pub use enums::{DeviceStatus, DeviceType, RentalStatus, RepairStatus};
pub use rental::{Rental, RentalDetails, RentalDevice, RentalDeviceBinding};
pub use repair::Repair;
