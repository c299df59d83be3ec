//! Repository layer: transactional access to the device inventory
//!
//! Every engine operation opens one [`UnitOfWork`] through an
//! [`InventoryStore`], performs all of its reads and writes on it and commits.
//! Dropping a unit of work without committing rolls everything back.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppResult,
    models::{
        aggregate::{CounterDelta, DeviceTypeAggregate, StatusCounts},
        device_item::{CreateDeviceItem, DeviceItem, DeviceItemPatch, DeviceItemQuery},
        enums::{DeviceStatus, DeviceType, RentalStatus},
        rental::{NewRental, Rental, RentalDevice, RentalDeviceBinding},
        repair::{NewRepair, Repair, RepairPatch, RepairQuery},
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Shared handle to the configured store
pub type SharedStore = Arc<dyn InventoryStore>;

/// Entry point to the transactional store
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Open a new unit of work (database transaction)
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>>;
}

/// All reads and writes the engine performs inside one transaction
#[async_trait]
pub trait UnitOfWork: Send {
    // ---- Device items ----

    async fn get_item(&mut self, facility_id: i64, item_id: i64) -> AppResult<Option<DeviceItem>>;

    /// Same as `get_item` but holds a row lock until commit
    async fn lock_item(&mut self, facility_id: i64, item_id: i64) -> AppResult<Option<DeviceItem>>;

    async fn list_items(&mut self, facility_id: i64, query: &DeviceItemQuery) -> AppResult<Vec<DeviceItem>>;

    /// Insert an `available` item. Duplicate device code is a Conflict.
    async fn insert_item(
        &mut self,
        facility_id: i64,
        data: &CreateDeviceItem,
        registered_at: DateTime<Utc>,
    ) -> AppResult<DeviceItem>;

    async fn update_item_fields(&mut self, item_id: i64, patch: &DeviceItemPatch) -> AppResult<DeviceItem>;

    async fn delete_item(&mut self, item_id: i64) -> AppResult<()>;

    /// Lock `available` items of a type in ascending id order.
    ///
    /// With `ids`, only those ids are considered; otherwise the first
    /// `limit` candidates are returned.
    async fn lock_available_items(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        ids: Option<&[i64]>,
        limit: i64,
    ) -> AppResult<Vec<DeviceItem>>;

    /// Lock `rented` items of a type that no open item-bound rental line claims
    async fn lock_unclaimed_rented_items(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        limit: i64,
    ) -> AppResult<Vec<DeviceItem>>;

    /// Guarded status change: fails with ConcurrencyConflict unless the item
    /// is currently in `from`.
    async fn set_item_status(&mut self, item_id: i64, from: DeviceStatus, to: DeviceStatus) -> AppResult<()>;

    /// Live item counts per device type for a facility
    async fn item_status_counts(&mut self, facility_id: i64) -> AppResult<Vec<(DeviceType, StatusCounts)>>;

    // ---- Aggregate counters ----

    async fn get_aggregate(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
    ) -> AppResult<Option<DeviceTypeAggregate>>;

    async fn list_aggregates(&mut self, facility_id: i64) -> AppResult<Vec<DeviceTypeAggregate>>;

    /// Same as `get_aggregate` but holds a row lock until commit.
    ///
    /// Rental creation takes this lock per device type before touching items.
    async fn lock_aggregate(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
    ) -> AppResult<Option<DeviceTypeAggregate>>;

    /// Add a delta to one aggregate row, creating it when missing.
    async fn apply_counter_delta(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        delta: &CounterDelta,
    ) -> AppResult<()>;

    /// Replace an aggregate with recounted values
    async fn overwrite_aggregate(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        counts: &StatusCounts,
    ) -> AppResult<()>;

    // ---- Rentals ----

    async fn insert_rental(&mut self, rental: &NewRental) -> AppResult<Rental>;

    async fn insert_rental_device(
        &mut self,
        rental_id: i64,
        device_type: DeviceType,
        binding: RentalDeviceBinding,
    ) -> AppResult<RentalDevice>;

    async fn get_rental(&mut self, facility_id: i64, rental_id: i64) -> AppResult<Option<Rental>>;

    async fn lock_rental(&mut self, facility_id: i64, rental_id: i64) -> AppResult<Option<Rental>>;

    async fn rental_devices(&mut self, rental_id: i64) -> AppResult<Vec<RentalDevice>>;

    async fn list_rentals(
        &mut self,
        facility_id: i64,
        status: Option<RentalStatus>,
        open_only: bool,
    ) -> AppResult<Vec<Rental>>;

    /// Guarded: fails with ConcurrencyConflict if the rental is already returned
    async fn mark_rental_returned(
        &mut self,
        rental_id: i64,
        returned_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> AppResult<Rental>;

    async fn mark_rental_device_returned(
        &mut self,
        rental_device_id: i64,
        returned_at: DateTime<Utc>,
        condition: Option<&str>,
    ) -> AppResult<()>;

    /// Persist `연체` on active rentals due at or before `due_cutoff`
    async fn mark_rentals_overdue(&mut self, facility_id: i64, due_cutoff: DateTime<Utc>) -> AppResult<u64>;

    // ---- Repairs ----

    /// Duplicate open repair for the item is a Conflict.
    async fn insert_repair(&mut self, repair: &NewRepair) -> AppResult<Repair>;

    async fn get_repair(&mut self, facility_id: i64, repair_id: i64) -> AppResult<Option<Repair>>;

    async fn lock_repair(&mut self, facility_id: i64, repair_id: i64) -> AppResult<Option<Repair>>;

    async fn find_open_repair(&mut self, item_id: i64) -> AppResult<Option<Repair>>;

    async fn list_repairs(&mut self, facility_id: i64, query: &RepairQuery) -> AppResult<Vec<Repair>>;

    async fn update_repair(&mut self, repair_id: i64, patch: &RepairPatch) -> AppResult<Repair>;

    async fn delete_repair(&mut self, repair_id: i64) -> AppResult<()>;

    // ---- Transaction ----

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
