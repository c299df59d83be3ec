//! In-process store
//!
//! Transactions are serialised through one async mutex: `begin` takes the lock
//! and works on a copy of the state, `commit` writes the copy back. Dropping
//! the unit of work discards the copy.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{InventoryStore, UnitOfWork};
use crate::{
    error::{AppError, AppResult},
    models::{
        aggregate::{CounterDelta, DeviceTypeAggregate, StatusCounts},
        device_item::{CreateDeviceItem, DeviceItem, DeviceItemPatch, DeviceItemQuery},
        enums::{DeviceStatus, DeviceType, RentalStatus, RepairStatus},
        rental::{NewRental, Rental, RentalDevice, RentalDeviceBinding},
        repair::{NewRepair, Repair, RepairPatch, RepairQuery},
    },
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    last_id: i64,
    items: BTreeMap<i64, DeviceItem>,
    aggregates: BTreeMap<(i64, DeviceType), DeviceTypeAggregate>,
    rentals: BTreeMap<i64, Rental>,
    rental_devices: BTreeMap<i64, RentalDevice>,
    repairs: BTreeMap<i64, Repair>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    /// Device codes are unique across facilities
    fn code_taken(&self, device_code: &str, except: Option<i64>) -> bool {
        self.items
            .values()
            .any(|item| item.device_code == device_code && Some(item.id) != except)
    }

    fn is_claimed(&self, item_id: i64) -> bool {
        self.rental_devices
            .values()
            .any(|rd| !rd.is_returned && rd.binding.device_item_id() == Some(item_id))
    }
}

/// Store keeping everything in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    // ---- Device items ----

    async fn get_item(&mut self, facility_id: i64, item_id: i64) -> AppResult<Option<DeviceItem>> {
        Ok(self
            .working
            .items
            .get(&item_id)
            .filter(|item| item.facility_id == facility_id)
            .cloned())
    }

    async fn lock_item(&mut self, facility_id: i64, item_id: i64) -> AppResult<Option<DeviceItem>> {
        self.get_item(facility_id, item_id).await
    }

    async fn list_items(&mut self, facility_id: i64, query: &DeviceItemQuery) -> AppResult<Vec<DeviceItem>> {
        Ok(self
            .working
            .items
            .values()
            .filter(|item| item.facility_id == facility_id && query.matches(item))
            .cloned()
            .collect())
    }

    async fn insert_item(
        &mut self,
        facility_id: i64,
        data: &CreateDeviceItem,
        registered_at: DateTime<Utc>,
    ) -> AppResult<DeviceItem> {
        if self.working.code_taken(&data.device_code, None) {
            return Err(AppError::Conflict(format!(
                "Device code '{}' already exists",
                data.device_code
            )));
        }
        let item = DeviceItem {
            id: self.working.next_id(),
            facility_id,
            device_type: data.device_type,
            device_code: data.device_code.clone(),
            serial_number: data.serial_number.clone(),
            status: DeviceStatus::Available,
            registered_at,
            notes: data.notes.clone(),
            updated_at: registered_at,
        };
        self.working.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn update_item_fields(&mut self, item_id: i64, patch: &DeviceItemPatch) -> AppResult<DeviceItem> {
        if let Some(code) = &patch.device_code {
            if self.working.code_taken(code, Some(item_id)) {
                return Err(AppError::Conflict(format!("Device code '{}' already exists", code)));
            }
        }
        let item = self
            .working
            .items
            .get_mut(&item_id)
            .ok_or_else(|| AppError::NotFound(format!("Device item {} not found", item_id)))?;
        if let Some(code) = &patch.device_code {
            item.device_code = code.clone();
        }
        if let Some(serial) = &patch.serial_number {
            item.serial_number = Some(serial.clone());
        }
        if let Some(notes) = &patch.notes {
            item.notes = Some(notes.clone());
        }
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn delete_item(&mut self, item_id: i64) -> AppResult<()> {
        if self.working.items.remove(&item_id).is_none() {
            return Err(AppError::NotFound(format!("Device item {} not found", item_id)));
        }
        // Mirror the foreign keys: repairs cascade, rental lines lose the binding
        self.working.repairs.retain(|_, r| r.device_item_id != item_id);
        for rd in self.working.rental_devices.values_mut() {
            if rd.binding.device_item_id() == Some(item_id) {
                rd.binding = RentalDeviceBinding::Legacy { quantity: 1 };
            }
        }
        Ok(())
    }

    async fn lock_available_items(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        ids: Option<&[i64]>,
        limit: i64,
    ) -> AppResult<Vec<DeviceItem>> {
        let candidates = self.working.items.values().filter(|item| {
            item.facility_id == facility_id
                && item.device_type == device_type
                && item.status == DeviceStatus::Available
        });
        let items = match ids {
            Some(ids) => candidates.filter(|item| ids.contains(&item.id)).cloned().collect(),
            None => candidates.take(limit.max(0) as usize).cloned().collect(),
        };
        Ok(items)
    }

    async fn lock_unclaimed_rented_items(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        limit: i64,
    ) -> AppResult<Vec<DeviceItem>> {
        let state = &self.working;
        Ok(state
            .items
            .values()
            .filter(|item| {
                item.facility_id == facility_id
                    && item.device_type == device_type
                    && item.status == DeviceStatus::Rented
                    && !state.is_claimed(item.id)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn set_item_status(&mut self, item_id: i64, from: DeviceStatus, to: DeviceStatus) -> AppResult<()> {
        match self.working.items.get_mut(&item_id) {
            Some(item) if item.status == from => {
                item.status = to;
                item.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(AppError::ConcurrencyConflict(format!(
                "Device item {} is no longer {}",
                item_id, from
            ))),
        }
    }

    async fn item_status_counts(&mut self, facility_id: i64) -> AppResult<Vec<(DeviceType, StatusCounts)>> {
        let mut counts: BTreeMap<DeviceType, StatusCounts> = BTreeMap::new();
        for item in self.working.items.values().filter(|i| i.facility_id == facility_id) {
            counts.entry(item.device_type).or_default().add(item.status, 1);
        }
        Ok(counts.into_iter().collect())
    }

    // ---- Aggregate counters ----

    async fn get_aggregate(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
    ) -> AppResult<Option<DeviceTypeAggregate>> {
        Ok(self.working.aggregates.get(&(facility_id, device_type)).cloned())
    }

    async fn list_aggregates(&mut self, facility_id: i64) -> AppResult<Vec<DeviceTypeAggregate>> {
        Ok(self
            .working
            .aggregates
            .values()
            .filter(|agg| agg.facility_id == facility_id)
            .cloned()
            .collect())
    }

    async fn lock_aggregate(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
    ) -> AppResult<Option<DeviceTypeAggregate>> {
        self.get_aggregate(facility_id, device_type).await
    }

    async fn apply_counter_delta(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        delta: &CounterDelta,
    ) -> AppResult<()> {
        self.working
            .aggregates
            .entry((facility_id, device_type))
            .or_insert_with(|| DeviceTypeAggregate::empty(facility_id, device_type))
            .apply(delta)
            .map_err(AppError::Internal)
    }

    async fn overwrite_aggregate(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        counts: &StatusCounts,
    ) -> AppResult<()> {
        let agg = self
            .working
            .aggregates
            .entry((facility_id, device_type))
            .or_insert_with(|| DeviceTypeAggregate::empty(facility_id, device_type));
        agg.qty_total = counts.total();
        agg.qty_available = counts.available;
        agg.qty_rented = counts.rented;
        agg.qty_broken = counts.broken;
        agg.updated_at = Utc::now();
        Ok(())
    }

    // ---- Rentals ----

    async fn insert_rental(&mut self, rental: &NewRental) -> AppResult<Rental> {
        let row = Rental {
            id: self.working.next_id(),
            facility_id: rental.facility_id,
            borrower_name: rental.borrower_name.clone(),
            borrower_phone: rental.borrower_phone.clone(),
            borrower_birth_date: rental.borrower_birth_date,
            rental_date: rental.rental_date,
            expected_return_date: rental.expected_return_date,
            actual_return_date: None,
            status: RentalStatus::Active,
            notes: rental.notes.clone(),
            created_at: Utc::now(),
        };
        self.working.rentals.insert(row.id, row.clone());
        Ok(row)
    }

    async fn insert_rental_device(
        &mut self,
        rental_id: i64,
        device_type: DeviceType,
        binding: RentalDeviceBinding,
    ) -> AppResult<RentalDevice> {
        if let Some(item_id) = binding.device_item_id() {
            if self.working.is_claimed(item_id) {
                return Err(AppError::ConcurrencyConflict(format!(
                    "Device item {} is already bound to an open rental",
                    item_id
                )));
            }
        }
        let row = RentalDevice {
            id: self.working.next_id(),
            rental_id,
            device_type,
            binding,
            is_returned: false,
            returned_at: None,
            return_condition: None,
        };
        self.working.rental_devices.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_rental(&mut self, facility_id: i64, rental_id: i64) -> AppResult<Option<Rental>> {
        Ok(self
            .working
            .rentals
            .get(&rental_id)
            .filter(|r| r.facility_id == facility_id)
            .cloned())
    }

    async fn lock_rental(&mut self, facility_id: i64, rental_id: i64) -> AppResult<Option<Rental>> {
        self.get_rental(facility_id, rental_id).await
    }

    async fn rental_devices(&mut self, rental_id: i64) -> AppResult<Vec<RentalDevice>> {
        Ok(self
            .working
            .rental_devices
            .values()
            .filter(|rd| rd.rental_id == rental_id)
            .cloned()
            .collect())
    }

    async fn list_rentals(
        &mut self,
        facility_id: i64,
        status: Option<RentalStatus>,
        open_only: bool,
    ) -> AppResult<Vec<Rental>> {
        Ok(self
            .working
            .rentals
            .values()
            .filter(|r| {
                r.facility_id == facility_id
                    && status.map_or(true, |s| s == r.status)
                    && (!open_only || r.status.is_open())
            })
            .cloned()
            .collect())
    }

    async fn mark_rental_returned(
        &mut self,
        rental_id: i64,
        returned_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> AppResult<Rental> {
        match self.working.rentals.get_mut(&rental_id) {
            Some(rental) if rental.status.is_open() => {
                rental.status = RentalStatus::Returned;
                rental.actual_return_date = Some(returned_at);
                if let Some(notes) = notes {
                    rental.notes = Some(notes.to_string());
                }
                Ok(rental.clone())
            }
            _ => Err(AppError::ConcurrencyConflict(format!(
                "Rental {} was returned concurrently",
                rental_id
            ))),
        }
    }

    async fn mark_rental_device_returned(
        &mut self,
        rental_device_id: i64,
        returned_at: DateTime<Utc>,
        condition: Option<&str>,
    ) -> AppResult<()> {
        match self.working.rental_devices.get_mut(&rental_device_id) {
            Some(rd) if !rd.is_returned => {
                rd.is_returned = true;
                rd.returned_at = Some(returned_at);
                rd.return_condition = condition.map(str::to_string);
                Ok(())
            }
            _ => Err(AppError::ConcurrencyConflict(format!(
                "Rental line {} was returned concurrently",
                rental_device_id
            ))),
        }
    }

    async fn mark_rentals_overdue(&mut self, facility_id: i64, due_cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut updated = 0;
        for rental in self.working.rentals.values_mut() {
            if rental.facility_id == facility_id
                && rental.status == RentalStatus::Active
                && rental.expected_return_date <= due_cutoff
            {
                rental.status = RentalStatus::Overdue;
                updated += 1;
            }
        }
        Ok(updated)
    }

    // ---- Repairs ----

    async fn insert_repair(&mut self, repair: &NewRepair) -> AppResult<Repair> {
        if self.find_open_repair(repair.device_item_id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "Device item {} already has an open repair",
                repair.device_item_id
            )));
        }
        let row = Repair {
            id: self.working.next_id(),
            facility_id: repair.facility_id,
            device_item_id: repair.device_item_id,
            device_type: repair.device_type,
            issue_description: repair.issue_description.clone(),
            status: RepairStatus::Reported,
            cost: repair.cost,
            vendor: repair.vendor.clone(),
            memo: repair.memo.clone(),
            started_at: repair.started_at,
            completed_at: None,
        };
        self.working.repairs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_repair(&mut self, facility_id: i64, repair_id: i64) -> AppResult<Option<Repair>> {
        Ok(self
            .working
            .repairs
            .get(&repair_id)
            .filter(|r| r.facility_id == facility_id)
            .cloned())
    }

    async fn lock_repair(&mut self, facility_id: i64, repair_id: i64) -> AppResult<Option<Repair>> {
        self.get_repair(facility_id, repair_id).await
    }

    async fn find_open_repair(&mut self, item_id: i64) -> AppResult<Option<Repair>> {
        Ok(self
            .working
            .repairs
            .values()
            .find(|r| r.device_item_id == item_id && r.status.is_open())
            .cloned())
    }

    async fn list_repairs(&mut self, facility_id: i64, query: &RepairQuery) -> AppResult<Vec<Repair>> {
        Ok(self
            .working
            .repairs
            .values()
            .filter(|r| r.facility_id == facility_id && query.matches(r))
            .cloned()
            .collect())
    }

    async fn update_repair(&mut self, repair_id: i64, patch: &RepairPatch) -> AppResult<Repair> {
        if patch.status.is_open() {
            let item_id = self
                .working
                .repairs
                .get(&repair_id)
                .map(|r| r.device_item_id)
                .ok_or_else(|| AppError::NotFound(format!("Repair {} not found", repair_id)))?;
            let other_open = self
                .working
                .repairs
                .values()
                .any(|r| r.id != repair_id && r.device_item_id == item_id && r.status.is_open());
            if other_open {
                return Err(AppError::Conflict(format!(
                    "Repair {} would open a second repair for its item",
                    repair_id
                )));
            }
        }
        let repair = self
            .working
            .repairs
            .get_mut(&repair_id)
            .ok_or_else(|| AppError::NotFound(format!("Repair {} not found", repair_id)))?;
        repair.status = patch.status;
        repair.issue_description = patch.issue_description.clone();
        repair.cost = patch.cost;
        repair.vendor = patch.vendor.clone();
        repair.memo = patch.memo.clone();
        repair.completed_at = patch.completed_at;
        Ok(repair.clone())
    }

    async fn delete_repair(&mut self, repair_id: i64) -> AppResult<()> {
        if self.working.repairs.remove(&repair_id).is_none() {
            return Err(AppError::NotFound(format!("Repair {} not found", repair_id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
