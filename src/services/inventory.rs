//! Device item store and aggregate counter maintenance

use std::collections::BTreeMap;

use chrono::Utc;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        aggregate::{AggregateDrift, CounterDelta, DeviceTypeAggregate, StatusCounts},
        device_item::{CreateDeviceItem, DeviceItem, DeviceItemPatch, DeviceItemQuery, UpdateDeviceItem},
        enums::{DeviceStatus, DeviceType},
    },
    repository::{SharedStore, UnitOfWork},
};

/// Move an item to `to` and apply the matching counter delta in the same unit of work.
///
/// The status write is guarded on the item's current status.
pub(crate) async fn move_item(uow: &mut dyn UnitOfWork, item: &DeviceItem, to: DeviceStatus) -> AppResult<()> {
    if item.status == to {
        return Ok(());
    }
    uow.set_item_status(item.id, item.status, to).await?;
    let delta = CounterDelta::transition(item.status, to);
    if !delta.is_zero() {
        uow.apply_counter_delta(item.facility_id, item.device_type, &delta).await?;
    }
    Ok(())
}

/// Compare recorded aggregates with the live item set
async fn compute_drift(uow: &mut dyn UnitOfWork, facility_id: i64) -> AppResult<Vec<AggregateDrift>> {
    let mut actual: BTreeMap<DeviceType, StatusCounts> =
        uow.item_status_counts(facility_id).await?.into_iter().collect();
    let mut recorded: BTreeMap<DeviceType, (StatusCounts, i32)> = BTreeMap::new();
    for agg in uow.list_aggregates(facility_id).await? {
        recorded.insert(agg.device_type, (agg.counts(), agg.qty_total));
        actual.entry(agg.device_type).or_default();
    }

    let drift = actual
        .into_iter()
        .filter_map(|(device_type, actual)| {
            let (counts, total) = recorded.get(&device_type).copied().unwrap_or_default();
            if counts == actual && total == actual.total() {
                None
            } else {
                Some(AggregateDrift {
                    device_type,
                    recorded: counts,
                    actual,
                })
            }
        })
        .collect();
    Ok(drift)
}

#[derive(Clone)]
pub struct InventoryService {
    store: SharedStore,
}

impl InventoryService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Open and drop a unit of work to prove the store is reachable
    pub async fn check_store(&self) -> AppResult<()> {
        self.store.begin().await.map(|_| ())
    }

    /// Register a new device item (starts `available`)
    pub async fn create_item(&self, facility_id: i64, data: &CreateDeviceItem) -> AppResult<DeviceItem> {
        data.validate()?;

        let mut uow = self.store.begin().await?;
        let item = uow.insert_item(facility_id, data, Utc::now()).await?;
        uow.apply_counter_delta(facility_id, item.device_type, &CounterDelta::registration())
            .await?;
        uow.commit().await?;

        tracing::info!(
            facility_id,
            item_id = item.id,
            "Registered {} device {}",
            item.device_type,
            item.device_code
        );
        Ok(item)
    }

    pub async fn get_item(&self, facility_id: i64, item_id: i64) -> AppResult<DeviceItem> {
        let mut uow = self.store.begin().await?;
        uow.get_item(facility_id, item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Device item {} not found", item_id)))
    }

    pub async fn list_items(&self, facility_id: i64, query: &DeviceItemQuery) -> AppResult<Vec<DeviceItem>> {
        let mut uow = self.store.begin().await?;
        uow.list_items(facility_id, query).await
    }

    /// Update code, serial, notes and manual status.
    ///
    /// Status may only move between `available`, `broken` and `maintenance`;
    /// `rented` belongs to the rental engine.
    pub async fn update_item(
        &self,
        facility_id: i64,
        item_id: i64,
        data: &UpdateDeviceItem,
    ) -> AppResult<DeviceItem> {
        data.validate()?;

        let mut uow = self.store.begin().await?;
        let item = uow
            .lock_item(facility_id, item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Device item {} not found", item_id)))?;

        if let Some(status) = data.status.filter(|s| *s != item.status) {
            if status == DeviceStatus::Rented || item.status == DeviceStatus::Rented {
                return Err(AppError::InvalidState(format!(
                    "Device item {} cannot move from {} to {} outside a rental",
                    item_id, item.status, status
                )));
            }
            if status == DeviceStatus::Available && uow.find_open_repair(item_id).await?.is_some() {
                return Err(AppError::InvalidState(format!(
                    "Device item {} has an open repair; complete it instead",
                    item_id
                )));
            }
            move_item(uow.as_mut(), &item, status).await?;
        }

        let patch = DeviceItemPatch::from(data);
        let updated = if patch.is_empty() {
            uow.get_item(facility_id, item_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Device item {} not found", item_id)))?
        } else {
            uow.update_item_fields(item_id, &patch).await?
        };
        uow.commit().await?;

        tracing::info!(facility_id, item_id, "Updated device item");
        Ok(updated)
    }

    /// Delete a device item. Rented items cannot be deleted.
    pub async fn delete_item(&self, facility_id: i64, item_id: i64) -> AppResult<()> {
        let mut uow = self.store.begin().await?;
        let item = uow
            .lock_item(facility_id, item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Device item {} not found", item_id)))?;

        if item.status == DeviceStatus::Rented {
            return Err(AppError::InvalidState(format!(
                "Device item {} is rented and cannot be deleted",
                item_id
            )));
        }

        uow.delete_item(item_id).await?;
        uow.apply_counter_delta(facility_id, item.device_type, &CounterDelta::removal(item.status))
            .await?;
        uow.commit().await?;

        tracing::info!(facility_id, item_id, "Deleted {} device {}", item.device_type, item.device_code);
        Ok(())
    }

    /// Counter snapshot for one type; zeroes when the facility never registered it
    pub async fn get_aggregate(&self, facility_id: i64, device_type: DeviceType) -> AppResult<DeviceTypeAggregate> {
        let mut uow = self.store.begin().await?;
        Ok(uow
            .get_aggregate(facility_id, device_type)
            .await?
            .unwrap_or_else(|| DeviceTypeAggregate::empty(facility_id, device_type)))
    }

    pub async fn list_aggregates(&self, facility_id: i64) -> AppResult<Vec<DeviceTypeAggregate>> {
        let mut uow = self.store.begin().await?;
        uow.list_aggregates(facility_id).await
    }

    /// Read-only comparison of counters against item statuses
    pub async fn audit_aggregates(&self, facility_id: i64) -> AppResult<Vec<AggregateDrift>> {
        let mut uow = self.store.begin().await?;
        compute_drift(uow.as_mut(), facility_id).await
    }

    /// Recount every aggregate of a facility from its items and overwrite drifted rows
    pub async fn reconcile_aggregates(&self, facility_id: i64) -> AppResult<Vec<AggregateDrift>> {
        let mut uow = self.store.begin().await?;
        let drift = compute_drift(uow.as_mut(), facility_id).await?;
        for entry in &drift {
            uow.overwrite_aggregate(facility_id, entry.device_type, &entry.actual)
                .await?;
        }
        uow.commit().await?;

        for entry in &drift {
            tracing::warn!(
                facility_id,
                "Corrected {} counters: recorded {:?}, actual {:?}",
                entry.device_type,
                entry.recorded,
                entry.actual
            );
        }
        Ok(drift)
    }
}
