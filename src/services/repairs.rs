//! Repair workflow

use chrono::Utc;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        device_item::DeviceItem,
        enums::{DeviceStatus, RepairStatus, StatusBucket},
        repair::{item_transition, CreateRepair, NewRepair, Repair, RepairPatch, RepairQuery, UpdateRepair},
    },
    repository::{SharedStore, UnitOfWork},
};

use super::{inventory::move_item, retry_on_conflict};

#[derive(Clone)]
pub struct RepairsService {
    store: SharedStore,
    max_attempts: u32,
}

impl RepairsService {
    pub fn new(store: SharedStore, max_attempts: u32) -> Self {
        Self { store, max_attempts }
    }

    /// Report a device as broken and open a repair for it
    pub async fn create_repair(&self, facility_id: i64, data: &CreateRepair) -> AppResult<Repair> {
        data.validate()?;

        let repair = retry_on_conflict(self.max_attempts, "create_repair", move || {
            self.try_create_repair(facility_id, data)
        })
        .await?;

        tracing::info!(
            facility_id,
            repair_id = repair.id,
            item_id = repair.device_item_id,
            "Repair reported"
        );
        Ok(repair)
    }

    /// Rented items are rejected. An item already `broken` or in `maintenance`
    /// is adopted into the repair as `broken` without a counter change.
    async fn try_create_repair(&self, facility_id: i64, data: &CreateRepair) -> AppResult<Repair> {
        let mut uow = self.store.begin().await?;
        let item = locked_item(uow.as_mut(), facility_id, data.device_item_id).await?;

        if item.device_type != data.device_type {
            return Err(AppError::InvalidState(format!(
                "Device item {} is {}, not {}",
                item.id, item.device_type, data.device_type
            )));
        }
        if uow.find_open_repair(item.id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "Device item {} already has an open repair",
                item.id
            )));
        }
        if item.status == DeviceStatus::Rented {
            return Err(AppError::InvalidState(format!(
                "Device item {} is rented; return it before reporting a repair",
                item.id
            )));
        }
        move_item(uow.as_mut(), &item, DeviceStatus::Broken).await?;

        let repair = uow
            .insert_repair(&NewRepair {
                facility_id,
                device_item_id: item.id,
                device_type: item.device_type,
                issue_description: data.issue_description.clone(),
                cost: data.cost,
                vendor: data.vendor.clone(),
                memo: data.memo.clone(),
                started_at: Utc::now(),
            })
            .await?;
        uow.commit().await?;
        Ok(repair)
    }

    /// Update repair fields and status.
    ///
    /// Completing a repair makes the item available again; reopening a
    /// completed one breaks it again.
    pub async fn update_repair(&self, facility_id: i64, repair_id: i64, data: &UpdateRepair) -> AppResult<Repair> {
        data.validate()?;

        let repair = retry_on_conflict(self.max_attempts, "update_repair", move || {
            self.try_update_repair(facility_id, repair_id, data)
        })
        .await?;

        tracing::info!(facility_id, repair_id, "Repair updated to {}", repair.status);
        Ok(repair)
    }

    async fn try_update_repair(&self, facility_id: i64, repair_id: i64, data: &UpdateRepair) -> AppResult<Repair> {
        let mut uow = self.store.begin().await?;
        let repair = uow
            .lock_repair(facility_id, repair_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Repair {} not found", repair_id)))?;
        let status = data.status.unwrap_or(repair.status);

        if let Some((expected, target)) = item_transition(repair.status, status) {
            let item = locked_item(uow.as_mut(), facility_id, repair.device_item_id).await?;
            if item.status.bucket() != expected.bucket() {
                return Err(AppError::InvalidState(format!(
                    "Device item {} is {}; cannot move repair {} from {} to {}",
                    item.id, item.status, repair_id, repair.status, status
                )));
            }
            move_item(uow.as_mut(), &item, target).await?;
        }

        let completed_at = if status == RepairStatus::Completed {
            data.completed_at.or(repair.completed_at).or_else(|| Some(Utc::now()))
        } else {
            None
        };

        let patch = RepairPatch {
            status,
            issue_description: data
                .issue_description
                .clone()
                .unwrap_or(repair.issue_description),
            cost: data.cost.or(repair.cost),
            vendor: data.vendor.clone().or(repair.vendor),
            memo: data.memo.clone().or(repair.memo),
            completed_at,
        };
        let updated = uow.update_repair(repair_id, &patch).await?;
        uow.commit().await?;
        Ok(updated)
    }

    /// Delete a repair. An open repair gives its item back as available.
    pub async fn delete_repair(&self, facility_id: i64, repair_id: i64) -> AppResult<()> {
        retry_on_conflict(self.max_attempts, "delete_repair", move || {
            self.try_delete_repair(facility_id, repair_id)
        })
        .await?;

        tracing::info!(facility_id, repair_id, "Repair deleted");
        Ok(())
    }

    async fn try_delete_repair(&self, facility_id: i64, repair_id: i64) -> AppResult<()> {
        let mut uow = self.store.begin().await?;
        let repair = uow
            .lock_repair(facility_id, repair_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Repair {} not found", repair_id)))?;

        if repair.status.is_open() {
            let item = locked_item(uow.as_mut(), facility_id, repair.device_item_id).await?;
            if item.status.bucket() == StatusBucket::Broken {
                move_item(uow.as_mut(), &item, DeviceStatus::Available).await?;
            }
        }

        uow.delete_repair(repair_id).await?;
        uow.commit().await
    }

    pub async fn get_repair(&self, facility_id: i64, repair_id: i64) -> AppResult<Repair> {
        let mut uow = self.store.begin().await?;
        uow.get_repair(facility_id, repair_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Repair {} not found", repair_id)))
    }

    pub async fn list_repairs(&self, facility_id: i64, query: &RepairQuery) -> AppResult<Vec<Repair>> {
        let mut uow = self.store.begin().await?;
        uow.list_repairs(facility_id, query).await
    }
}

async fn locked_item(uow: &mut dyn UnitOfWork, facility_id: i64, item_id: i64) -> AppResult<DeviceItem> {
    uow.lock_item(facility_id, item_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Device item {} not found", item_id)))
}
