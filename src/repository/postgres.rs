//! Postgres implementation of the inventory store
//!
//! Allocation reads lock candidate rows with `FOR UPDATE`; every status write
//! is additionally guarded by `WHERE status = $from` and checked through the
//! affected row count.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use super::{InventoryStore, UnitOfWork};
use crate::{
    error::{AppError, AppResult},
    models::{
        aggregate::{CounterDelta, DeviceTypeAggregate, StatusCounts},
        device_item::{CreateDeviceItem, DeviceItem, DeviceItemPatch, DeviceItemQuery},
        enums::{DeviceStatus, DeviceType, RentalStatus, RepairStatus},
        rental::{NewRental, Rental, RentalDevice, RentalDeviceBinding, RentalDeviceRow},
        repair::{NewRepair, Repair, RepairPatch, RepairQuery},
    },
};

/// Store backed by a Postgres connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// One open Postgres transaction. Rolled back on drop unless committed.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    /// Add a delta to an existing aggregate row, returning the affected row count
    async fn add_counter_delta(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        delta: &CounterDelta,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE device_type_aggregates
            SET qty_total = qty_total + $3,
                qty_available = qty_available + $4,
                qty_rented = qty_rented + $5,
                qty_broken = qty_broken + $6,
                updated_at = NOW()
            WHERE facility_id = $1 AND device_type = $2
            "#,
        )
        .bind(facility_id)
        .bind(device_type)
        .bind(delta.total)
        .bind(delta.available)
        .bind(delta.rented)
        .bind(delta.broken)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            map_constraint(e, || {
                AppError::Internal(format!("aggregate update raced for {} {}", facility_id, device_type))
            })
        })?;
        Ok(result.rows_affected())
    }
}

/// Map constraint violations to domain errors, everything else stays a database error.
fn map_constraint(err: sqlx::Error, on_unique: impl FnOnce() -> AppError) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => on_unique(),
        sqlx::Error::Database(db) if db.is_check_violation() => {
            AppError::Internal(format!("constraint violated: {}", db.message()))
        }
        _ => AppError::from(err),
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    // =========================================================================
    // DEVICE ITEMS
    // =========================================================================

    async fn get_item(&mut self, facility_id: i64, item_id: i64) -> AppResult<Option<DeviceItem>> {
        let item = sqlx::query_as::<_, DeviceItem>(
            "SELECT * FROM device_items WHERE id = $1 AND facility_id = $2",
        )
        .bind(item_id)
        .bind(facility_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(item)
    }

    async fn lock_item(&mut self, facility_id: i64, item_id: i64) -> AppResult<Option<DeviceItem>> {
        let item = sqlx::query_as::<_, DeviceItem>(
            "SELECT * FROM device_items WHERE id = $1 AND facility_id = $2 FOR UPDATE",
        )
        .bind(item_id)
        .bind(facility_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(item)
    }

    async fn list_items(&mut self, facility_id: i64, query: &DeviceItemQuery) -> AppResult<Vec<DeviceItem>> {
        let items = sqlx::query_as::<_, DeviceItem>(
            r#"
            SELECT * FROM device_items
            WHERE facility_id = $1
              AND ($2::device_type IS NULL OR device_type = $2)
              AND ($3::device_status IS NULL OR status = $3)
            ORDER BY id
            "#,
        )
        .bind(facility_id)
        .bind(query.device_type)
        .bind(query.status)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(items)
    }

    async fn insert_item(
        &mut self,
        facility_id: i64,
        data: &CreateDeviceItem,
        registered_at: DateTime<Utc>,
    ) -> AppResult<DeviceItem> {
        sqlx::query_as::<_, DeviceItem>(
            r#"
            INSERT INTO device_items
                (facility_id, device_type, device_code, serial_number, status, registered_at, notes, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $6)
            RETURNING *
            "#,
        )
        .bind(facility_id)
        .bind(data.device_type)
        .bind(&data.device_code)
        .bind(&data.serial_number)
        .bind(DeviceStatus::Available)
        .bind(registered_at)
        .bind(&data.notes)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            map_constraint(e, || {
                AppError::Conflict(format!("Device code '{}' already exists", data.device_code))
            })
        })
    }

    async fn update_item_fields(&mut self, item_id: i64, patch: &DeviceItemPatch) -> AppResult<DeviceItem> {
        sqlx::query_as::<_, DeviceItem>(
            r#"
            UPDATE device_items
            SET device_code = COALESCE($2, device_code),
                serial_number = COALESCE($3, serial_number),
                notes = COALESCE($4, notes),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(item_id)
        .bind(&patch.device_code)
        .bind(&patch.serial_number)
        .bind(&patch.notes)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| {
            map_constraint(e, || {
                AppError::Conflict(format!(
                    "Device code '{}' already exists",
                    patch.device_code.as_deref().unwrap_or_default()
                ))
            })
        })?
        .ok_or_else(|| AppError::NotFound(format!("Device item {} not found", item_id)))
    }

    async fn delete_item(&mut self, item_id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM device_items WHERE id = $1")
            .bind(item_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Device item {} not found", item_id)));
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
        let items = match ids {
            Some(ids) => {
                sqlx::query_as::<_, DeviceItem>(
                    r#"
                    SELECT * FROM device_items
                    WHERE facility_id = $1 AND device_type = $2 AND status = $3
                      AND id = ANY($4)
                    ORDER BY id
                    FOR UPDATE
                    "#,
                )
                .bind(facility_id)
                .bind(device_type)
                .bind(DeviceStatus::Available)
                .bind(ids)
                .fetch_all(&mut *self.tx)
                .await?
            }
            None => {
                sqlx::query_as::<_, DeviceItem>(
                    r#"
                    SELECT * FROM device_items
                    WHERE facility_id = $1 AND device_type = $2 AND status = $3
                    ORDER BY id
                    LIMIT $4
                    FOR UPDATE
                    "#,
                )
                .bind(facility_id)
                .bind(device_type)
                .bind(DeviceStatus::Available)
                .bind(limit)
                .fetch_all(&mut *self.tx)
                .await?
            }
        };
        Ok(items)
    }

    async fn lock_unclaimed_rented_items(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        limit: i64,
    ) -> AppResult<Vec<DeviceItem>> {
        let items = sqlx::query_as::<_, DeviceItem>(
            r#"
            SELECT d.* FROM device_items d
            WHERE d.facility_id = $1 AND d.device_type = $2 AND d.status = $3
              AND NOT EXISTS (
                  SELECT 1 FROM rental_devices rd
                  WHERE rd.device_item_id = d.id AND rd.is_returned = FALSE
              )
            ORDER BY d.id
            LIMIT $4
            FOR UPDATE OF d
            "#,
        )
        .bind(facility_id)
        .bind(device_type)
        .bind(DeviceStatus::Rented)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(items)
    }

    async fn set_item_status(&mut self, item_id: i64, from: DeviceStatus, to: DeviceStatus) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE device_items SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(item_id)
        .bind(from)
        .bind(to)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::ConcurrencyConflict(format!(
                "Device item {} is no longer {}",
                item_id, from
            )));
        }
        Ok(())
    }

    async fn item_status_counts(&mut self, facility_id: i64) -> AppResult<Vec<(DeviceType, StatusCounts)>> {
        let rows = sqlx::query_as::<_, (DeviceType, DeviceStatus, i64)>(
            r#"
            SELECT device_type, status, COUNT(*)
            FROM device_items
            WHERE facility_id = $1
            GROUP BY device_type, status
            "#,
        )
        .bind(facility_id)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut counts: BTreeMap<DeviceType, StatusCounts> = BTreeMap::new();
        for (device_type, status, n) in rows {
            counts.entry(device_type).or_default().add(status, n as i32);
        }
        Ok(counts.into_iter().collect())
    }

    // =========================================================================
    // AGGREGATES
    // =========================================================================

    async fn get_aggregate(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
    ) -> AppResult<Option<DeviceTypeAggregate>> {
        let row = sqlx::query_as::<_, DeviceTypeAggregate>(
            "SELECT * FROM device_type_aggregates WHERE facility_id = $1 AND device_type = $2",
        )
        .bind(facility_id)
        .bind(device_type)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn list_aggregates(&mut self, facility_id: i64) -> AppResult<Vec<DeviceTypeAggregate>> {
        let rows = sqlx::query_as::<_, DeviceTypeAggregate>(
            "SELECT * FROM device_type_aggregates WHERE facility_id = $1 ORDER BY device_type",
        )
        .bind(facility_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn lock_aggregate(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
    ) -> AppResult<Option<DeviceTypeAggregate>> {
        let row = sqlx::query_as::<_, DeviceTypeAggregate>(
            "SELECT * FROM device_type_aggregates WHERE facility_id = $1 AND device_type = $2 FOR UPDATE",
        )
        .bind(facility_id)
        .bind(device_type)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn apply_counter_delta(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        delta: &CounterDelta,
    ) -> AppResult<()> {
        // CHECK constraints see the inserted tuple before ON CONFLICT, so a
        // negative delta can never travel through an upsert. Seed an empty row
        // when missing, then add the delta to it.
        if self.add_counter_delta(facility_id, device_type, delta).await? == 0 {
            sqlx::query(
                r#"
                INSERT INTO device_type_aggregates
                    (facility_id, device_type, qty_total, qty_available, qty_rented, qty_broken, updated_at)
                VALUES ($1, $2, 0, 0, 0, 0, NOW())
                ON CONFLICT (facility_id, device_type) DO NOTHING
                "#,
            )
            .bind(facility_id)
            .bind(device_type)
            .execute(&mut *self.tx)
            .await?;

            if self.add_counter_delta(facility_id, device_type, delta).await? == 0 {
                return Err(AppError::Internal(format!(
                    "aggregate row for {} {} vanished",
                    facility_id, device_type
                )));
            }
        }
        Ok(())
    }

    async fn overwrite_aggregate(
        &mut self,
        facility_id: i64,
        device_type: DeviceType,
        counts: &StatusCounts,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO device_type_aggregates
                (facility_id, device_type, qty_total, qty_available, qty_rented, qty_broken, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (facility_id, device_type) DO UPDATE
            SET qty_total = EXCLUDED.qty_total,
                qty_available = EXCLUDED.qty_available,
                qty_rented = EXCLUDED.qty_rented,
                qty_broken = EXCLUDED.qty_broken,
                updated_at = NOW()
            "#,
        )
        .bind(facility_id)
        .bind(device_type)
        .bind(counts.total())
        .bind(counts.available)
        .bind(counts.rented)
        .bind(counts.broken)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    // =========================================================================
    // RENTALS
    // =========================================================================

    async fn insert_rental(&mut self, rental: &NewRental) -> AppResult<Rental> {
        let row = sqlx::query_as::<_, Rental>(
            r#"
            INSERT INTO rentals (
                facility_id, borrower_name, borrower_phone, borrower_birth_date,
                rental_date, expected_return_date, status, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(rental.facility_id)
        .bind(&rental.borrower_name)
        .bind(&rental.borrower_phone)
        .bind(rental.borrower_birth_date)
        .bind(rental.rental_date)
        .bind(rental.expected_return_date)
        .bind(RentalStatus::Active)
        .bind(&rental.notes)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_rental_device(
        &mut self,
        rental_id: i64,
        device_type: DeviceType,
        binding: RentalDeviceBinding,
    ) -> AppResult<RentalDevice> {
        let row = sqlx::query_as::<_, RentalDeviceRow>(
            r#"
            INSERT INTO rental_devices (rental_id, device_item_id, device_type, quantity)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(rental_id)
        .bind(binding.device_item_id())
        .bind(device_type)
        .bind(binding.quantity())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            map_constraint(e, || {
                AppError::ConcurrencyConflict(format!(
                    "Device item {:?} is already bound to an open rental",
                    binding.device_item_id()
                ))
            })
        })?;
        Ok(row.into())
    }

    async fn get_rental(&mut self, facility_id: i64, rental_id: i64) -> AppResult<Option<Rental>> {
        let row = sqlx::query_as::<_, Rental>("SELECT * FROM rentals WHERE id = $1 AND facility_id = $2")
            .bind(rental_id)
            .bind(facility_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn lock_rental(&mut self, facility_id: i64, rental_id: i64) -> AppResult<Option<Rental>> {
        let row = sqlx::query_as::<_, Rental>(
            "SELECT * FROM rentals WHERE id = $1 AND facility_id = $2 FOR UPDATE",
        )
        .bind(rental_id)
        .bind(facility_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn rental_devices(&mut self, rental_id: i64) -> AppResult<Vec<RentalDevice>> {
        let rows = sqlx::query_as::<_, RentalDeviceRow>(
            "SELECT * FROM rental_devices WHERE rental_id = $1 ORDER BY id",
        )
        .bind(rental_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(RentalDevice::from).collect())
    }

    async fn list_rentals(
        &mut self,
        facility_id: i64,
        status: Option<RentalStatus>,
        open_only: bool,
    ) -> AppResult<Vec<Rental>> {
        let rows = sqlx::query_as::<_, Rental>(
            r#"
            SELECT * FROM rentals
            WHERE facility_id = $1
              AND ($2::rental_status IS NULL OR status = $2)
              AND ($3 = FALSE OR status <> $4)
            ORDER BY id
            "#,
        )
        .bind(facility_id)
        .bind(status)
        .bind(open_only)
        .bind(RentalStatus::Returned)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn mark_rental_returned(
        &mut self,
        rental_id: i64,
        returned_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> AppResult<Rental> {
        sqlx::query_as::<_, Rental>(
            r#"
            UPDATE rentals
            SET status = $2, actual_return_date = $3, notes = COALESCE($4, notes)
            WHERE id = $1 AND status <> $2
            RETURNING *
            "#,
        )
        .bind(rental_id)
        .bind(RentalStatus::Returned)
        .bind(returned_at)
        .bind(notes)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::ConcurrencyConflict(format!("Rental {} was returned concurrently", rental_id)))
    }

    async fn mark_rental_device_returned(
        &mut self,
        rental_device_id: i64,
        returned_at: DateTime<Utc>,
        condition: Option<&str>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE rental_devices
            SET is_returned = TRUE, returned_at = $2, return_condition = $3
            WHERE id = $1 AND is_returned = FALSE
            "#,
        )
        .bind(rental_device_id)
        .bind(returned_at)
        .bind(condition)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::ConcurrencyConflict(format!(
                "Rental line {} was returned concurrently",
                rental_device_id
            )));
        }
        Ok(())
    }

    async fn mark_rentals_overdue(&mut self, facility_id: i64, due_cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE rentals SET status = $3
            WHERE facility_id = $1 AND status = $4 AND expected_return_date <= $2
            "#,
        )
        .bind(facility_id)
        .bind(due_cutoff)
        .bind(RentalStatus::Overdue)
        .bind(RentalStatus::Active)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // REPAIRS
    // =========================================================================

    async fn insert_repair(&mut self, repair: &NewRepair) -> AppResult<Repair> {
        sqlx::query_as::<_, Repair>(
            r#"
            INSERT INTO repairs (
                facility_id, device_item_id, device_type, issue_description,
                status, cost, vendor, memo, started_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(repair.facility_id)
        .bind(repair.device_item_id)
        .bind(repair.device_type)
        .bind(&repair.issue_description)
        .bind(RepairStatus::Reported)
        .bind(repair.cost)
        .bind(&repair.vendor)
        .bind(&repair.memo)
        .bind(repair.started_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            map_constraint(e, || {
                AppError::Conflict(format!(
                    "Device item {} already has an open repair",
                    repair.device_item_id
                ))
            })
        })
    }

    async fn get_repair(&mut self, facility_id: i64, repair_id: i64) -> AppResult<Option<Repair>> {
        let row = sqlx::query_as::<_, Repair>("SELECT * FROM repairs WHERE id = $1 AND facility_id = $2")
            .bind(repair_id)
            .bind(facility_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn lock_repair(&mut self, facility_id: i64, repair_id: i64) -> AppResult<Option<Repair>> {
        let row = sqlx::query_as::<_, Repair>(
            "SELECT * FROM repairs WHERE id = $1 AND facility_id = $2 FOR UPDATE",
        )
        .bind(repair_id)
        .bind(facility_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn find_open_repair(&mut self, item_id: i64) -> AppResult<Option<Repair>> {
        let row = sqlx::query_as::<_, Repair>(
            "SELECT * FROM repairs WHERE device_item_id = $1 AND status <> $2 FOR UPDATE",
        )
        .bind(item_id)
        .bind(RepairStatus::Completed)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn list_repairs(&mut self, facility_id: i64, query: &RepairQuery) -> AppResult<Vec<Repair>> {
        let rows = sqlx::query_as::<_, Repair>(
            r#"
            SELECT * FROM repairs
            WHERE facility_id = $1
              AND ($2::repair_status IS NULL OR status = $2)
              AND ($3::BIGINT IS NULL OR device_item_id = $3)
            ORDER BY id
            "#,
        )
        .bind(facility_id)
        .bind(query.status)
        .bind(query.device_item_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn update_repair(&mut self, repair_id: i64, patch: &RepairPatch) -> AppResult<Repair> {
        sqlx::query_as::<_, Repair>(
            r#"
            UPDATE repairs
            SET status = $2, issue_description = $3, cost = $4, vendor = $5,
                memo = $6, completed_at = $7
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(repair_id)
        .bind(patch.status)
        .bind(&patch.issue_description)
        .bind(patch.cost)
        .bind(&patch.vendor)
        .bind(&patch.memo)
        .bind(patch.completed_at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| {
            map_constraint(e, || {
                AppError::Conflict(format!("Repair {} would open a second repair for its item", repair_id))
            })
        })?
        .ok_or_else(|| AppError::NotFound(format!("Repair {} not found", repair_id)))
    }

    async fn delete_repair(&mut self, repair_id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM repairs WHERE id = $1")
            .bind(repair_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Repair {} not found", repair_id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
