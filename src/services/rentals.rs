//! Rental transaction engine: allocation on create, release on return

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        enums::{DeviceStatus, RentalStatus},
        rental::{
            CreateRental, NewRental, OverdueSweep, Rental, RentalDetails, RentalDeviceBinding, RentalDeviceLine,
            RentalQuery, ReturnRental,
        },
    },
    repository::{SharedStore, UnitOfWork},
};

use super::{inventory::move_item, overdue, retry_on_conflict};

#[derive(Clone)]
pub struct RentalsService {
    store: SharedStore,
    max_attempts: u32,
}

impl RentalsService {
    pub fn new(store: SharedStore, max_attempts: u32) -> Self {
        Self { store, max_attempts }
    }

    /// Create a rental and reserve its device items.
    ///
    /// Either every line is satisfied and committed together, or nothing is written.
    pub async fn create_rental(&self, facility_id: i64, data: &CreateRental) -> AppResult<RentalDetails> {
        data.validate()?;

        let details = retry_on_conflict(self.max_attempts, "create_rental", move || {
            self.try_create_rental(facility_id, data)
        })
        .await?;

        tracing::info!(
            facility_id,
            rental_id = details.rental.id,
            items = details.devices.len(),
            "Created rental for {}",
            details.rental.borrower_name
        );
        Ok(details)
    }

    async fn try_create_rental(&self, facility_id: i64, data: &CreateRental) -> AppResult<RentalDetails> {
        let now = Utc::now();
        let rental_date = data.rental_date.unwrap_or(now);
        if rental_date > data.expected_return_date {
            return Err(AppError::Validation(
                "Rental date must not be after the expected return date".to_string(),
            ));
        }

        let mut uow = self.store.begin().await?;
        let rental = uow
            .insert_rental(&NewRental {
                facility_id,
                borrower_name: data.borrower_name.clone(),
                borrower_phone: data.borrower_phone.clone(),
                borrower_birth_date: data.borrower_birth_date,
                rental_date,
                expected_return_date: data.expected_return_date,
                notes: data.notes.clone(),
            })
            .await?;

        let mut locked_type = None;
        for line in reservation_order(&data.devices) {
            if locked_type != Some(line.device_type) {
                uow.lock_aggregate(facility_id, line.device_type).await?;
                locked_type = Some(line.device_type);
            }
            reserve_line(uow.as_mut(), &rental, line).await?;
        }

        let devices = uow.rental_devices(rental.id).await?;
        uow.commit().await?;

        let overdue = overdue::classify_rental(now, &rental);
        Ok(RentalDetails {
            rental,
            devices,
            overdue,
        })
    }

    /// Return every device of a rental. A second return is rejected.
    pub async fn return_rental(
        &self,
        facility_id: i64,
        rental_id: i64,
        data: &ReturnRental,
    ) -> AppResult<RentalDetails> {
        let details = retry_on_conflict(self.max_attempts, "return_rental", move || {
            self.try_return_rental(facility_id, rental_id, data)
        })
        .await?;

        tracing::info!(
            facility_id,
            rental_id,
            items = details.devices.len(),
            "Rental returned"
        );
        Ok(details)
    }

    async fn try_return_rental(
        &self,
        facility_id: i64,
        rental_id: i64,
        data: &ReturnRental,
    ) -> AppResult<RentalDetails> {
        let mut uow = self.store.begin().await?;
        let rental = uow
            .lock_rental(facility_id, rental_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Rental {} not found", rental_id)))?;

        if rental.status == RentalStatus::Returned {
            return Err(AppError::Conflict(format!("Rental {} is already returned", rental_id)));
        }

        let returned_at = data.returned_at.unwrap_or_else(Utc::now);
        let condition = data.return_condition.as_deref();

        for line in uow.rental_devices(rental_id).await? {
            if line.is_returned {
                continue;
            }
            match line.binding {
                RentalDeviceBinding::Item { device_item_id } => {
                    let item = uow
                        .lock_item(facility_id, device_item_id)
                        .await?
                        .ok_or_else(|| {
                            AppError::InvalidState(format!(
                                "Device item {} of rental {} no longer exists",
                                device_item_id, rental_id
                            ))
                        })?;
                    if item.status != DeviceStatus::Rented {
                        return Err(AppError::InvalidState(format!(
                            "Device item {} of rental {} is {}, expected rented",
                            device_item_id, rental_id, item.status
                        )));
                    }
                    move_item(uow.as_mut(), &item, DeviceStatus::Available).await?;
                }
                RentalDeviceBinding::Legacy { quantity } => {
                    let items = uow
                        .lock_unclaimed_rented_items(facility_id, line.device_type, i64::from(quantity))
                        .await?;
                    if items.len() < quantity as usize {
                        return Err(AppError::InvalidState(format!(
                            "Rental {} holds {} untracked {} devices but only {} can be released",
                            rental_id,
                            quantity,
                            line.device_type,
                            items.len()
                        )));
                    }
                    for item in &items {
                        move_item(uow.as_mut(), item, DeviceStatus::Available).await?;
                    }
                }
            }
            uow.mark_rental_device_returned(line.id, returned_at, condition)
                .await?;
        }

        let rental = uow
            .mark_rental_returned(rental_id, returned_at, data.notes.as_deref())
            .await?;
        let devices = uow.rental_devices(rental_id).await?;
        uow.commit().await?;

        Ok(RentalDetails {
            rental,
            devices,
            overdue: None,
        })
    }

    pub async fn get_rental(&self, facility_id: i64, rental_id: i64) -> AppResult<RentalDetails> {
        let mut uow = self.store.begin().await?;
        let rental = uow
            .get_rental(facility_id, rental_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Rental {} not found", rental_id)))?;
        with_details(uow.as_mut(), rental, Utc::now()).await
    }

    pub async fn list_rentals(&self, facility_id: i64, query: &RentalQuery) -> AppResult<Vec<RentalDetails>> {
        let overdue_only = query.overdue_only.unwrap_or(false);
        let now = Utc::now();

        let mut uow = self.store.begin().await?;
        let rentals = uow.list_rentals(facility_id, query.status, overdue_only).await?;
        let mut result = Vec::with_capacity(rentals.len());
        for rental in rentals {
            let details = with_details(uow.as_mut(), rental, now).await?;
            if !overdue_only || details.overdue.is_some() {
                result.push(details);
            }
        }
        Ok(result)
    }

    /// Open rentals past due at `now`, most overdue first
    pub async fn list_overdue(&self, facility_id: i64, now: DateTime<Utc>) -> AppResult<Vec<RentalDetails>> {
        let mut uow = self.store.begin().await?;
        let mut overdue = Vec::new();
        for rental in uow.list_rentals(facility_id, None, true).await? {
            if overdue::classify_rental(now, &rental).is_some() {
                overdue.push(with_details(uow.as_mut(), rental, now).await?);
            }
        }
        overdue.sort_by_key(|d| {
            (
                std::cmp::Reverse(d.overdue.map_or(0, |o| o.elapsed_hours)),
                d.rental.id,
            )
        });
        Ok(overdue)
    }

    /// Persist `연체` on active rentals that are overdue at `now`. Idempotent.
    pub async fn mark_overdue(&self, facility_id: i64, now: DateTime<Utc>) -> AppResult<OverdueSweep> {
        let mut uow = self.store.begin().await?;
        let marked = uow
            .mark_rentals_overdue(facility_id, overdue::overdue_cutoff(now))
            .await?;
        uow.commit().await?;

        if marked > 0 {
            tracing::info!(facility_id, marked, "Marked rentals overdue");
        }
        Ok(OverdueSweep { marked })
    }
}

/// Lines in the order their rows get locked: by device type, and within a
/// type explicit picks before automatic lines so those cannot take requested
/// items. Every rental locks in this order whatever the request order was.
fn reservation_order(lines: &[RentalDeviceLine]) -> Vec<&RentalDeviceLine> {
    let mut ordered: Vec<&RentalDeviceLine> = lines.iter().collect();
    ordered.sort_by_key(|line| (line.device_type, line.device_item_ids.is_none()));
    ordered
}

/// Reserve the items of one requested line and bind them to the rental
async fn reserve_line(uow: &mut dyn UnitOfWork, rental: &Rental, line: &RentalDeviceLine) -> AppResult<()> {
    let wanted = line.quantity as usize;
    let items = uow
        .lock_available_items(
            rental.facility_id,
            line.device_type,
            line.device_item_ids.as_deref(),
            i64::from(line.quantity),
        )
        .await?;

    if items.len() != wanted {
        let message = match &line.device_item_ids {
            Some(ids) => format!(
                "Requested {} devices {:?} but only {} are available",
                line.device_type,
                ids,
                items.len()
            ),
            None => format!(
                "Requested {} {} devices but only {} are available",
                wanted,
                line.device_type,
                items.len()
            ),
        };
        return Err(AppError::InsufficientInventory(message));
    }

    for item in &items {
        move_item(uow, item, DeviceStatus::Rented).await?;
        uow.insert_rental_device(
            rental.id,
            line.device_type,
            RentalDeviceBinding::Item {
                device_item_id: item.id,
            },
        )
        .await?;
    }
    Ok(())
}

async fn with_details(uow: &mut dyn UnitOfWork, rental: Rental, now: DateTime<Utc>) -> AppResult<RentalDetails> {
    let devices = uow.rental_devices(rental.id).await?;
    let overdue = overdue::classify_rental(now, &rental);
    Ok(RentalDetails {
        rental,
        devices,
        overdue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::DeviceType;

    fn line(device_type: DeviceType, ids: Option<Vec<i64>>) -> RentalDeviceLine {
        RentalDeviceLine {
            device_type,
            quantity: ids.as_ref().map_or(1, |ids| ids.len() as i32),
            device_item_ids: ids,
        }
    }

    #[test]
    fn test_crossed_requests_lock_in_the_same_order() {
        let forward = [line(DeviceType::ArGlass, None), line(DeviceType::Smartphone, None)];
        let backward = [line(DeviceType::Smartphone, None), line(DeviceType::ArGlass, None)];

        let types = |lines: &[RentalDeviceLine]| {
            reservation_order(lines)
                .into_iter()
                .map(|l| l.device_type)
                .collect::<Vec<_>>()
        };
        assert_eq!(types(&forward), types(&backward));
    }

    #[test]
    fn test_explicit_picks_come_first_within_a_type() {
        let lines = [
            line(DeviceType::ArGlass, None),
            line(DeviceType::Smartphone, Some(vec![9])),
            line(DeviceType::ArGlass, Some(vec![4])),
        ];
        let ordered = reservation_order(&lines);

        assert_eq!(ordered[0].device_item_ids, Some(vec![4]));
        assert_eq!(ordered[1].device_item_ids, None);
        assert_eq!(ordered[0].device_type, ordered[1].device_type);
        assert_eq!(ordered[2].device_type, DeviceType::Smartphone);
    }
}
