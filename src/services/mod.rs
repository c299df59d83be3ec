//! Business logic services

pub mod inventory;
pub mod overdue;
pub mod rentals;
pub mod repairs;

use std::future::Future;

use crate::{
    config::RentalConfig,
    error::{AppError, AppResult},
    repository::SharedStore,
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub inventory: inventory::InventoryService,
    pub rentals: rentals::RentalsService,
    pub repairs: repairs::RepairsService,
}

impl Services {
    /// Create all services over the given store
    pub fn new(store: SharedStore, rental_config: RentalConfig) -> Self {
        let attempts = rental_config.max_allocation_attempts;
        Self {
            inventory: inventory::InventoryService::new(store.clone()),
            rentals: rentals::RentalsService::new(store.clone(), attempts),
            repairs: repairs::RepairsService::new(store, attempts),
        }
    }
}

/// Re-run a whole transaction while it fails with a concurrency conflict.
///
/// Gives up after `max_attempts` runs and returns the last conflict.
pub async fn retry_on_conflict<T, F, Fut>(max_attempts: u32, operation: &str, mut run: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match run().await {
            Err(AppError::ConcurrencyConflict(msg)) if attempt < max_attempts => {
                tracing::warn!(operation, attempt, "Concurrency conflict, retrying: {}", msg);
                attempt += 1;
            }
            result => return result,
        }
    }
}
