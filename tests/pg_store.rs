//! Engine tests against a live Postgres database
//!
//! Run with: DATABASE_URL=postgres://... cargo test --test pg_store -- --ignored
//! Every test works in a fresh facility so the database can be reused.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;

use device_rental_server::{
    config::RentalConfig,
    error::AppError,
    models::{
        device_item::{CreateDeviceItem, DeviceItem},
        enums::{DeviceStatus, DeviceType, RentalStatus, RepairStatus},
        rental::{CreateRental, OverdueSeverity, RentalDeviceLine, ReturnRental},
        repair::CreateRepair,
    },
    repository::PgStore,
    services::Services,
};

async fn setup() -> Services {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Services::new(
        Arc::new(PgStore::new(pool)),
        RentalConfig {
            max_allocation_attempts: 5,
        },
    )
}

fn next_seq() -> i64 {
    use std::sync::atomic::{AtomicI64, Ordering};
    static SEQ: AtomicI64 = AtomicI64::new(1);
    SEQ.fetch_add(1, Ordering::SeqCst)
}

/// A facility id no earlier run has used
fn fresh_facility() -> i64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Clock before epoch")
        .as_nanos();
    (nanos % 1_000_000_000_000) as i64 * 100 + next_seq() % 100
}

async fn register(services: &Services, facility_id: i64, device_type: DeviceType, count: usize) -> Vec<DeviceItem> {
    let mut items = Vec::new();
    for _ in 0..count {
        let item = services
            .inventory
            .create_item(
                facility_id,
                &CreateDeviceItem {
                    device_type,
                    device_code: format!("{}-{}-{}", device_type, facility_id, next_seq()),
                    serial_number: None,
                    notes: None,
                },
            )
            .await
            .unwrap();
        items.push(item);
    }
    items
}

fn rental_request(lines: Vec<RentalDeviceLine>) -> CreateRental {
    let now = Utc::now();
    CreateRental {
        borrower_name: "Park Jiwoo".to_string(),
        borrower_phone: None,
        borrower_birth_date: None,
        rental_date: Some(now),
        expected_return_date: now + Duration::days(7),
        notes: None,
        devices: lines,
    }
}

fn line(device_type: DeviceType, quantity: i32) -> RentalDeviceLine {
    RentalDeviceLine {
        device_type,
        quantity,
        device_item_ids: None,
    }
}

async fn counters(services: &Services, facility_id: i64, device_type: DeviceType) -> (i32, i32, i32, i32) {
    let agg = services
        .inventory
        .get_aggregate(facility_id, device_type)
        .await
        .unwrap();
    (agg.qty_total, agg.qty_available, agg.qty_rented, agg.qty_broken)
}

async fn assert_no_drift(services: &Services, facility_id: i64) {
    let drift = services.inventory.audit_aggregates(facility_id).await.unwrap();
    assert!(drift.is_empty(), "aggregate drift: {:?}", drift);
}

#[tokio::test]
#[ignore]
async fn test_pg_rent_then_return_moves_counters_both_ways() {
    let services = setup().await;
    let facility = fresh_facility();
    register(&services, facility, DeviceType::ArGlass, 3).await;
    assert_eq!(counters(&services, facility, DeviceType::ArGlass).await, (3, 3, 0, 0));

    let rental = services
        .rentals
        .create_rental(facility, &rental_request(vec![line(DeviceType::ArGlass, 2)]))
        .await
        .unwrap();
    assert_eq!(rental.rental.status, RentalStatus::Active);
    assert_eq!(rental.devices.len(), 2);
    assert_eq!(counters(&services, facility, DeviceType::ArGlass).await, (3, 1, 2, 0));

    let returned = services
        .rentals
        .return_rental(facility, rental.rental.id, &ReturnRental::default())
        .await
        .unwrap();
    assert_eq!(returned.rental.status, RentalStatus::Returned);
    assert!(returned.rental.actual_return_date.is_some());
    assert_eq!(counters(&services, facility, DeviceType::ArGlass).await, (3, 3, 0, 0));

    let again = services
        .rentals
        .return_rental(facility, rental.rental.id, &ReturnRental::default())
        .await;
    assert!(matches!(again, Err(AppError::Conflict(_))));
    assert_eq!(counters(&services, facility, DeviceType::ArGlass).await, (3, 3, 0, 0));
    assert_no_drift(&services, facility).await;
}

#[tokio::test]
#[ignore]
async fn test_pg_short_inventory_writes_nothing() {
    let services = setup().await;
    let facility = fresh_facility();
    register(&services, facility, DeviceType::Smartphone, 1).await;
    register(&services, facility, DeviceType::ArGlass, 2).await;

    let result = services
        .rentals
        .create_rental(
            facility,
            &rental_request(vec![line(DeviceType::Smartphone, 1), line(DeviceType::ArGlass, 3)]),
        )
        .await;

    assert!(matches!(result, Err(AppError::InsufficientInventory(_))));
    assert_eq!(counters(&services, facility, DeviceType::Smartphone).await, (1, 1, 0, 0));
    assert_eq!(counters(&services, facility, DeviceType::ArGlass).await, (2, 2, 0, 0));
    assert_no_drift(&services, facility).await;
}

#[tokio::test]
#[ignore]
async fn test_pg_overdue_rental_is_classified_and_marked() {
    let services = setup().await;
    let facility = fresh_facility();
    register(&services, facility, DeviceType::BoneConduction, 2).await;
    let now = Utc::now();

    let mut late = rental_request(vec![line(DeviceType::BoneConduction, 1)]);
    late.rental_date = Some(now - Duration::hours(100));
    late.expected_return_date = now - Duration::hours(80);
    let late = services.rentals.create_rental(facility, &late).await.unwrap();

    let mut on_time = rental_request(vec![line(DeviceType::BoneConduction, 1)]);
    on_time.expected_return_date = now + Duration::hours(5);
    services.rentals.create_rental(facility, &on_time).await.unwrap();

    let fetched = services.rentals.get_rental(facility, late.rental.id).await.unwrap();
    let info = fetched.overdue.expect("rental is overdue");
    assert_eq!(info.severity, OverdueSeverity::Critical);
    assert!((79..=81).contains(&info.elapsed_hours));

    let overdue = services.rentals.list_overdue(facility, Utc::now()).await.unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].rental.id, late.rental.id);

    let sweep = services.rentals.mark_overdue(facility, Utc::now()).await.unwrap();
    assert_eq!(sweep.marked, 1);
    let sweep = services.rentals.mark_overdue(facility, Utc::now()).await.unwrap();
    assert_eq!(sweep.marked, 0);

    let returned = services
        .rentals
        .return_rental(facility, late.rental.id, &ReturnRental::default())
        .await
        .unwrap();
    assert_eq!(returned.rental.status, RentalStatus::Returned);
    assert_no_drift(&services, facility).await;
}

#[tokio::test]
#[ignore]
async fn test_pg_repair_breaks_item_and_rejects_duplicate() {
    let services = setup().await;
    let facility = fresh_facility();
    let items = register(&services, facility, DeviceType::ArGlass, 2).await;
    let request = CreateRepair {
        device_item_id: items[0].id,
        device_type: DeviceType::ArGlass,
        issue_description: "Display flickers".to_string(),
        cost: None,
        vendor: None,
        memo: None,
    };

    let repair = services.repairs.create_repair(facility, &request).await.unwrap();
    assert_eq!(repair.status, RepairStatus::Reported);
    let item = services.inventory.get_item(facility, items[0].id).await.unwrap();
    assert_eq!(item.status, DeviceStatus::Broken);
    assert_eq!(counters(&services, facility, DeviceType::ArGlass).await, (2, 1, 0, 1));

    let duplicate = services.repairs.create_repair(facility, &request).await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));
    assert_eq!(counters(&services, facility, DeviceType::ArGlass).await, (2, 1, 0, 1));

    services.repairs.delete_repair(facility, repair.id).await.unwrap();
    assert_eq!(counters(&services, facility, DeviceType::ArGlass).await, (2, 2, 0, 0));
    assert_no_drift(&services, facility).await;
}

#[tokio::test]
#[ignore]
async fn test_pg_rented_item_cannot_be_deleted_but_available_can() {
    let services = setup().await;
    let facility = fresh_facility();
    let items = register(&services, facility, DeviceType::Smartphone, 2).await;
    let rental = services
        .rentals
        .create_rental(facility, &rental_request(vec![line(DeviceType::Smartphone, 1)]))
        .await
        .unwrap();
    let rented_id = rental.devices[0].binding.device_item_id().unwrap();
    let spare_id = items.iter().map(|i| i.id).find(|id| *id != rented_id).unwrap();

    let result = services.inventory.delete_item(facility, rented_id).await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));
    assert_eq!(counters(&services, facility, DeviceType::Smartphone).await, (2, 1, 1, 0));

    services.inventory.delete_item(facility, spare_id).await.unwrap();
    assert_eq!(counters(&services, facility, DeviceType::Smartphone).await, (1, 0, 1, 0));
    assert_no_drift(&services, facility).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_concurrent_rentals_never_share_the_last_item() {
    let services = setup().await;
    let facility = fresh_facility();
    register(&services, facility, DeviceType::ArGlass, 1).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let services = services.clone();
        handles.push(tokio::spawn(async move {
            services
                .rentals
                .create_rental(facility, &rental_request(vec![line(DeviceType::ArGlass, 1)]))
                .await
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let short = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::InsufficientInventory(_))))
        .count();
    assert_eq!((succeeded, short), (1, 1));
    assert_eq!(counters(&services, facility, DeviceType::ArGlass).await, (1, 0, 1, 0));
    assert_no_drift(&services, facility).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_crossed_line_order_does_not_deadlock() {
    let services = setup().await;
    let facility = fresh_facility();
    register(&services, facility, DeviceType::ArGlass, 20).await;
    register(&services, facility, DeviceType::Smartphone, 20).await;

    let mut handles = Vec::new();
    for n in 0..20 {
        let services = services.clone();
        let lines = if n % 2 == 0 {
            vec![line(DeviceType::ArGlass, 1), line(DeviceType::Smartphone, 1)]
        } else {
            vec![line(DeviceType::Smartphone, 1), line(DeviceType::ArGlass, 1)]
        };
        handles.push(tokio::spawn(async move {
            services
                .rentals
                .create_rental(facility, &rental_request(lines))
                .await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_ok(), "rental failed: {:?}", result.err());
    }

    assert_eq!(counters(&services, facility, DeviceType::ArGlass).await, (20, 0, 20, 0));
    assert_eq!(counters(&services, facility, DeviceType::Smartphone).await, (20, 0, 20, 0));
    assert_no_drift(&services, facility).await;
}
