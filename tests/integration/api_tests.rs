//! API integration tests against a running server

use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

/// Each test works in its own facility so reruns do not collide
fn facility() -> String {
    ((unique() % 1_000_000_000) as i64 + 1000).to_string()
}

async fn register_device(client: &Client, facility: &str, device_type: &str) -> Value {
    let code = format!("{}-{}-{}", device_type, facility, unique());
    let response = client
        .post(format!("{}/devices", BASE_URL))
        .header("X-Facility-Id", facility)
        .json(&json!({ "device_type": device_type, "device_code": code }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);
    response.json().await.expect("Failed to parse response")
}

fn unique() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Clock before epoch")
        .as_nanos()
}

async fn aggregate(client: &Client, facility: &str, device_type: &str) -> Value {
    client
        .get(format!("{}/aggregates/{}", BASE_URL, device_type))
        .header("X-Facility-Id", facility)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_missing_facility_header_is_rejected() {
    let client = Client::new();

    let response = client
        .get(format!("{}/devices", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 400);
}

#[tokio::test]
#[ignore]
async fn test_rent_and_return_roundtrip() {
    let client = Client::new();
    let facility = facility();
    for _ in 0..3 {
        register_device(&client, &facility, "AR_GLASS").await;
    }

    let response = client
        .post(format!("{}/rentals", BASE_URL))
        .header("X-Facility-Id", &facility)
        .json(&json!({
            "borrower_name": "Kim Sora",
            "expected_return_date": "2099-01-01T00:00:00Z",
            "devices": [{ "device_type": "AR_GLASS", "quantity": 2 }]
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);
    let rental: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(rental["rental"]["status"], "대여중");
    assert_eq!(rental["devices"].as_array().map(Vec::len), Some(2));

    let counters = aggregate(&client, &facility, "AR_GLASS").await;
    assert_eq!(counters["qty_available"], 1);
    assert_eq!(counters["qty_rented"], 2);

    let id = rental["rental"]["id"].as_i64().expect("No rental id");
    let response = client
        .post(format!("{}/rentals/{}/return", BASE_URL, id))
        .header("X-Facility-Id", &facility)
        .json(&json!({}))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let returned: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(returned["rental"]["status"], "반납완료");

    let again = client
        .post(format!("{}/rentals/{}/return", BASE_URL, id))
        .header("X-Facility-Id", &facility)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(again.status(), 409);

    let counters = aggregate(&client, &facility, "AR_GLASS").await;
    assert_eq!(counters["qty_available"], 3);
    assert_eq!(counters["qty_rented"], 0);
}

#[tokio::test]
#[ignore]
async fn test_insufficient_inventory_returns_conflict() {
    let client = Client::new();
    let facility = facility();
    register_device(&client, &facility, "SMARTPHONE").await;

    let response = client
        .post(format!("{}/rentals", BASE_URL))
        .header("X-Facility-Id", &facility)
        .json(&json!({
            "borrower_name": "Han",
            "expected_return_date": "2099-01-01T00:00:00Z",
            "devices": [{ "device_type": "SMARTPHONE", "quantity": 2 }]
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 409);

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error"], "InsufficientInventory");
}

#[tokio::test]
#[ignore]
async fn test_repair_flow_and_rented_delete() {
    let client = Client::new();
    let facility = facility();
    let device = register_device(&client, &facility, "BONE_CONDUCTION").await;
    let device_id = device["id"].as_i64().expect("No device id");

    let response = client
        .post(format!("{}/repairs", BASE_URL))
        .header("X-Facility-Id", &facility)
        .json(&json!({
            "device_item_id": device_id,
            "device_type": "BONE_CONDUCTION",
            "issue_description": "No sound on left side"
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);
    let repair: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(repair["status"], "신고접수");

    let duplicate = client
        .post(format!("{}/repairs", BASE_URL))
        .header("X-Facility-Id", &facility)
        .json(&json!({
            "device_item_id": device_id,
            "device_type": "BONE_CONDUCTION",
            "issue_description": "Still broken"
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(duplicate.status(), 409);

    let repair_id = repair["id"].as_i64().expect("No repair id");
    let response = client
        .put(format!("{}/repairs/{}", BASE_URL, repair_id))
        .header("X-Facility-Id", &facility)
        .json(&json!({ "status": "수리완료", "cost": "12000.00" }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let completed: Value = response.json().await.expect("Failed to parse response");
    assert!(completed["completed_at"].is_string());

    let counters = aggregate(&client, &facility, "BONE_CONDUCTION").await;
    assert_eq!(counters["qty_available"], 1);
    assert_eq!(counters["qty_broken"], 0);

    client
        .post(format!("{}/rentals", BASE_URL))
        .header("X-Facility-Id", &facility)
        .json(&json!({
            "borrower_name": "Yoon",
            "expected_return_date": "2099-01-01T00:00:00Z",
            "devices": [{ "device_type": "BONE_CONDUCTION", "quantity": 1, "device_item_ids": [device_id] }]
        }))
        .send()
        .await
        .expect("Failed to send request");

    let response = client
        .delete(format!("{}/devices/{}", BASE_URL, device_id))
        .header("X-Facility-Id", &facility)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 422);
}
