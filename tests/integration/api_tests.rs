//! API integration tests
//!
//! These run against a live server (memory or postgres backend) started with
//! the same JWT secret as the one used here.

use chrono::{Duration, Utc};
use reqwest::Client;
use serde_json::{json, Value};

use toylend_server::models::admin::{AdminClaims, ADMIN_ROLE};

const BASE_URL: &str = "http://localhost:8080/api/v1";

/// Helper to mint an admin token for the running server
fn admin_token() -> String {
    let secret = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "change-this-secret-in-production".to_string());
    let now = Utc::now();
    AdminClaims {
        sub: "librarian@example.org".to_string(),
        role: ADMIN_ROLE.to_string(),
        exp: (now + Duration::hours(1)).timestamp(),
        iat: now.timestamp(),
    }
    .create_token(&secret)
    .expect("Failed to sign token")
}

async fn create_item(client: &Client, token: &str, name: &str, quantity: i32) -> Value {
    let response = client
        .post(format!("{}/items", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({
            "name": name,
            "category": "Integration",
            "quantity": quantity
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 201);
    response.json().await.expect("Failed to parse response")
}

fn reservation_body(item_id: &str, child: &str) -> Value {
    json!({
        "itemId": item_id,
        "parentName": "Robin Test",
        "parentEmail": "robin@example.org",
        "childName": child,
        "preferredDay": "Saturday"
    })
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
async fn test_catalog_is_public() {
    let client = Client::new();

    let response = client
        .get(format!("{}/items?sort=az", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body.is_array());
}

#[tokio::test]
#[ignore]
async fn test_admin_routes_require_token() {
    let client = Client::new();

    let response = client
        .get(format!("{}/reservations", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_reserve_then_waitlist() {
    let client = Client::new();
    let token = admin_token();
    let item = create_item(&client, &token, "Integration marble run", 1).await;
    let item_id = item["id"].as_str().expect("No item id");

    let first = client
        .post(format!("{}/reservations", BASE_URL))
        .json(&reservation_body(item_id, "Lou"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(first.status(), 201);

    let second = client
        .post(format!("{}/reservations", BASE_URL))
        .json(&reservation_body(item_id, "Mia"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(second.status(), 202);

    let body: Value = second.json().await.expect("Failed to parse response");
    assert!(body["waitlistEntry"].is_object());

    let item: Value = client
        .get(format!("{}/items/{}", BASE_URL, item_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(item["quantity"], 0);
    assert_eq!(item["status"], "On Loan");
}

#[tokio::test]
#[ignore]
async fn test_return_restocks_item() {
    let client = Client::new();
    let token = admin_token();
    let item = create_item(&client, &token, "Integration kite", 1).await;
    let item_id = item["id"].as_str().expect("No item id");

    let created: Value = client
        .post(format!("{}/reservations", BASE_URL))
        .json(&reservation_body(item_id, "Lou"))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    let reservation_id = created["reservation"]["id"]
        .as_str()
        .expect("No reservation id");

    let response = client
        .put(format!("{}/reservations/{}/status", BASE_URL, reservation_id))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({ "status": "Returned" }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let item: Value = client
        .get(format!("{}/items/{}", BASE_URL, item_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(item["quantity"], 1);

    let missing = client
        .get(format!("{}/reservations/{}", BASE_URL, reservation_id))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
#[ignore]
async fn test_inventory_audit_is_balanced() {
    let client = Client::new();
    let token = admin_token();

    let response = client
        .get(format!("{}/reports/inventory-audit", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let lines: Vec<Value> = response.json().await.expect("Failed to parse response");
    for line in lines {
        assert_eq!(line["discrepancy"], 0, "unbalanced: {}", line);
    }
}

#[tokio::test]
#[ignore]
async fn test_csv_export() {
    let client = Client::new();
    let token = admin_token();

    let response = client
        .get(format!("{}/reports/export/inventory", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
}
