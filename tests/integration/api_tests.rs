//! API integration tests
//!
//! These run against a live server whose database holds clan 1 with
//! members 1 and 2, user 3 outside the clan, and item instance 1 owned by
//! user 1 with an enabled item type. The server's internal token must match
//! ARMORY_SERVER__INTERNAL_TOKEN in the test environment.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

const CLAN: i64 = 1;
const LENDER: i64 = 1;
const BORROWER: i64 = 2;
const OUTSIDER: i64 = 3;
const ITEM: i64 = 1;

fn as_user(client: &Client, method: reqwest::Method, path: &str, user_id: i64) -> reqwest::RequestBuilder {
    client
        .request(method, format!("{}{}", BASE_URL, path))
        .header("x-user-id", user_id.to_string())
}

/// Remove any leftover offer on the test item
async fn reset_item(client: &Client) {
    let _ = as_user(client, reqwest::Method::POST, &format!("/armory/{}/return", ITEM), BORROWER)
        .send()
        .await;
    let _ = as_user(client, reqwest::Method::DELETE, &format!("/armory/{}", ITEM), LENDER)
        .send()
        .await;
}

async fn error_name(response: reqwest::Response) -> String {
    let body: Value = response.json().await.expect("Failed to parse error body");
    body["error"].as_str().unwrap_or_default().to_string()
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
async fn test_missing_user_header_is_rejected() {
    let client = Client::new();

    let response = client
        .get(format!("{}/clans/{}/armory", BASE_URL, CLAN))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_outsider_cannot_list_armory() {
    let client = Client::new();

    let response = as_user(&client, reqwest::Method::GET, &format!("/clans/{}/armory", CLAN), OUTSIDER)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_name(response).await, "NotClanMember");
}

#[tokio::test]
#[ignore]
async fn test_offer_borrow_return_withdraw() {
    let client = Client::new();
    reset_item(&client).await;

    // Offer
    let response = as_user(&client, reqwest::Method::POST, &format!("/clans/{}/armory", CLAN), LENDER)
        .json(&json!({ "item_instance_id": ITEM }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CREATED);

    // Offering again conflicts
    let response = as_user(&client, reqwest::Method::POST, &format!("/clans/{}/armory", CLAN), LENDER)
        .json(&json!({ "item_instance_id": ITEM }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_name(response).await, "AlreadyOffered");

    // Lender cannot borrow their own item
    let borrow_path = format!("/clans/{}/armory/{}/borrow", CLAN, ITEM);
    let response = as_user(&client, reqwest::Method::POST, &borrow_path, LENDER)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Borrow
    let response = as_user(&client, reqwest::Method::POST, &borrow_path, BORROWER)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["borrower_user_id"], BORROWER);

    // Listing shows the loan
    let response = as_user(&client, reqwest::Method::GET, &format!("/clans/{}/armory", CLAN), LENDER)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let entries: Vec<Value> = response.json().await.expect("Failed to parse response");
    let entry = entries
        .iter()
        .find(|e| e["item_instance_id"] == ITEM)
        .expect("Offered item missing from armory");
    assert_eq!(entry["borrower_user_id"], BORROWER);

    // Withdrawing a loaned item is refused
    let response = as_user(&client, reqwest::Method::DELETE, &format!("/armory/{}", ITEM), LENDER)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_name(response).await, "CurrentlyLoaned");

    // Touch, then return
    let response = as_user(&client, reqwest::Method::POST, &format!("/armory/{}/touch", ITEM), BORROWER)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let response = as_user(&client, reqwest::Method::POST, &format!("/armory/{}/return", ITEM), LENDER)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = as_user(&client, reqwest::Method::POST, &format!("/armory/{}/return", ITEM), BORROWER)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    // Second return finds no loan
    let response = as_user(&client, reqwest::Method::POST, &format!("/armory/{}/return", ITEM), BORROWER)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Withdraw
    let response = as_user(&client, reqwest::Method::DELETE, &format!("/armory/{}", ITEM), LENDER)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

fn internal_token() -> String {
    std::env::var("ARMORY_SERVER__INTERNAL_TOKEN").expect("ARMORY_SERVER__INTERNAL_TOKEN must be set")
}

#[tokio::test]
#[ignore]
async fn test_manual_sweep() {
    let client = Client::new();

    let response = client
        .post(format!("{}/armory/sweep", BASE_URL))
        .header("x-internal-token", internal_token())
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["clans_scanned"].is_number());
    assert!(body["failures"].is_number());
}

#[tokio::test]
#[ignore]
async fn test_service_endpoints_require_token() {
    let client = Client::new();

    let response = client
        .post(format!("{}/armory/sweep", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A member identity is not enough to disable an item type
    let response = as_user(&client, reqwest::Method::POST, "/item-types/1/disable", LENDER)
        .header("x-internal-token", "not-the-token")
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_member_cannot_purge_another_member() {
    let client = Client::new();

    let path = format!("/clans/{}/members/{}/armory", CLAN, LENDER);
    let response = as_user(&client, reqwest::Method::DELETE, &path, BORROWER)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_name(response).await, "InsufficientRole");

    let response = as_user(&client, reqwest::Method::DELETE, &path, OUTSIDER)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_name(response).await, "NotClanMember");
}
