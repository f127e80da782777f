use rocket::http::{ContentType, Header, Status};
use rust_decimal::Decimal;
use serde_json::json;

use crate::api::payments::CheckoutResponse;
use crate::db::{create_payment, find_enrollment, get_payment};
use crate::error::AppError;
use crate::models::PaymentStatus;
use crate::test::utils::test_db::{
    TEST_WEBHOOK_SECRET, bearer, create_standard_test_db, setup_test_client,
};

fn webhook_token() -> Header<'static> {
    Header::new("X-Webhook-Token", TEST_WEBHOOK_SECRET)
}

async fn start_checkout(
    client: &rocket::local::asynchronous::Client,
    token: &str,
    course_id: i64,
) -> CheckoutResponse {
    let response = client
        .post("/api/v1/payments/checkout")
        .header(ContentType::JSON)
        .header(bearer(token))
        .body(json!({ "course_id": course_id }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    serde_json::from_str(&body).unwrap()
}

#[rocket::async_test]
async fn test_checkout_creates_pending_payment() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let checkout = start_checkout(&client, &token, test_db.course_id("Advanced Rust")).await;

    assert!(checkout.checkout_url.contains(&checkout.session_id));

    let payment = get_payment(&test_db.pool, checkout.payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, Decimal::from_str_exact("49.99").unwrap());
    assert_eq!(payment.gateway_session_id.as_deref(), Some(checkout.session_id.as_str()));
}

#[rocket::async_test]
async fn test_second_checkout_blocked_while_one_is_pending() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let course_id = test_db.course_id("Advanced Rust");

    start_checkout(&client, &token, course_id).await;

    let response = client
        .post("/api/v1/payments/checkout")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "course_id": course_id }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Conflict);
}

#[rocket::async_test]
async fn test_checkout_rejects_free_and_unpublished_courses() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;

    for course in ["Intro to Rust", "Unpublished Notes"] {
        let response = client
            .post("/api/v1/payments/checkout")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "course_id": test_db.course_id(course) }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest, "Checkout for {}", course);
    }
}

#[rocket::async_test]
async fn test_completed_webhook_is_idempotent() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let course_id = test_db.course_id("Advanced Rust");
    let user_id = test_db.user_id("sam@example.com");

    let checkout = start_checkout(&client, &token, course_id).await;

    let payload = json!({
        "event": "checkout.completed",
        "session_id": checkout.session_id,
        "payment_ref": "pi_test_1"
    })
    .to_string();

    // The provider redelivers; both deliveries are acknowledged.
    for _ in 0..2 {
        let response = client
            .post("/api/v1/payments/webhook")
            .header(ContentType::JSON)
            .header(webhook_token())
            .body(payload.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }

    let payment = get_payment(&test_db.pool, checkout.payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.gateway_payment_id.as_deref(), Some("pi_test_1"));

    // Exactly one enrollment row, no matter how often the event arrived.
    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM enrollments WHERE user_id = ? AND course_id = ?",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(&test_db.pool)
    .await
    .unwrap();
    assert_eq!(rows, 1);

    let enrollment = find_enrollment(&test_db.pool, user_id, course_id)
        .await
        .unwrap()
        .unwrap();
    assert!(enrollment.is_active);
}

#[rocket::async_test]
async fn test_expired_webhook_fails_payment_without_enrolling() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let course_id = test_db.course_id("Advanced Rust");

    let checkout = start_checkout(&client, &token, course_id).await;

    let response = client
        .post("/api/v1/payments/webhook")
        .header(ContentType::JSON)
        .header(webhook_token())
        .body(
            json!({ "event": "checkout.expired", "session_id": checkout.session_id }).to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let payment = get_payment(&test_db.pool, checkout.payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);

    let enrollment = find_enrollment(
        &test_db.pool,
        test_db.user_id("sam@example.com"),
        course_id,
    )
    .await
    .unwrap();
    assert!(enrollment.is_none());

    // The failed attempt no longer blocks a fresh checkout.
    start_checkout(&client, &token, course_id).await;
}

#[rocket::async_test]
async fn test_webhook_requires_valid_signature() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let checkout = start_checkout(&client, &token, test_db.course_id("Advanced Rust")).await;

    let payload = json!({
        "event": "checkout.completed",
        "session_id": checkout.session_id
    })
    .to_string();

    let response = client
        .post("/api/v1/payments/webhook")
        .header(ContentType::JSON)
        .body(payload.clone())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = client
        .post("/api/v1/payments/webhook")
        .header(ContentType::JSON)
        .header(Header::new("X-Webhook-Token", "forged"))
        .body(payload)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    let payment = get_payment(&test_db.pool, checkout.payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[rocket::async_test]
async fn test_payment_lookup_conceals_foreign_rows() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let checkout = start_checkout(&client, &token, test_db.course_id("Advanced Rust")).await;

    // Someone else's payment answers exactly like a missing one.
    let foreign_token = test_db.issue_token("grace@example.com").await;
    let response = client
        .get(format!("/api/v1/payments/{}", checkout.payment_id))
        .header(bearer(&foreign_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);

    let admin_token = test_db.issue_token("admin@example.com").await;
    let response = client
        .get(format!("/api/v1/payments/{}", checkout.payment_id))
        .header(bearer(&admin_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
}

#[rocket::async_test]
async fn test_pending_payment_unique_index_closes_races() {
    let test_db = create_standard_test_db().await;

    let user_id = test_db.user_id("sam@example.com");
    let course_id = test_db.course_id("Advanced Rust");
    let amount = Decimal::from_str_exact("49.99").unwrap();

    create_payment(&test_db.pool, user_id, course_id, amount, "USD")
        .await
        .unwrap();

    let err = create_payment(&test_db.pool, user_id, course_id, amount, "USD")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}
