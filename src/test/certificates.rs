use rocket::http::Status;

use crate::api::certificates::{CertificateResponse, VerificationResponse};
use crate::db::create_certificate;
use crate::error::AppError;
use crate::models::CourseStatus;
use crate::test::utils::test_db::{TestDb, TestDbBuilder, bearer, setup_test_client};

async fn certificate_fixture() -> TestDb {
    TestDbBuilder::new()
        .admin("admin@example.com", "Alice")
        .instructor("ada@example.com", "Ada")
        .student("sam@example.com", "Sam")
        .student("lee@example.com", "Lee")
        .course("Intro to Rust", "ada@example.com", "0", CourseStatus::Published)
        .module("Intro to Rust", "Basics")
        .lesson("Basics", "Ownership")
        .lesson("Basics", "Borrowing")
        .enrollment("sam@example.com", "Intro to Rust")
        .build()
        .await
        .expect("Failed to build test database")
}

#[rocket::async_test]
async fn test_generation_requires_a_completed_enrollment() {
    let test_db = certificate_fixture().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let course_id = test_db.course_id("Intro to Rust");

    // Enrolled but not done yet.
    let token = test_db.issue_token("sam@example.com").await;
    let response = client
        .post(format!("/api/v1/certificates/generate/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);

    // Not enrolled at all.
    let other_token = test_db.issue_token("lee@example.com").await;
    let response = client
        .post(format!("/api/v1/certificates/generate/{}", course_id))
        .header(bearer(&other_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);
}

#[rocket::async_test]
async fn test_repeat_generation_returns_the_existing_certificate() {
    let test_db = certificate_fixture().await;
    test_db
        .complete_course("sam@example.com", "Intro to Rust", &["Ownership", "Borrowing"])
        .await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let course_id = test_db.course_id("Intro to Rust");

    let response = client
        .post(format!("/api/v1/certificates/generate/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Created);

    let body = response.into_string().await.unwrap();
    let first: CertificateResponse = serde_json::from_str(&body).unwrap();

    let response = client
        .post(format!("/api/v1/certificates/generate/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let second: CertificateResponse = serde_json::from_str(&body).unwrap();

    assert_eq!(second.certificate.id, first.certificate.id);
    assert_eq!(
        second.certificate.certificate_number,
        first.certificate.certificate_number
    );

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM certificates WHERE user_id = ? AND course_id = ?",
    )
    .bind(test_db.user_id("sam@example.com"))
    .bind(course_id)
    .fetch_one(&test_db.pool)
    .await
    .unwrap();
    assert_eq!(rows, 1);
}

#[rocket::async_test]
async fn test_verification_is_public_and_idempotent() {
    let test_db = certificate_fixture().await;
    test_db
        .complete_course("sam@example.com", "Intro to Rust", &["Ownership", "Borrowing"])
        .await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let response = client
        .post(format!(
            "/api/v1/certificates/generate/{}",
            test_db.course_id("Intro to Rust")
        ))
        .header(bearer(&token))
        .dispatch()
        .await;
    let body = response.into_string().await.unwrap();
    let issued: CertificateResponse = serde_json::from_str(&body).unwrap();
    let number = issued.certificate.certificate_number;

    // No Authorization header on either read.
    let mut proofs = Vec::new();
    for _ in 0..2 {
        let response = client
            .get(format!("/api/v1/certificates/verify/{}", number))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let verification: VerificationResponse = serde_json::from_str(&body).unwrap();
        assert!(verification.valid);
        proofs.push(verification.certificate);
    }

    assert_eq!(proofs[0].certificate_number, proofs[1].certificate_number);
    assert_eq!(proofs[0].user_name, proofs[1].user_name);
    assert_eq!(proofs[0].course_title, proofs[1].course_title);
    assert_eq!(proofs[0].issued_at, proofs[1].issued_at);

    assert_eq!(proofs[0].user_name, "Sam Tester");
    assert_eq!(proofs[0].course_title, "Intro to Rust");
}

#[rocket::async_test]
async fn test_verification_of_unknown_number() {
    let test_db = certificate_fixture().await;
    let (client, _test_db) = setup_test_client(test_db).await;

    let response = client
        .get("/api/v1/certificates/verify/CH-1-1-DEADBEEF")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);
}

#[rocket::async_test]
async fn test_regeneration_reuses_the_same_row() {
    let test_db = certificate_fixture().await;
    test_db
        .complete_course("sam@example.com", "Intro to Rust", &["Ownership", "Borrowing"])
        .await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;

    let response = client
        .post(format!(
            "/api/v1/certificates/generate/{}",
            test_db.course_id("Intro to Rust")
        ))
        .header(bearer(&token))
        .dispatch()
        .await;
    let body = response.into_string().await.unwrap();
    let issued: CertificateResponse = serde_json::from_str(&body).unwrap();

    let response = client
        .post(format!(
            "/api/v1/certificates/regenerate/{}",
            issued.certificate.id
        ))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let regenerated: CertificateResponse = serde_json::from_str(&body).unwrap();

    assert_eq!(regenerated.certificate.id, issued.certificate.id);
    assert_eq!(
        regenerated.certificate.certificate_number,
        issued.certificate.certificate_number
    );
    assert!(regenerated.certificate.file_path.is_some());
}

#[rocket::async_test]
async fn test_download_concealed_from_strangers() {
    let test_db = certificate_fixture().await;
    test_db
        .complete_course("sam@example.com", "Intro to Rust", &["Ownership", "Borrowing"])
        .await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let response = client
        .post(format!(
            "/api/v1/certificates/generate/{}",
            test_db.course_id("Intro to Rust")
        ))
        .header(bearer(&token))
        .dispatch()
        .await;
    let body = response.into_string().await.unwrap();
    let issued: CertificateResponse = serde_json::from_str(&body).unwrap();

    let stranger_token = test_db.issue_token("lee@example.com").await;
    let response = client
        .get(format!(
            "/api/v1/certificates/download/{}",
            issued.certificate.id
        ))
        .header(bearer(&stranger_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);

    let response = client
        .get(format!(
            "/api/v1/certificates/download/{}",
            issued.certificate.id
        ))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
}

#[rocket::async_test]
async fn test_certificate_pair_unique_constraint() {
    let test_db = certificate_fixture().await;

    let user_id = test_db.user_id("sam@example.com");
    let course_id = test_db.course_id("Intro to Rust");

    create_certificate(&test_db.pool, user_id, course_id, "CH-1-1-AAAA0001")
        .await
        .unwrap();

    let err = create_certificate(&test_db.pool, user_id, course_id, "CH-1-1-AAAA0002")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}
