use rocket::http::{ContentType, Status};
use serde_json::json;

use crate::api::users::{EnrollResponse, ProgressUpdateResponse};
use crate::db::{create_enrollment, deactivate_enrollment, find_enrollment};
use crate::error::AppError;
use crate::test::utils::test_db::{bearer, create_standard_test_db, setup_test_client};

#[rocket::async_test]
async fn test_free_enrollment_starts_at_zero_and_completes() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let course_id = test_db.course_id("Intro to Rust");

    let response = client
        .post(format!("/api/v1/users/enrollments/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let enrolled: EnrollResponse = serde_json::from_str(&body).unwrap();

    assert!(enrolled.enrollment.is_active);
    assert_eq!(enrolled.enrollment.progress_percentage, 0.0);
    assert!(enrolled.enrollment.completed_at.is_none());

    // First of two lessons completed: half way.
    let response = client
        .post(format!(
            "/api/v1/users/enrollments/{}/lessons/{}/progress",
            course_id,
            test_db.lesson_id("Ownership")
        ))
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "completed": true }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let progress: ProgressUpdateResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(progress.course_progress, 50.0);

    let response = client
        .post(format!(
            "/api/v1/users/enrollments/{}/lessons/{}/progress",
            course_id,
            test_db.lesson_id("Borrowing")
        ))
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "completed": true }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let progress: ProgressUpdateResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(progress.course_progress, 100.0);

    let enrollment = find_enrollment(
        &test_db.pool,
        test_db.user_id("sam@example.com"),
        course_id,
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(enrollment.progress_percentage, 100.0);
    assert!(enrollment.completed_at.is_some());
}

#[rocket::async_test]
async fn test_completion_latch_survives_uncompleting_a_lesson() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let course_id = test_db.course_id("Intro to Rust");
    let user_id = test_db.user_id("sam@example.com");

    client
        .post(format!("/api/v1/users/enrollments/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;

    for lesson in ["Ownership", "Borrowing"] {
        client
            .post(format!(
                "/api/v1/users/enrollments/{}/lessons/{}/progress",
                course_id,
                test_db.lesson_id(lesson)
            ))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "completed": true }).to_string())
            .dispatch()
            .await;
    }

    let completed_at = find_enrollment(&test_db.pool, user_id, course_id)
        .await
        .unwrap()
        .unwrap()
        .completed_at
        .expect("Course should be completed");

    // Un-complete a lesson: the percentage drops, the stamp does not move.
    let response = client
        .post(format!(
            "/api/v1/users/enrollments/{}/lessons/{}/progress",
            course_id,
            test_db.lesson_id("Ownership")
        ))
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "completed": false }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let progress: ProgressUpdateResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(progress.course_progress, 50.0);

    let enrollment = find_enrollment(&test_db.pool, user_id, course_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(enrollment.progress_percentage, 50.0);
    assert_eq!(enrollment.completed_at, Some(completed_at));
}

#[rocket::async_test]
async fn test_reenrollment_reactivates_the_same_row() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let course_id = test_db.course_id("Intro to Rust");

    let response = client
        .post(format!("/api/v1/users/enrollments/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let first: EnrollResponse = serde_json::from_str(&body).unwrap();

    deactivate_enrollment(&test_db.pool, first.enrollment.id)
        .await
        .unwrap();

    let response = client
        .post(format!("/api/v1/users/enrollments/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let second: EnrollResponse = serde_json::from_str(&body).unwrap();

    assert_eq!(second.enrollment.id, first.enrollment.id);
    assert!(second.enrollment.is_active);
}

#[rocket::async_test]
async fn test_double_enrollment_is_a_conflict() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;
    let course_id = test_db.course_id("Intro to Rust");

    let response = client
        .post(format!("/api/v1/users/enrollments/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let response = client
        .post(format!("/api/v1/users/enrollments/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Conflict);
}

#[rocket::async_test]
async fn test_enrollment_requires_published_course() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;

    let response = client
        .post(format!(
            "/api/v1/users/enrollments/{}",
            test_db.course_id("Unpublished Notes")
        ))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn test_paid_course_rejects_direct_enrollment() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;

    let response = client
        .post(format!(
            "/api/v1/users/enrollments/{}",
            test_db.course_id("Advanced Rust")
        ))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn test_enrollment_unique_constraint_closes_races() {
    let test_db = create_standard_test_db().await;

    let user_id = test_db.user_id("sam@example.com");
    let course_id = test_db.course_id("Intro to Rust");

    create_enrollment(&test_db.pool, user_id, course_id)
        .await
        .unwrap();

    // A second insert that slipped past the read is stopped by the unique
    // (user_id, course_id) constraint, not by luck.
    let err = create_enrollment(&test_db.pool, user_id, course_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}
