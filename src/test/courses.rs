use rocket::http::{ContentType, Status};
use serde_json::json;

use crate::api::courses::{CourseDetailResponse, CourseResponse, ModuleResponse};
use crate::db::deactivate_enrollment;
use crate::models::CourseStatus;
use crate::test::utils::test_db::{
    TestDbBuilder, bearer, create_standard_test_db, setup_test_client,
};

#[rocket::async_test]
async fn test_student_cannot_create_course() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("sam@example.com").await;

    let response = client
        .post("/api/v1/courses")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "title": "Sam's Course", "price": "0" }).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Forbidden);
}

#[rocket::async_test]
async fn test_publish_requires_module_and_lesson() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("grace@example.com").await;

    let response = client
        .post("/api/v1/courses")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "title": "Compilers", "price": "0" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Created);

    let body = response.into_string().await.unwrap();
    let created: CourseResponse = serde_json::from_str(&body).unwrap();
    let course_id = created.course.id;

    assert_eq!(created.course.status, CourseStatus::Draft);

    // No modules yet.
    let response = client
        .post(format!("/api/v1/courses/{}/publish", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);

    let response = client
        .post(format!("/api/v1/courses/{}/modules", course_id))
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "title": "Parsing" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Created);

    let body = response.into_string().await.unwrap();
    let module: ModuleResponse = serde_json::from_str(&body).unwrap();

    // A module alone is still not publishable.
    let response = client
        .post(format!("/api/v1/courses/{}/publish", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);

    let response = client
        .post(format!(
            "/api/v1/courses/{}/modules/{}/lessons",
            course_id, module.module.id
        ))
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "title": "Lexing" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Created);

    let response = client
        .post(format!("/api/v1/courses/{}/publish", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let published: CourseResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(published.course.status, CourseStatus::Published);
}

#[rocket::async_test]
async fn test_foreign_instructor_cannot_touch_course() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("grace@example.com").await;
    let course_id = test_db.course_id("Intro to Rust");

    // Update and delete answer with the same authorization status.
    let response = client
        .put(format!("/api/v1/courses/{}", course_id))
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "title": "Hijacked" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Forbidden);

    let response = client
        .delete(format!("/api/v1/courses/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Forbidden);

    let response = client
        .post(format!("/api/v1/courses/{}/modules", course_id))
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "title": "Extra" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Forbidden);
}

#[rocket::async_test]
async fn test_module_update_scoped_to_owner() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let course_id = test_db.course_id("Intro to Rust");
    let module_id = test_db.module_id("Basics");

    let foreign_token = test_db.issue_token("grace@example.com").await;
    let response = client
        .put(format!("/api/v1/courses/{}/modules/{}", course_id, module_id))
        .header(ContentType::JSON)
        .header(bearer(&foreign_token))
        .body(json!({ "title": "Renamed" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Forbidden);

    let owner_token = test_db.issue_token("ada@example.com").await;
    let response = client
        .put(format!("/api/v1/courses/{}/modules/{}", course_id, module_id))
        .header(ContentType::JSON)
        .header(bearer(&owner_token))
        .body(json!({ "title": "Foundations" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let updated: ModuleResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(updated.module.title, "Foundations");
}

#[rocket::async_test]
async fn test_delete_course_blocked_while_any_enrollment_exists() {
    let test_db = TestDbBuilder::new()
        .instructor("ada@example.com", "Ada")
        .student("sam@example.com", "Sam")
        .course("History", "ada@example.com", "0", CourseStatus::Published)
        .module("History", "Origins")
        .lesson("Origins", "Prehistory")
        .enrollment("sam@example.com", "History")
        .build()
        .await
        .expect("Failed to build test database");
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("ada@example.com").await;
    let course_id = test_db.course_id("History");

    let response = client
        .delete(format!("/api/v1/courses/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);

    // Even an inactive enrollment keeps the course undeletable.
    deactivate_enrollment(
        &test_db.pool,
        test_db.enrollment_id("sam@example.com", "History"),
    )
    .await
    .unwrap();

    let response = client
        .delete(format!("/api/v1/courses/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn test_delete_course_without_enrollments() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("ada@example.com").await;
    let course_id = test_db.course_id("Unpublished Notes");

    let response = client
        .delete(format!("/api/v1/courses/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let response = client
        .get(format!("/api/v1/courses/{}", course_id))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);
}

#[rocket::async_test]
async fn test_positions_grow_monotonically_and_keep_gaps() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let token = test_db.issue_token("ada@example.com").await;
    let course_id = test_db.course_id("Intro to Rust");

    let mut module_ids = Vec::new();
    for title in ["Second", "Third"] {
        let response = client
            .post(format!("/api/v1/courses/{}/modules", course_id))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "title": title }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let body = response.into_string().await.unwrap();
        let created: ModuleResponse = serde_json::from_str(&body).unwrap();
        module_ids.push((created.module.id, created.module.position));
    }

    // The fixture module holds position 1.
    assert_eq!(module_ids[0].1, 2);
    assert_eq!(module_ids[1].1, 3);

    let response = client
        .delete(format!("/api/v1/courses/{}/modules/{}", course_id, module_ids[0].0))
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    // Deleted positions are never reused.
    let response = client
        .post(format!("/api/v1/courses/{}/modules", course_id))
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "title": "Fourth" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Created);

    let body = response.into_string().await.unwrap();
    let created: ModuleResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(created.module.position, 4);
}

#[rocket::async_test]
async fn test_draft_course_concealed_from_non_owners() {
    let test_db = create_standard_test_db().await;
    let (client, test_db) = setup_test_client(test_db).await;

    let course_id = test_db.course_id("Unpublished Notes");

    // Anonymous and unrelated callers get the same answer as for a course
    // that never existed.
    let response = client
        .get(format!("/api/v1/courses/{}", course_id))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);

    let student_token = test_db.issue_token("sam@example.com").await;
    let response = client
        .get(format!("/api/v1/courses/{}", course_id))
        .header(bearer(&student_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);

    let owner_token = test_db.issue_token("ada@example.com").await;
    let response = client
        .get(format!("/api/v1/courses/{}", course_id))
        .header(bearer(&owner_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body = response.into_string().await.unwrap();
    let detail: CourseDetailResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(detail.course.status, CourseStatus::Draft);
}
