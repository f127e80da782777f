use rocket::State;
use rocket::serde::json::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, User};
use crate::db::{
    find_enrollment, get_course, lesson_belongs_to_course, list_certificates_for_user,
    list_enrollments_for_user, list_lesson_progress, record_lesson_progress,
    update_user_email, update_user_profile,
};
use crate::db::{create_enrollment, get_user, reactivate_enrollment};
use crate::error::AppError;
use crate::models::{Certificate, Course, Enrollment, LessonProgress};
use crate::progress::{EnrollmentAction, plan_enrollment};
use crate::validation::{AppErrorExt, JsonValidateExt, ValidationResponse};

use super::UserData;

#[get("/profile")]
pub async fn api_get_profile(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[derive(Deserialize, Validate, Clone)]
pub struct ProfileUpdateRequest {
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    bio: Option<String>,
    profile_picture: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    email: Option<String>,
}

#[put("/profile", data = "<profile>")]
pub async fn api_update_profile(
    profile: Json<ProfileUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserData>, rocket::response::status::Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::EditOwnProfile)
        .validate_custom()?;

    let validated = profile.validate_custom()?;

    let first_name = validated.first_name.unwrap_or(user.first_name.clone());
    let last_name = validated.last_name.unwrap_or(user.last_name.clone());
    let phone = validated.phone.or(user.phone.clone());
    let bio = validated.bio.or(user.bio.clone());
    let profile_picture = validated.profile_picture.or(user.profile_picture.clone());

    update_user_profile(
        db,
        user.id,
        &first_name,
        &last_name,
        phone.as_deref(),
        bio.as_deref(),
        profile_picture.as_deref(),
    )
    .await
    .validate_custom()?;

    if let Some(email) = &validated.email {
        if email.to_lowercase() != user.email {
            update_user_email(db, user.id, email).await.validate_custom()?;
        }
    }

    let updated = get_user(db, user.id).await.validate_custom()?;

    Ok(Json(UserData::from(updated)))
}

#[derive(Serialize, Deserialize)]
pub struct EnrolledCourse {
    pub course: Course,
    pub enrollment: Enrollment,
}

#[derive(Serialize, Deserialize)]
pub struct EnrollmentsResponse {
    pub enrollments: Vec<EnrolledCourse>,
}

#[get("/enrollments")]
pub async fn api_get_enrollments(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<EnrollmentsResponse>, AppError> {
    let enrollments = list_enrollments_for_user(db, user.id, true).await?;

    let mut enrolled = Vec::with_capacity(enrollments.len());
    for enrollment in enrollments {
        let course = get_course(db, enrollment.course_id).await?;
        enrolled.push(EnrolledCourse { course, enrollment });
    }

    Ok(Json(EnrollmentsResponse {
        enrollments: enrolled,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct EnrollResponse {
    pub message: String,
    pub enrollment: Enrollment,
}

/// Self-service enrollment for free published courses. Paid courses go
/// through the checkout flow instead.
#[post("/enrollments/<course_id>")]
pub async fn api_enroll(
    course_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<EnrollResponse>, AppError> {
    user.require_permission(Permission::EnrollInCourses)?;

    let course = get_course(db, course_id).await?;

    if course.price > Decimal::ZERO {
        return Err(AppError::Validation(
            "Course requires payment; start a checkout instead".to_string(),
        ));
    }

    let existing = find_enrollment(db, user.id, course_id).await?;

    let (message, enrollment_id) = match plan_enrollment(course.status, existing.as_ref())? {
        EnrollmentAction::Create => (
            "Successfully enrolled in course",
            create_enrollment(db, user.id, course_id).await?,
        ),
        EnrollmentAction::Reactivate(id) => {
            reactivate_enrollment(db, id).await?;
            ("Successfully re-enrolled in course", id)
        }
    };

    let enrollment = crate::db::get_enrollment(db, enrollment_id).await?;

    Ok(Json(EnrollResponse {
        message: message.to_string(),
        enrollment,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct CourseProgressResponse {
    pub course_id: i64,
    pub enrollment: Enrollment,
    pub lesson_progress: Vec<LessonProgress>,
}

#[get("/enrollments/<course_id>/progress")]
pub async fn api_get_course_progress(
    course_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseProgressResponse>, AppError> {
    let enrollment = find_enrollment(db, user.id, course_id)
        .await?
        .filter(|enrollment| enrollment.is_active)
        .ok_or_else(|| AppError::NotFound("Not enrolled in this course".to_string()))?;

    let lesson_progress = list_lesson_progress(db, enrollment.id).await?;

    Ok(Json(CourseProgressResponse {
        course_id,
        enrollment,
        lesson_progress,
    }))
}

#[derive(Deserialize)]
pub struct ProgressUpdateRequest {
    completed: Option<bool>,
    watch_time_seconds: Option<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct ProgressUpdateResponse {
    pub message: String,
    pub lesson_progress: LessonProgress,
    pub course_progress: f64,
}

#[post("/enrollments/<course_id>/lessons/<lesson_id>/progress", data = "<update>")]
pub async fn api_update_lesson_progress(
    course_id: i64,
    lesson_id: i64,
    update: Json<ProgressUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ProgressUpdateResponse>, AppError> {
    user.require_permission(Permission::TrackOwnProgress)?;

    let enrollment = find_enrollment(db, user.id, course_id)
        .await?
        .filter(|enrollment| enrollment.is_active)
        .ok_or_else(|| AppError::NotFound("Not enrolled in this course".to_string()))?;

    if !lesson_belongs_to_course(db, lesson_id, course_id).await? {
        return Err(AppError::NotFound(format!(
            "Lesson with id {} not found",
            lesson_id
        )));
    }

    let (lesson_progress, course_progress) = record_lesson_progress(
        db,
        enrollment.id,
        lesson_id,
        update.completed,
        update.watch_time_seconds,
    )
    .await?;

    Ok(Json(ProgressUpdateResponse {
        message: "Lesson progress updated successfully".to_string(),
        lesson_progress,
        course_progress,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct UserCertificatesResponse {
    pub certificates: Vec<Certificate>,
}

#[get("/certificates")]
pub async fn api_get_my_certificates(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserCertificatesResponse>, AppError> {
    user.require_permission(Permission::ViewOwnCertificates)?;

    let certificates = list_certificates_for_user(db, user.id).await?;

    Ok(Json(UserCertificatesResponse { certificates }))
}

#[derive(Serialize, Deserialize)]
pub struct DashboardStatistics {
    pub total_courses: i64,
    pub completed_courses: i64,
    pub in_progress_courses: i64,
    pub total_certificates: i64,
}

#[derive(Serialize, Deserialize)]
pub struct DashboardResponse {
    pub user: UserData,
    pub statistics: DashboardStatistics,
    pub recent_activity: Vec<EnrolledCourse>,
    pub certificates: Vec<Certificate>,
}

#[get("/dashboard")]
pub async fn api_get_dashboard(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<DashboardResponse>, AppError> {
    let enrollments = list_enrollments_for_user(db, user.id, true).await?;
    let certificates = list_certificates_for_user(db, user.id).await?;

    let total_courses = enrollments.len() as i64;
    let completed_courses = enrollments
        .iter()
        .filter(|enrollment| enrollment.completed_at.is_some())
        .count() as i64;

    let mut recent_activity = Vec::new();
    for enrollment in enrollments.into_iter().take(5) {
        let course = get_course(db, enrollment.course_id).await?;
        recent_activity.push(EnrolledCourse { course, enrollment });
    }

    Ok(Json(DashboardResponse {
        statistics: DashboardStatistics {
            total_courses,
            completed_courses,
            in_progress_courses: total_courses - completed_courses,
            total_certificates: certificates.len() as i64,
        },
        user: UserData::from(user),
        recent_activity,
        certificates,
    }))
}
