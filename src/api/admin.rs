use rocket::FromForm;
use rocket::State;
use rocket::serde::json::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::auth::{Permission, Role, User};
use crate::db::{
    CourseFilter, count_active_enrollments_for_user, count_all_enrollments, count_all_payments,
    count_courses, count_users, enrollments_by_month, get_course, get_user, list_all_enrollments,
    list_all_payments, list_courses, list_enrollments_for_user, list_payments_for_user,
    list_users, popular_courses, revenue_by_month, set_course_status, set_user_active,
    total_completed_revenue, update_user_email, update_user_profile, update_user_role,
};
use crate::error::AppError;
use crate::models::{Course, CourseStatus, Enrollment, Payment, PaymentStatus};

use super::{PageParams, Pagination, UserData};

#[derive(Serialize, Deserialize)]
pub struct AdminStatistics {
    pub total_users: i64,
    pub total_students: i64,
    pub total_instructors: i64,
    pub total_courses: i64,
    pub published_courses: i64,
    pub total_enrollments: i64,
    pub total_revenue: Decimal,
}

#[derive(Serialize, Deserialize)]
pub struct AdminDashboardResponse {
    pub statistics: AdminStatistics,
    pub recent_users: Vec<UserData>,
    pub recent_enrollments: Vec<Enrollment>,
    pub recent_payments: Vec<Payment>,
}

#[get("/dashboard")]
pub async fn api_admin_dashboard(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AdminDashboardResponse>, AppError> {
    user.require_permission(Permission::ManageUsers)?;

    let statistics = AdminStatistics {
        total_users: count_users(db, None, None).await?,
        total_students: count_users(db, Some(Role::Student), None).await?,
        total_instructors: count_users(db, Some(Role::Instructor), None).await?,
        total_courses: count_courses(db, &CourseFilter::default()).await?,
        published_courses: count_courses(
            db,
            &CourseFilter {
                status: Some(CourseStatus::Published),
                ..CourseFilter::default()
            },
        )
        .await?,
        total_enrollments: count_all_enrollments(db, None, None).await?,
        total_revenue: total_completed_revenue(db).await?,
    };

    let recent_users = list_users(db, None, None, 10, 0)
        .await?
        .into_iter()
        .map(UserData::from)
        .collect();
    let recent_enrollments = list_all_enrollments(db, None, None, 10, 0).await?;
    let recent_payments = list_all_payments(db, None, None, None, 10, 0).await?;

    Ok(Json(AdminDashboardResponse {
        statistics,
        recent_users,
        recent_enrollments,
        recent_payments,
    }))
}

#[derive(FromForm)]
pub struct AdminUserParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub role: Option<String>,
    pub search: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct AdminUsersResponse {
    pub users: Vec<UserData>,
    pub pagination: Pagination,
}

#[get("/users?<params..>")]
pub async fn api_admin_list_users(
    params: AdminUserParams,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AdminUsersResponse>, AppError> {
    user.require_permission(Permission::ManageUsers)?;

    let page_params = PageParams {
        page: params.page,
        per_page: params.per_page,
    };
    let (page, per_page, offset) = page_params.resolve()?;

    let role = match params.role.as_deref() {
        Some(raw) => Some(
            Role::from_str(raw)
                .map_err(|_| AppError::Validation(format!("Invalid role: {}", raw)))?,
        ),
        None => None,
    };

    let users = list_users(db, role, params.search.as_deref(), per_page, offset).await?;
    let total = count_users(db, role, params.search.as_deref()).await?;

    Ok(Json(AdminUsersResponse {
        users: users.into_iter().map(UserData::from).collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[derive(Serialize, Deserialize)]
pub struct AdminUserDetailResponse {
    pub user: UserData,
    pub enrollments: Vec<Enrollment>,
    pub payments: Vec<Payment>,
}

#[get("/users/<user_id>")]
pub async fn api_admin_get_user(
    user_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AdminUserDetailResponse>, AppError> {
    user.require_permission(Permission::ManageUsers)?;

    let target = get_user(db, user_id).await?;
    let enrollments = list_enrollments_for_user(db, user_id, false).await?;
    let payments = list_payments_for_user(db, user_id, i64::MAX, 0).await?;

    Ok(Json(AdminUserDetailResponse {
        user: UserData::from(target),
        enrollments,
        payments,
    }))
}

#[derive(Deserialize)]
pub struct AdminUserUpdateRequest {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    role: Option<String>,
    is_active: Option<bool>,
    phone: Option<String>,
    bio: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct AdminUserResponse {
    pub message: String,
    pub user: UserData,
}

#[put("/users/<user_id>", data = "<update>")]
pub async fn api_admin_update_user(
    user_id: i64,
    update: Json<AdminUserUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AdminUserResponse>, AppError> {
    user.require_permission(Permission::ManageUsers)?;

    let target = get_user(db, user_id).await?;

    let first_name = update.first_name.clone().unwrap_or(target.first_name);
    let last_name = update.last_name.clone().unwrap_or(target.last_name);
    let phone = update.phone.clone().or(target.phone);
    let bio = update.bio.clone().or(target.bio);

    update_user_profile(
        db,
        user_id,
        &first_name,
        &last_name,
        phone.as_deref(),
        bio.as_deref(),
        target.profile_picture.as_deref(),
    )
    .await?;

    if let Some(email) = &update.email {
        update_user_email(db, user_id, email).await?;
    }

    // Role changes are the promotion path and carry their own permission.
    if let Some(raw) = &update.role {
        user.require_permission(Permission::PromoteUsers)?;
        let role = Role::from_str(raw)
            .map_err(|_| AppError::Validation(format!("Invalid role: {}", raw)))?;
        update_user_role(db, user_id, role).await?;
    }

    if let Some(is_active) = update.is_active {
        if !is_active && count_active_enrollments_for_user(db, user_id).await? > 0 {
            return Err(AppError::Conflict(
                "Cannot deactivate user with active enrollments".to_string(),
            ));
        }
        set_user_active(db, user_id, is_active).await?;
    }

    let target = get_user(db, user_id).await?;

    Ok(Json(AdminUserResponse {
        message: "User updated successfully".to_string(),
        user: UserData::from(target),
    }))
}

/// Accounts are deactivated rather than deleted, and never while an active
/// enrollment exists.
#[delete("/users/<user_id>")]
pub async fn api_admin_deactivate_user(
    user_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_permission(Permission::ManageUsers)?;

    get_user(db, user_id).await?;

    if count_active_enrollments_for_user(db, user_id).await? > 0 {
        return Err(AppError::Conflict(
            "Cannot deactivate user with active enrollments".to_string(),
        ));
    }

    set_user_active(db, user_id, false).await?;

    Ok(Json(serde_json::json!({
        "message": "User deactivated successfully"
    })))
}

#[post("/users/<user_id>/promote-instructor")]
pub async fn api_admin_promote_instructor(
    user_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AdminUserResponse>, AppError> {
    user.require_permission(Permission::PromoteUsers)?;

    let target = get_user(db, user_id).await?;

    if target.role == Role::Instructor {
        return Err(AppError::Validation(
            "User is already an instructor".to_string(),
        ));
    }

    update_user_role(db, user_id, Role::Instructor).await?;

    let target = get_user(db, user_id).await?;

    Ok(Json(AdminUserResponse {
        message: "User promoted to instructor successfully".to_string(),
        user: UserData::from(target),
    }))
}

#[derive(FromForm)]
pub struct AdminCourseParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
    pub instructor_id: Option<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct AdminCoursesResponse {
    pub courses: Vec<Course>,
    pub pagination: Pagination,
}

#[get("/courses?<params..>")]
pub async fn api_admin_list_courses(
    params: AdminCourseParams,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AdminCoursesResponse>, AppError> {
    user.require_permission(Permission::OverrideCourseStatus)?;

    let page_params = PageParams {
        page: params.page,
        per_page: params.per_page,
    };
    let (page, per_page, offset) = page_params.resolve()?;

    let status = match params.status.as_deref() {
        Some(raw) => Some(
            CourseStatus::from_str(raw)
                .map_err(|_| AppError::Validation(format!("Invalid status: {}", raw)))?,
        ),
        None => None,
    };

    let filter = CourseFilter {
        status,
        instructor_id: params.instructor_id,
        ..CourseFilter::default()
    };

    let courses = list_courses(db, &filter, per_page, offset).await?;
    let total = count_courses(db, &filter).await?;

    Ok(Json(AdminCoursesResponse {
        courses,
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[derive(Deserialize)]
pub struct CourseStatusRequest {
    status: String,
}

#[derive(Serialize, Deserialize)]
pub struct AdminCourseResponse {
    pub message: String,
    pub course: Course,
}

#[put("/courses/<course_id>/status", data = "<request>")]
pub async fn api_admin_set_course_status(
    course_id: i64,
    request: Json<CourseStatusRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AdminCourseResponse>, AppError> {
    user.require_permission(Permission::OverrideCourseStatus)?;

    get_course(db, course_id).await?;

    let status = CourseStatus::from_str(&request.status)
        .map_err(|_| AppError::Validation(format!("Invalid status: {}", request.status)))?;

    set_course_status(db, course_id, status).await?;

    let course = get_course(db, course_id).await?;

    Ok(Json(AdminCourseResponse {
        message: "Course status updated successfully".to_string(),
        course,
    }))
}

#[derive(FromForm)]
pub struct AdminPaymentParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
    pub user_id: Option<i64>,
    pub course_id: Option<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct AdminPaymentsResponse {
    pub payments: Vec<Payment>,
    pub pagination: Pagination,
}

#[get("/payments?<params..>")]
pub async fn api_admin_list_payments(
    params: AdminPaymentParams,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AdminPaymentsResponse>, AppError> {
    user.require_permission(Permission::ViewAllPayments)?;

    let page_params = PageParams {
        page: params.page,
        per_page: params.per_page,
    };
    let (page, per_page, offset) = page_params.resolve()?;

    let status = match params.status.as_deref() {
        Some(raw) => Some(
            PaymentStatus::from_str(raw)
                .map_err(|_| AppError::Validation(format!("Invalid status: {}", raw)))?,
        ),
        None => None,
    };

    let payments =
        list_all_payments(db, status, params.user_id, params.course_id, per_page, offset).await?;
    let total = count_all_payments(db, status, params.user_id, params.course_id).await?;

    Ok(Json(AdminPaymentsResponse {
        payments,
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[derive(FromForm)]
pub struct AdminEnrollmentParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub course_id: Option<i64>,
    pub user_id: Option<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct AdminEnrollmentsResponse {
    pub enrollments: Vec<Enrollment>,
    pub pagination: Pagination,
}

#[get("/enrollments?<params..>")]
pub async fn api_admin_list_enrollments(
    params: AdminEnrollmentParams,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AdminEnrollmentsResponse>, AppError> {
    user.require_permission(Permission::ManageUsers)?;

    let page_params = PageParams {
        page: params.page,
        per_page: params.per_page,
    };
    let (page, per_page, offset) = page_params.resolve()?;

    let enrollments =
        list_all_enrollments(db, params.course_id, params.user_id, per_page, offset).await?;
    let total = count_all_enrollments(db, params.course_id, params.user_id).await?;

    Ok(Json(AdminEnrollmentsResponse {
        enrollments,
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[derive(Serialize, Deserialize)]
pub struct MonthlyRevenueEntry {
    pub month: String,
    pub revenue: Decimal,
}

#[derive(Serialize, Deserialize)]
pub struct MonthlyEnrollmentEntry {
    pub month: String,
    pub enrollments: i64,
}

#[derive(Serialize, Deserialize)]
pub struct PopularCourseEntry {
    pub course_id: i64,
    pub title: String,
    pub enrollment_count: i64,
}

#[derive(Serialize, Deserialize)]
pub struct AnalyticsResponse {
    pub revenue_by_month: Vec<MonthlyRevenueEntry>,
    pub enrollments_by_month: Vec<MonthlyEnrollmentEntry>,
    pub popular_courses: Vec<PopularCourseEntry>,
}

#[get("/analytics")]
pub async fn api_admin_analytics(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AnalyticsResponse>, AppError> {
    user.require_permission(Permission::ViewAllPayments)?;

    let revenue = revenue_by_month(db).await?;
    let enrollments = enrollments_by_month(db).await?;
    let popular = popular_courses(db, 10).await?;

    Ok(Json(AnalyticsResponse {
        revenue_by_month: revenue
            .into_iter()
            .map(|entry| MonthlyRevenueEntry {
                month: entry.month,
                revenue: entry.revenue,
            })
            .collect(),
        enrollments_by_month: enrollments
            .into_iter()
            .map(|entry| MonthlyEnrollmentEntry {
                month: entry.month,
                enrollments: entry.count,
            })
            .collect(),
        popular_courses: popular
            .into_iter()
            .map(|entry| PopularCourseEntry {
                course_id: entry.course_id,
                title: entry.title,
                enrollment_count: entry.enrollment_count,
            })
            .collect(),
    }))
}
