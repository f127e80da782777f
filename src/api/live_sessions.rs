use chrono::{DateTime, Utc};
use rocket::FromForm;
use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::auth::{Permission, Role, User};
use crate::db::{
    NewLiveSession, count_live_sessions, create_live_session, delete_live_session,
    find_enrollment, get_course, get_live_session, list_live_sessions, update_live_session,
};
use crate::error::AppError;
use crate::models::{Course, LiveSession};

use super::{PageParams, Pagination};

#[derive(FromForm)]
pub struct LiveSessionQueryParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub course_id: Option<i64>,
    pub upcoming_only: Option<bool>,
}

#[derive(Serialize, Deserialize)]
pub struct LiveSessionWithCourse {
    pub session: LiveSession,
    pub course: Course,
}

#[derive(Serialize, Deserialize)]
pub struct LiveSessionsResponse {
    pub live_sessions: Vec<LiveSessionWithCourse>,
    pub pagination: Pagination,
}

/// Listing is scoped by role: admins see every session, instructors their
/// courses', students their active enrollments'.
#[get("/?<params..>")]
pub async fn api_list_live_sessions(
    params: LiveSessionQueryParams,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LiveSessionsResponse>, AppError> {
    let page_params = PageParams {
        page: params.page,
        per_page: params.per_page,
    };
    let (page, per_page, offset) = page_params.resolve()?;
    let upcoming_only = params.upcoming_only.unwrap_or(false);

    let sessions =
        list_live_sessions(db, &user, params.course_id, upcoming_only, per_page, offset).await?;
    let total = count_live_sessions(db, &user, params.course_id, upcoming_only).await?;

    let mut entries = Vec::with_capacity(sessions.len());
    for session in sessions {
        let course = get_course(db, session.course_id).await?;
        entries.push(LiveSessionWithCourse { session, course });
    }

    Ok(Json(LiveSessionsResponse {
        live_sessions: entries,
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[get("/<session_id>")]
pub async fn api_get_live_session(
    session_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LiveSessionWithCourse>, AppError> {
    let session = get_live_session(db, session_id).await?;
    let course = get_course(db, session.course_id).await?;

    let visible = match user.role {
        Role::Admin => true,
        Role::Instructor => course.instructor_id == user.id,
        Role::Student => find_enrollment(db, user.id, course.id)
            .await?
            .map(|enrollment| enrollment.is_active)
            .unwrap_or(false),
    };

    if !visible {
        return Err(AppError::NotFound(format!(
            "Live session with id {} not found",
            session_id
        )));
    }

    Ok(Json(LiveSessionWithCourse { session, course }))
}

#[derive(Deserialize)]
pub struct CreateLiveSessionRequest {
    course_id: i64,
    title: String,
    description: Option<String>,
    scheduled_at: DateTime<Utc>,
    duration_minutes: i64,
    meeting_url: Option<String>,
    meeting_id: Option<String>,
    meeting_password: Option<String>,
    is_recorded: Option<bool>,
}

#[derive(Serialize, Deserialize)]
pub struct LiveSessionResponse {
    pub message: String,
    pub session: LiveSession,
}

#[post("/", data = "<request>")]
pub async fn api_create_live_session(
    request: Json<CreateLiveSessionRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<LiveSessionResponse>>, AppError> {
    user.require_permission(Permission::ScheduleLiveSessions)?;

    let course = get_course(db, request.course_id).await?;
    user.require_owner_or_admin(course.instructor_id)?;

    if request.title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }

    if request.duration_minutes <= 0 {
        return Err(AppError::Validation(
            "Duration must be positive".to_string(),
        ));
    }

    if request.scheduled_at <= Utc::now() {
        return Err(AppError::Validation(
            "Scheduled time must be in the future".to_string(),
        ));
    }

    let session_id = create_live_session(
        db,
        course.id,
        &NewLiveSession {
            title: &request.title,
            description: request.description.as_deref(),
            scheduled_at: request.scheduled_at,
            duration_minutes: request.duration_minutes,
            meeting_url: request.meeting_url.as_deref(),
            meeting_id: request.meeting_id.as_deref(),
            meeting_password: request.meeting_password.as_deref(),
            is_recorded: request.is_recorded.unwrap_or(false),
        },
    )
    .await?;

    let session = get_live_session(db, session_id).await?;

    Ok(Custom(
        Status::Created,
        Json(LiveSessionResponse {
            message: "Live session scheduled successfully".to_string(),
            session,
        }),
    ))
}

#[derive(Deserialize)]
pub struct UpdateLiveSessionRequest {
    title: Option<String>,
    description: Option<String>,
    scheduled_at: Option<DateTime<Utc>>,
    duration_minutes: Option<i64>,
    meeting_url: Option<String>,
    meeting_id: Option<String>,
    meeting_password: Option<String>,
    is_recorded: Option<bool>,
    recording_url: Option<String>,
}

#[put("/<session_id>", data = "<request>")]
pub async fn api_update_live_session(
    session_id: i64,
    request: Json<UpdateLiveSessionRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LiveSessionResponse>, AppError> {
    user.require_permission(Permission::ScheduleLiveSessions)?;

    let session = get_live_session(db, session_id).await?;
    let course = get_course(db, session.course_id).await?;
    user.require_owner_or_admin(course.instructor_id)?;

    // Rescheduling must land in the future; leaving the time untouched is
    // fine even for past sessions (e.g. attaching a recording).
    if let Some(scheduled_at) = request.scheduled_at {
        if scheduled_at <= Utc::now() {
            return Err(AppError::Validation(
                "Scheduled time must be in the future".to_string(),
            ));
        }
    }

    let title = request.title.clone().unwrap_or(session.title);
    let description = request.description.clone().or(session.description);
    let scheduled_at = request.scheduled_at.unwrap_or(session.scheduled_at);
    let duration_minutes = request.duration_minutes.unwrap_or(session.duration_minutes);
    let meeting_url = request.meeting_url.clone().or(session.meeting_url);
    let meeting_id = request.meeting_id.clone().or(session.meeting_id);
    let meeting_password = request.meeting_password.clone().or(session.meeting_password);
    let is_recorded = request.is_recorded.unwrap_or(session.is_recorded);
    let recording_url = request.recording_url.clone().or(session.recording_url);

    if duration_minutes <= 0 {
        return Err(AppError::Validation(
            "Duration must be positive".to_string(),
        ));
    }

    update_live_session(
        db,
        session_id,
        &NewLiveSession {
            title: &title,
            description: description.as_deref(),
            scheduled_at,
            duration_minutes,
            meeting_url: meeting_url.as_deref(),
            meeting_id: meeting_id.as_deref(),
            meeting_password: meeting_password.as_deref(),
            is_recorded,
        },
        recording_url.as_deref(),
    )
    .await?;

    let session = get_live_session(db, session_id).await?;

    Ok(Json(LiveSessionResponse {
        message: "Live session updated successfully".to_string(),
        session,
    }))
}

#[delete("/<session_id>")]
pub async fn api_delete_live_session(
    session_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_permission(Permission::ScheduleLiveSessions)?;

    let session = get_live_session(db, session_id).await?;
    let course = get_course(db, session.course_id).await?;
    user.require_owner_or_admin(course.instructor_id)?;

    delete_live_session(db, session_id).await?;

    Ok(Json(serde_json::json!({
        "message": "Live session deleted successfully"
    })))
}
