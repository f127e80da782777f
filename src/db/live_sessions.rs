use chrono::{DateTime, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::auth::{Role, User};
use crate::error::AppError;
use crate::models::{DbLiveSession, LiveSession};

const SESSION_COLUMNS: &str = "s.id, s.course_id, s.title, s.description, s.scheduled_at, \
     s.duration_minutes, s.meeting_url, s.meeting_id, s.meeting_password, s.is_recorded, \
     s.recording_url, s.created_at";

/// Role-scoped visibility: admins see everything, instructors the sessions
/// of courses they own, students the sessions of courses they are actively
/// enrolled in.
fn scoped_select(user: &User) -> QueryBuilder<'_, Sqlite> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {SESSION_COLUMNS} FROM live_sessions s"
    ));

    match user.role {
        Role::Admin => {
            query.push(" WHERE 1 = 1");
        }
        Role::Instructor => {
            query
                .push(" JOIN courses c ON c.id = s.course_id WHERE c.instructor_id = ")
                .push_bind(user.id);
        }
        Role::Student => {
            query
                .push(
                    " JOIN enrollments e ON e.course_id = s.course_id \
                     AND e.is_active = 1 WHERE e.user_id = ",
                )
                .push_bind(user.id);
        }
    }

    query
}

#[instrument(skip(pool, user), fields(user_id = %user.id, role = %user.role.as_str()))]
pub async fn list_live_sessions(
    pool: &Pool<Sqlite>,
    user: &User,
    course_id: Option<i64>,
    upcoming_only: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<LiveSession>, AppError> {
    let mut query = scoped_select(user);

    if let Some(course_id) = course_id {
        query.push(" AND s.course_id = ").push_bind(course_id);
    }

    if upcoming_only {
        query
            .push(" AND s.scheduled_at > ")
            .push_bind(Utc::now().naive_utc());
    }

    query
        .push(" ORDER BY s.scheduled_at ASC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows: Vec<DbLiveSession> = query.build_query_as().fetch_all(pool).await?;

    Ok(rows.into_iter().map(LiveSession::from).collect())
}

fn scoped_count(user: &User) -> QueryBuilder<'_, Sqlite> {
    let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM live_sessions s");

    match user.role {
        Role::Admin => {
            query.push(" WHERE 1 = 1");
        }
        Role::Instructor => {
            query
                .push(" JOIN courses c ON c.id = s.course_id WHERE c.instructor_id = ")
                .push_bind(user.id);
        }
        Role::Student => {
            query
                .push(
                    " JOIN enrollments e ON e.course_id = s.course_id \
                     AND e.is_active = 1 WHERE e.user_id = ",
                )
                .push_bind(user.id);
        }
    }

    query
}

#[instrument(skip(pool, user))]
pub async fn count_live_sessions(
    pool: &Pool<Sqlite>,
    user: &User,
    course_id: Option<i64>,
    upcoming_only: bool,
) -> Result<i64, AppError> {
    let mut query = scoped_count(user);

    if let Some(course_id) = course_id {
        query.push(" AND s.course_id = ").push_bind(course_id);
    }

    if upcoming_only {
        query
            .push(" AND s.scheduled_at > ")
            .push_bind(Utc::now().naive_utc());
    }

    let count: i64 = query.build_query_scalar().fetch_one(pool).await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn get_live_session(pool: &Pool<Sqlite>, id: i64) -> Result<LiveSession, AppError> {
    let row = sqlx::query_as::<_, DbLiveSession>(&format!(
        "SELECT {SESSION_COLUMNS} FROM live_sessions s WHERE s.id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(session) => Ok(LiveSession::from(session)),
        _ => Err(AppError::NotFound(format!(
            "Live session with id {} not found",
            id
        ))),
    }
}

pub struct NewLiveSession<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub meeting_url: Option<&'a str>,
    pub meeting_id: Option<&'a str>,
    pub meeting_password: Option<&'a str>,
    pub is_recorded: bool,
}

#[instrument(skip(pool, session), fields(title = %session.title))]
pub async fn create_live_session(
    pool: &Pool<Sqlite>,
    course_id: i64,
    session: &NewLiveSession<'_>,
) -> Result<i64, AppError> {
    info!("Creating live session");
    let res = sqlx::query(
        "INSERT INTO live_sessions
         (course_id, title, description, scheduled_at, duration_minutes, meeting_url, meeting_id,
          meeting_password, is_recorded)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(course_id)
    .bind(session.title)
    .bind(session.description)
    .bind(session.scheduled_at.naive_utc())
    .bind(session.duration_minutes)
    .bind(session.meeting_url)
    .bind(session.meeting_id)
    .bind(session.meeting_password)
    .bind(session.is_recorded)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, session), fields(title = %session.title))]
pub async fn update_live_session(
    pool: &Pool<Sqlite>,
    session_id: i64,
    session: &NewLiveSession<'_>,
    recording_url: Option<&str>,
) -> Result<(), AppError> {
    info!("Updating live session");
    sqlx::query(
        "UPDATE live_sessions
         SET title = ?, description = ?, scheduled_at = ?, duration_minutes = ?, meeting_url = ?,
             meeting_id = ?, meeting_password = ?, is_recorded = ?, recording_url = ?
         WHERE id = ?",
    )
    .bind(session.title)
    .bind(session.description)
    .bind(session.scheduled_at.naive_utc())
    .bind(session.duration_minutes)
    .bind(session.meeting_url)
    .bind(session.meeting_id)
    .bind(session.meeting_password)
    .bind(session.is_recorded)
    .bind(recording_url)
    .bind(session_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_live_session(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting live session");
    sqlx::query("DELETE FROM live_sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
