use chrono::Utc;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{DbEnrollment, DbLessonProgress, Enrollment, LessonProgress};
use crate::progress::{completion_latch, progress_percentage};

const ENROLLMENT_COLUMNS: &str =
    "id, user_id, course_id, enrolled_at, completed_at, progress_percentage, is_active";

#[instrument(skip(pool))]
pub async fn find_enrollment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
) -> Result<Option<Enrollment>, AppError> {
    let row = sqlx::query_as::<_, DbEnrollment>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = ? AND course_id = ?"
    ))
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Enrollment::from))
}

#[instrument(skip(pool))]
pub async fn get_enrollment(pool: &Pool<Sqlite>, id: i64) -> Result<Enrollment, AppError> {
    let row = sqlx::query_as::<_, DbEnrollment>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(enrollment) => Ok(Enrollment::from(enrollment)),
        _ => Err(AppError::NotFound(format!(
            "Enrollment with id {} not found",
            id
        ))),
    }
}

/// The UNIQUE (user_id, course_id) constraint turns a lost race between two
/// concurrent enrollment attempts into a Conflict instead of a second row.
#[instrument(skip(pool))]
pub async fn create_enrollment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
) -> Result<i64, AppError> {
    info!("Creating enrollment");
    let res = sqlx::query("INSERT INTO enrollments (user_id, course_id) VALUES (?, ?)")
        .bind(user_id)
        .bind(course_id)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn reactivate_enrollment(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Reactivating enrollment");
    sqlx::query("UPDATE enrollments SET is_active = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn deactivate_enrollment(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deactivating enrollment");
    sqlx::query("UPDATE enrollments SET is_active = 0 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_enrollments_for_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
    active_only: bool,
) -> Result<Vec<Enrollment>, AppError> {
    let query = if active_only {
        format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
             WHERE user_id = ? AND is_active = 1 ORDER BY enrolled_at DESC"
        )
    } else {
        format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
             WHERE user_id = ? ORDER BY enrolled_at DESC"
        )
    };

    let rows = sqlx::query_as::<_, DbEnrollment>(&query)
        .bind(user_id)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Enrollment::from).collect())
}

#[instrument(skip(pool))]
pub async fn list_active_enrollments_for_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<Enrollment>, AppError> {
    let rows = sqlx::query_as::<_, DbEnrollment>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
         WHERE course_id = ? AND is_active = 1 ORDER BY enrolled_at DESC"
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Enrollment::from).collect())
}

#[instrument(skip(pool))]
pub async fn count_enrollments_for_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM enrollments WHERE course_id = ?")
        .bind(course_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn count_active_enrollments_for_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM enrollments WHERE user_id = ? AND is_active = 1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn list_all_enrollments(
    pool: &Pool<Sqlite>,
    course_id: Option<i64>,
    user_id: Option<i64>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Enrollment>, AppError> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE 1 = 1"
    ));

    if let Some(course_id) = course_id {
        query.push(" AND course_id = ").push_bind(course_id);
    }

    if let Some(user_id) = user_id {
        query.push(" AND user_id = ").push_bind(user_id);
    }

    query
        .push(" ORDER BY enrolled_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows: Vec<DbEnrollment> = query.build_query_as().fetch_all(pool).await?;

    Ok(rows.into_iter().map(Enrollment::from).collect())
}

#[instrument(skip(pool))]
pub async fn count_all_enrollments(
    pool: &Pool<Sqlite>,
    course_id: Option<i64>,
    user_id: Option<i64>,
) -> Result<i64, AppError> {
    let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM enrollments WHERE 1 = 1");

    if let Some(course_id) = course_id {
        query.push(" AND course_id = ").push_bind(course_id);
    }

    if let Some(user_id) = user_id {
        query.push(" AND user_id = ").push_bind(user_id);
    }

    let count: i64 = query.build_query_scalar().fetch_one(pool).await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn list_lesson_progress(
    pool: &Pool<Sqlite>,
    enrollment_id: i64,
) -> Result<Vec<LessonProgress>, AppError> {
    let rows = sqlx::query_as::<_, DbLessonProgress>(
        "SELECT id, enrollment_id, lesson_id, completed, completed_at, watch_time_seconds
         FROM lesson_progress WHERE enrollment_id = ?",
    )
    .bind(enrollment_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(LessonProgress::from).collect())
}

/// Upserts one lesson's progress and recomputes the enrollment's aggregate
/// percentage inside a single transaction, so two concurrent updates cannot
/// leave the percentage out of step with the rows it is derived from.
#[instrument(skip(pool))]
pub async fn record_lesson_progress(
    pool: &Pool<Sqlite>,
    enrollment_id: i64,
    lesson_id: i64,
    completed: Option<bool>,
    watch_time_seconds: Option<i64>,
) -> Result<(LessonProgress, f64), AppError> {
    info!("Recording lesson progress");

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, DbLessonProgress>(
        "SELECT id, enrollment_id, lesson_id, completed, completed_at, watch_time_seconds
         FROM lesson_progress WHERE enrollment_id = ? AND lesson_id = ?",
    )
    .bind(enrollment_id)
    .bind(lesson_id)
    .fetch_optional(&mut *tx)
    .await?;

    let progress_id = match existing {
        Some(row) => row.id,
        None => {
            let res = sqlx::query(
                "INSERT INTO lesson_progress (enrollment_id, lesson_id) VALUES (?, ?)",
            )
            .bind(enrollment_id)
            .bind(lesson_id)
            .execute(&mut *tx)
            .await?;
            res.last_insert_rowid()
        }
    };

    if let Some(completed) = completed {
        let completed_at = if completed { Some(now.naive_utc()) } else { None };
        sqlx::query("UPDATE lesson_progress SET completed = ?, completed_at = ? WHERE id = ?")
            .bind(completed)
            .bind(completed_at)
            .bind(progress_id)
            .execute(&mut *tx)
            .await?;
    }

    if let Some(watch_time) = watch_time_seconds {
        sqlx::query("UPDATE lesson_progress SET watch_time_seconds = ? WHERE id = ?")
            .bind(watch_time)
            .bind(progress_id)
            .execute(&mut *tx)
            .await?;
    }

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM lesson_progress WHERE enrollment_id = ?")
            .bind(enrollment_id)
            .fetch_one(&mut *tx)
            .await?;

    let completed_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM lesson_progress WHERE enrollment_id = ? AND completed = 1",
    )
    .bind(enrollment_id)
    .fetch_one(&mut *tx)
    .await?;

    let percentage = progress_percentage(completed_count, total);

    let enrollment = sqlx::query_as::<_, DbEnrollment>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?"
    ))
    .bind(enrollment_id)
    .fetch_one(&mut *tx)
    .await?;

    let enrollment = Enrollment::from(enrollment);
    let completed_at = completion_latch(enrollment.completed_at, percentage, now);

    sqlx::query("UPDATE enrollments SET progress_percentage = ?, completed_at = ? WHERE id = ?")
        .bind(percentage)
        .bind(completed_at.map(|dt| dt.naive_utc()))
        .bind(enrollment_id)
        .execute(&mut *tx)
        .await?;

    let updated = sqlx::query_as::<_, DbLessonProgress>(
        "SELECT id, enrollment_id, lesson_id, completed, completed_at, watch_time_seconds
         FROM lesson_progress WHERE id = ?",
    )
    .bind(progress_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok((LessonProgress::from(updated), percentage))
}

#[derive(sqlx::FromRow)]
pub struct MonthlyCount {
    pub month: String,
    pub count: i64,
}

#[instrument(skip(pool))]
pub async fn enrollments_by_month(pool: &Pool<Sqlite>) -> Result<Vec<MonthlyCount>, AppError> {
    let rows = sqlx::query_as::<_, MonthlyCount>(
        "SELECT strftime('%Y-%m', enrolled_at) AS month, COUNT(*) AS count
         FROM enrollments GROUP BY month ORDER BY month",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[derive(sqlx::FromRow)]
pub struct PopularCourse {
    pub course_id: i64,
    pub title: String,
    pub enrollment_count: i64,
}

#[instrument(skip(pool))]
pub async fn popular_courses(pool: &Pool<Sqlite>, limit: i64) -> Result<Vec<PopularCourse>, AppError> {
    let rows = sqlx::query_as::<_, PopularCourse>(
        "SELECT c.id AS course_id, c.title, COUNT(e.id) AS enrollment_count
         FROM courses c JOIN enrollments e ON e.course_id = c.id
         GROUP BY c.id, c.title
         ORDER BY enrollment_count DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
