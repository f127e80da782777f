use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{DbNotification, Notification};

const NOTIFICATION_COLUMNS: &str = "id, user_id, title, message, kind, is_read, created_at";

// Notifications are append-only: rows are inserted and only the is_read flag
// ever changes afterwards.

#[instrument(skip(pool, title, message))]
pub async fn create_notification(
    pool: &Pool<Sqlite>,
    user_id: i64,
    title: &str,
    message: &str,
    kind: Option<&str>,
) -> Result<i64, AppError> {
    let res = sqlx::query(
        "INSERT INTO notifications (user_id, title, message, kind) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(title)
    .bind(message)
    .bind(kind)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_notification(pool: &Pool<Sqlite>, id: i64) -> Result<Notification, AppError> {
    let row = sqlx::query_as::<_, DbNotification>(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(notification) => Ok(Notification::from(notification)),
        _ => Err(AppError::NotFound(format!(
            "Notification with id {} not found",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn list_notifications(
    pool: &Pool<Sqlite>,
    user_id: i64,
    unread_only: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Notification>, AppError> {
    let query = if unread_only {
        format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE user_id = ? AND is_read = 0 ORDER BY created_at DESC LIMIT ? OFFSET ?"
        )
    } else {
        format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE user_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?"
        )
    };

    let rows = sqlx::query_as::<_, DbNotification>(&query)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Notification::from).collect())
}

#[instrument(skip(pool))]
pub async fn count_notifications(
    pool: &Pool<Sqlite>,
    user_id: i64,
    unread_only: bool,
) -> Result<i64, AppError> {
    let query = if unread_only {
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0"
    } else {
        "SELECT COUNT(*) FROM notifications WHERE user_id = ?"
    };

    let count = sqlx::query_scalar::<_, i64>(query)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn mark_notification_read(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Marking notification read");
    sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn mark_all_notifications_read(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<u64, AppError> {
    info!("Marking all notifications read");
    let res = sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(res.rows_affected())
}
