use rocket::FromForm;
use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::auth::{Permission, Role, User};
use crate::db::{
    count_notifications, create_notification, get_notification, list_active_users_by_ids,
    list_active_users_by_role, list_notifications, mark_all_notifications_read,
    mark_notification_read,
};
use crate::error::AppError;
use crate::models::Notification;
use crate::services::{Mailer, send_best_effort};

use super::{PageParams, Pagination};

#[derive(FromForm)]
pub struct NotificationQueryParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub unread_only: Option<bool>,
}

#[derive(Serialize, Deserialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<Notification>,
    pub pagination: Pagination,
    pub unread_count: i64,
}

#[get("/?<params..>")]
pub async fn api_get_notifications(
    params: NotificationQueryParams,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<NotificationsResponse>, AppError> {
    user.require_permission(Permission::ViewOwnNotifications)?;

    let page_params = PageParams {
        page: params.page,
        per_page: params.per_page,
    };
    let (page, per_page, offset) = page_params.resolve()?;
    let unread_only = params.unread_only.unwrap_or(false);

    let notifications = list_notifications(db, user.id, unread_only, per_page, offset).await?;
    let total = count_notifications(db, user.id, unread_only).await?;
    let unread_count = count_notifications(db, user.id, true).await?;

    Ok(Json(NotificationsResponse {
        notifications,
        pagination: Pagination::new(page, per_page, total),
        unread_count,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

#[get("/unread-count")]
pub async fn api_get_unread_count(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UnreadCountResponse>, AppError> {
    let unread_count = count_notifications(db, user.id, true).await?;

    Ok(Json(UnreadCountResponse { unread_count }))
}

#[derive(Serialize, Deserialize)]
pub struct NotificationResponse {
    pub message: String,
    pub notification: Notification,
}

#[put("/<notification_id>/read")]
pub async fn api_mark_notification_read(
    notification_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<NotificationResponse>, AppError> {
    let notification = get_notification(db, notification_id).await?;
    user.conceal_unless_owner_or_admin(notification.user_id, "Notification")?;

    mark_notification_read(db, notification_id).await?;

    let notification = get_notification(db, notification_id).await?;

    Ok(Json(NotificationResponse {
        message: "Notification marked as read".to_string(),
        notification,
    }))
}

#[put("/mark-all-read")]
pub async fn api_mark_all_read(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    mark_all_notifications_read(db, user.id).await?;

    Ok(Json(serde_json::json!({
        "message": "All notifications marked as read"
    })))
}

#[derive(Deserialize)]
pub struct SendNotificationRequest {
    title: String,
    message: String,
    user_ids: Vec<i64>,
    #[serde(rename = "type")]
    kind: Option<String>,
    send_email: Option<bool>,
}

#[derive(Serialize, Deserialize)]
pub struct SendNotificationResponse {
    pub message: String,
    pub notifications_sent: i64,
    pub email_sent: bool,
}

#[post("/send", data = "<request>")]
pub async fn api_send_notification(
    request: Json<SendNotificationRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    mailer: &State<Box<dyn Mailer>>,
) -> Result<Custom<Json<SendNotificationResponse>>, AppError> {
    user.require_permission(Permission::SendNotifications)?;

    if request.title.trim().is_empty() || request.message.trim().is_empty() {
        return Err(AppError::Validation(
            "Title and message are required".to_string(),
        ));
    }

    let recipients = list_active_users_by_ids(db, &request.user_ids).await?;

    if recipients.is_empty() {
        return Err(AppError::Validation("No valid users found".to_string()));
    }

    let send_email = request.send_email.unwrap_or(false);
    let kind = request.kind.as_deref().unwrap_or("general");

    for recipient in &recipients {
        create_notification(db, recipient.id, &request.title, &request.message, Some(kind))
            .await?;

        // Email is best-effort; a delivery failure never unwinds the
        // notification row.
        if send_email {
            send_best_effort(
                mailer.inner().as_ref(),
                recipient,
                &request.title,
                &request.message,
            );
        }
    }

    Ok(Custom(
        Status::Created,
        Json(SendNotificationResponse {
            message: format!("Notifications sent to {} users", recipients.len()),
            notifications_sent: recipients.len() as i64,
            email_sent: send_email,
        }),
    ))
}

#[derive(Deserialize)]
pub struct BroadcastRequest {
    title: String,
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    send_email: Option<bool>,
    user_role: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub message: String,
    pub notifications_sent: i64,
    pub email_sent: bool,
    pub target_role: String,
}

#[post("/broadcast", data = "<request>")]
pub async fn api_broadcast_notification(
    request: Json<BroadcastRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    mailer: &State<Box<dyn Mailer>>,
) -> Result<Custom<Json<BroadcastResponse>>, AppError> {
    user.require_permission(Permission::SendNotifications)?;

    if request.title.trim().is_empty() || request.message.trim().is_empty() {
        return Err(AppError::Validation(
            "Title and message are required".to_string(),
        ));
    }

    let role = match request.user_role.as_deref() {
        Some(raw) => Some(
            Role::from_str(raw)
                .map_err(|_| AppError::Validation(format!("Invalid role: {}", raw)))?,
        ),
        None => None,
    };

    let recipients = list_active_users_by_role(db, role).await?;

    if recipients.is_empty() {
        return Err(AppError::Validation(
            "No users found to send notifications to".to_string(),
        ));
    }

    let send_email = request.send_email.unwrap_or(false);
    let kind = request.kind.as_deref().unwrap_or("general");

    for recipient in &recipients {
        create_notification(db, recipient.id, &request.title, &request.message, Some(kind))
            .await?;

        if send_email {
            send_best_effort(
                mailer.inner().as_ref(),
                recipient,
                &request.title,
                &request.message,
            );
        }
    }

    Ok(Custom(
        Status::Created,
        Json(BroadcastResponse {
            message: format!(
                "Broadcast notification sent to {} users",
                recipients.len()
            ),
            notifications_sent: recipients.len() as i64,
            email_sent: send_email,
            target_role: role.map(|r| r.to_string()).unwrap_or_else(|| "all".to_string()),
        }),
    ))
}
