#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod db;
mod env;
mod error;
mod limiter;
mod models;
mod progress;
mod services;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use api::health;
use api::admin::{
    api_admin_analytics, api_admin_dashboard, api_admin_deactivate_user, api_admin_get_user,
    api_admin_list_courses, api_admin_list_enrollments, api_admin_list_payments,
    api_admin_list_users, api_admin_promote_instructor, api_admin_set_course_status,
    api_admin_update_user,
};
use api::auth::{
    api_change_password, api_login, api_logout, api_me, api_me_unauthorized, api_refresh,
    api_register,
};
use api::certificates::{
    api_bulk_generate_certificates, api_download_certificate, api_generate_certificate,
    api_get_all_certificates, api_get_certificates, api_get_course_certificates,
    api_regenerate_certificate, api_verify_certificate,
};
use api::courses::{
    api_create_course, api_create_lesson, api_create_module, api_delete_course,
    api_delete_lesson, api_delete_module, api_get_course, api_get_course_enrollments,
    api_get_my_courses, api_list_courses, api_publish_course, api_update_course,
    api_update_lesson, api_update_module,
};
use api::files::{
    api_delete_resource, api_download_resource, api_list_lesson_resources,
    api_upload_lesson_resource,
};
use api::live_sessions::{
    api_create_live_session, api_delete_live_session, api_get_live_session,
    api_list_live_sessions, api_update_live_session,
};
use api::notifications::{
    api_broadcast_notification, api_get_notifications, api_get_unread_count, api_mark_all_read,
    api_mark_notification_read, api_send_notification,
};
use api::payments::{
    api_create_checkout, api_get_payment, api_payment_cancel, api_payment_history,
    api_payment_success, api_payment_webhook, api_request_refund,
};
use api::users::{
    api_enroll, api_get_course_progress, api_get_dashboard, api_get_enrollments,
    api_get_my_certificates, api_get_profile, api_update_lesson_progress, api_update_profile,
};
use auth::{not_found_api, unauthorized_api};
use db::clean_expired_sessions;
use env::load_environment;
use error::AppError;
use rocket::{Build, Rocket, tokio};
use services::{
    FileStore, InProcessGateway, LocalFileStore, LogMailer, Mailer, PaymentGateway,
};
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;

use sqlx::SqlitePool;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Figment(rocket::figment::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::figment::Error> for Error {
    fn from(value: rocket::figment::Error) -> Self {
        Error::Figment(value)
    }
}

#[launch]
async fn rocket() -> _ {
    if let Err(e) = load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    init_tracing();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_default();

    let pool = SqlitePool::connect(&database_url)
        .await
        .expect("Failed to connect to SQLite database");

    let pool_clone = pool.clone();

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
        }
    });

    info!("Running database migrations...");
    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            error!("Failed to run migrations: {}", e);
            panic!("Database migration failed: {}", e);
        }
    }

    let gateway: Box<dyn PaymentGateway> = Box::new(InProcessGateway::from_env());
    let files: Box<dyn FileStore> = Box::new(LocalFileStore::from_env());
    let mailer: Box<dyn Mailer> = Box::new(LogMailer);

    init_rocket(pool, gateway, files, mailer).await
}

pub async fn init_rocket(
    pool: SqlitePool,
    gateway: Box<dyn PaymentGateway>,
    files: Box<dyn FileStore>,
    mailer: Box<dyn Mailer>,
) -> Rocket<Build> {
    info!("Starting course hub");

    rocket::build()
        .manage(pool)
        .manage(gateway)
        .manage(files)
        .manage(mailer)
        .mount("/api/v1", routes![health])
        .mount(
            "/api/v1/auth",
            routes![
                api_register,
                api_login,
                api_refresh,
                api_logout,
                api_change_password,
                api_me,
                api_me_unauthorized,
            ],
        )
        .mount(
            "/api/v1/users",
            routes![
                api_get_profile,
                api_update_profile,
                api_get_enrollments,
                api_enroll,
                api_get_course_progress,
                api_update_lesson_progress,
                api_get_my_certificates,
                api_get_dashboard,
            ],
        )
        .mount(
            "/api/v1/courses",
            routes![
                api_list_courses,
                api_get_course,
                api_create_course,
                api_update_course,
                api_delete_course,
                api_create_module,
                api_update_module,
                api_delete_module,
                api_create_lesson,
                api_update_lesson,
                api_delete_lesson,
                api_get_my_courses,
                api_publish_course,
                api_get_course_enrollments,
            ],
        )
        .mount(
            "/api/v1/admin",
            routes![
                api_admin_dashboard,
                api_admin_list_users,
                api_admin_get_user,
                api_admin_update_user,
                api_admin_deactivate_user,
                api_admin_promote_instructor,
                api_admin_list_courses,
                api_admin_set_course_status,
                api_admin_list_payments,
                api_admin_list_enrollments,
                api_admin_analytics,
            ],
        )
        .mount(
            "/api/v1/payments",
            routes![
                api_create_checkout,
                api_payment_success,
                api_payment_cancel,
                api_payment_webhook,
                api_payment_history,
                api_get_payment,
                api_request_refund,
            ],
        )
        .mount(
            "/api/v1/certificates",
            routes![
                api_get_certificates,
                api_generate_certificate,
                api_download_certificate,
                api_verify_certificate,
                api_regenerate_certificate,
                api_get_course_certificates,
                api_get_all_certificates,
                api_bulk_generate_certificates,
            ],
        )
        .mount(
            "/api/v1/notifications",
            routes![
                api_get_notifications,
                api_get_unread_count,
                api_mark_notification_read,
                api_mark_all_read,
                api_send_notification,
                api_broadcast_notification,
            ],
        )
        .mount(
            "/api/v1/files",
            routes![
                api_upload_lesson_resource,
                api_list_lesson_resources,
                api_download_resource,
                api_delete_resource,
            ],
        )
        .mount(
            "/api/v1/live-sessions",
            routes![
                api_list_live_sessions,
                api_get_live_session,
                api_create_live_session,
                api_update_live_session,
                api_delete_live_session,
            ],
        )
        .register("/api", catchers![unauthorized_api, not_found_api])
        .attach(TelemetryFairing)
}
