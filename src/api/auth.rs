use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use sqlx::{Pool, Sqlite};
use std::net::IpAddr;
use validator::Validate;

use crate::auth::{Role, SessionToken, User, UserSession};
use crate::db::{
    authenticate_user, create_user, create_user_session, find_user_by_email, get_user,
    invalidate_session, rotate_session, update_user_password,
};
use crate::error::AppError;
use crate::limiter::{AUTH_MAX_REQUESTS, AUTH_WINDOW, check_rate_limit};
use crate::services::{Mailer, send_welcome_email};
use crate::validation::{
    AppErrorExt, JsonValidateExt, ValidationResponse, validate_password_strength,
};

use super::UserData;

use serde::{Deserialize, Serialize};

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build(("session_token", token))
        .same_site(SameSite::Lax)
        .http_only(true)
        .build()
}

fn rate_limit_guard(
    remote: Option<IpAddr>,
    endpoint: &str,
) -> Result<(), Custom<Json<ValidationResponse>>> {
    let key = match remote {
        Some(ip) => format!("{}:{}", endpoint, ip),
        None => format!("{}:unknown", endpoint),
    };

    if check_rate_limit(&key, AUTH_MAX_REQUESTS, AUTH_WINDOW) {
        Ok(())
    } else {
        Err(Custom(
            Status::TooManyRequests,
            Json(ValidationResponse::with_error(
                "rate_limit",
                "Rate limit exceeded",
            )),
        ))
    }
}

#[derive(Deserialize, Validate, Clone)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    email: String,
    #[validate(custom(function = "validate_password_strength"))]
    password: String,
    #[validate(length(min = 1, message = "First name is required"))]
    first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    last_name: String,
    role: Option<String>,
    phone: Option<String>,
    bio: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct AuthResponse {
    pub message: String,
    pub user: UserData,
    pub access_token: String,
}

async fn open_session(
    db: &Pool<Sqlite>,
    cookies: &CookieJar<'_>,
    user_id: i64,
) -> Result<String, AppError> {
    let token = UserSession::generate_token();
    let expires_at = UserSession::default_expiry();

    create_user_session(db, user_id, &token, expires_at.naive_utc()).await?;

    cookies.add_private(session_cookie(token.clone()));

    Ok(token)
}

#[post("/register", data = "<registration>")]
pub async fn api_register(
    registration: Json<RegisterRequest>,
    cookies: &CookieJar<'_>,
    remote: Option<IpAddr>,
    db: &State<Pool<Sqlite>>,
    mailer: &State<Box<dyn Mailer>>,
) -> Result<Custom<Json<AuthResponse>>, Custom<Json<ValidationResponse>>> {
    rate_limit_guard(remote, "register")?;

    let validated = registration.validate_custom()?;

    // Self-service registration covers students and instructors; admin
    // accounts only come from an existing admin's promotion.
    let role = match validated.role.as_deref() {
        None => Role::Student,
        Some(raw) => match Role::from_str(raw) {
            Ok(Role::Admin) => {
                return Err(AppError::Validation(
                    "Cannot self-register as admin".to_string(),
                ))
                .validate_custom();
            }
            Ok(role) => role,
            Err(_) => {
                return Err(AppError::Validation(format!("Invalid role: {}", raw)))
                    .validate_custom();
            }
        },
    };

    let existing = find_user_by_email(db, &validated.email)
        .await
        .validate_custom()?;

    if existing.is_some() {
        return Err(AppError::Conflict("Email already registered".to_string())).validate_custom();
    }

    let user_id = create_user(
        db,
        &validated.email,
        &validated.password,
        &validated.first_name,
        &validated.last_name,
        role,
        validated.phone.as_deref(),
        validated.bio.as_deref(),
    )
    .await
    .validate_custom()?;

    let user = get_user(db, user_id).await.validate_custom()?;

    send_welcome_email(mailer.inner().as_ref(), &user);

    let token = open_session(db, cookies, user.id).await.validate_custom()?;

    Ok(Custom(
        Status::Created,
        Json(AuthResponse {
            message: "User registered successfully".to_string(),
            user: UserData::from(user),
            access_token: token,
        }),
    ))
}

#[derive(Deserialize, Validate, Clone)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    remote: Option<IpAddr>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AuthResponse>, Custom<Json<ValidationResponse>>> {
    rate_limit_guard(remote, "login")?;

    let validated = login.validate_custom()?;

    let user = authenticate_user(db, &validated.email, &validated.password)
        .await
        .validate_custom()?;

    let Some(user) = user else {
        return Err(AppError::Authentication(
            "Invalid email or password".to_string(),
        ))
        .validate_custom();
    };

    if !user.is_active {
        return Err(AppError::Authentication(
            "Account is deactivated".to_string(),
        ))
        .validate_custom();
    }

    let token = open_session(db, cookies, user.id).await.validate_custom()?;

    Ok(Json(AuthResponse {
        message: "Login successful".to_string(),
        user: UserData::from(user),
        access_token: token,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[post("/refresh")]
pub async fn api_refresh(
    user: User,
    token: SessionToken,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<RefreshResponse>, AppError> {
    let new_token = UserSession::generate_token();
    let expires_at = UserSession::default_expiry();

    rotate_session(db, &token.0, &new_token, expires_at.naive_utc()).await?;

    tracing::info!(user_id = %user.id, "Session token rotated");
    cookies.add_private(session_cookie(new_token.clone()));

    Ok(Json(RefreshResponse {
        access_token: new_token,
    }))
}

#[post("/logout")]
pub async fn api_logout(
    token: SessionToken,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    invalidate_session(db, &token.0).await?;
    cookies.remove_private(Cookie::build("session_token"));

    Ok(Json(serde_json::json!({
        "message": "Successfully logged out"
    })))
}

#[derive(Deserialize, Validate, Clone)]
pub struct PasswordChangeRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    current_password: String,
    #[validate(custom(function = "validate_password_strength"))]
    new_password: String,
}

#[post("/change-password", data = "<password>")]
pub async fn api_change_password(
    password: Json<PasswordChangeRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, Custom<Json<ValidationResponse>>> {
    let validated = password.validate_custom()?;

    let is_valid = authenticate_user(db, &user.email, &validated.current_password)
        .await
        .validate_custom()?;

    match is_valid {
        Some(_) => {
            update_user_password(db, user.id, &validated.new_password)
                .await
                .validate_custom()?;

            Ok(Json(serde_json::json!({
                "message": "Password changed successfully"
            })))
        }
        _ => Err(Custom(
            Status::Unauthorized,
            Json(ValidationResponse::with_error(
                "current_password",
                "Current password is incorrect",
            )),
        )),
    }
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[get("/me", rank = 2)]
pub async fn api_me_unauthorized() -> Status {
    Status::Unauthorized
}
