use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::{Value, json};
use sqlx::SqlitePool;

use crate::db::{get_session_by_token, get_user};

use super::User;

/// Hours an issued session token stays valid. Refresh rotates the token and
/// restarts the clock.
pub const SESSION_TTL_HOURS: i64 = 24;

pub struct UserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl From<DbUserSession> for UserSession {
    fn from(session: DbUserSession) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id,
            token: session.token,
            created_at: DateTime::<Utc>::from_naive_utc_and_offset(session.created_at, Utc),
            expires_at: DateTime::<Utc>::from_naive_utc_and_offset(session.expires_at, Utc),
        }
    }
}

impl UserSession {
    pub fn generate_token() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect()
    }

    pub fn default_expiry() -> DateTime<Utc> {
        Utc::now() + Duration::hours(SESSION_TTL_HOURS)
    }

    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

fn bearer_token(request: &Request<'_>) -> Option<String> {
    request
        .headers()
        .get_one("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

// Revoked tokens (logout deletes the session row) and expired tokens are
// rejected here, before any handler or role check runs.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("user_auth_guard");
        let _guard = auth_span.enter();

        let token = bearer_token(request).or_else(|| {
            request
                .cookies()
                .get_private("session_token")
                .map(|c| c.value().to_string())
        });

        let Some(token) = token else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let db = match request.rocket().state::<SqlitePool>() {
            Some(pool) => pool,
            _ => {
                tracing::error!("Database pool not found in managed state");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        match get_session_by_token(db, &token).await {
            Ok(session) => {
                if !session.is_valid() {
                    tracing::warn!("Session token expired");
                    return Outcome::Error((Status::Unauthorized, ()));
                }

                match get_user(db, session.user_id).await {
                    Ok(user) => {
                        if !user.is_active {
                            tracing::warn!(user_id = %user.id, "Deactivated account presented a valid token");
                            return Outcome::Error((Status::Unauthorized, ()));
                        }

                        tracing::info!(email = %user.email, role = %user.role.as_str(), "User authenticated via session token");
                        Outcome::Success(user)
                    }
                    Err(err) => {
                        tracing::error!(user_id = %session.user_id, error = ?err, "Failed to fetch user for valid session");
                        Outcome::Error((Status::InternalServerError, ()))
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = ?err, "Invalid session token");
                Outcome::Error((Status::Unauthorized, ()))
            }
        }
    }
}

/// The raw token presented on this request, for logout/refresh handlers that
/// operate on the session itself rather than the user behind it.
pub struct SessionToken(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionToken {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let token = bearer_token(request).or_else(|| {
            request
                .cookies()
                .get_private("session_token")
                .map(|c| c.value().to_string())
        });

        match token {
            Some(token) => Outcome::Success(SessionToken(token)),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<Value>> {
    let error_json = json!({
        "error": "Unauthorized",
        "message": "Authentication required"
    });

    Custom(Status::Unauthorized, Json(error_json))
}

#[catch(404)]
pub fn not_found_api(_req: &Request) -> Custom<Json<Value>> {
    let error_json = json!({
        "error": "Not found",
        "message": "Resource not found"
    });

    Custom(Status::NotFound, Json(error_json))
}
