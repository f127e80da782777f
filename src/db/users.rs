use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::auth::{DbUser, Role, User};
use crate::error::AppError;

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, role, is_active, \
     email_verified, phone, bio, profile_picture, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct DbCredentialRow {
    id: i64,
    password_hash: String,
}

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!("User with id {} not found", id))),
    }
}

#[instrument(skip(pool))]
pub async fn find_user_by_email(
    pool: &Pool<Sqlite>,
    email: &str,
) -> Result<Option<User>, AppError> {
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
    ))
    .bind(email.to_lowercase())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip_all, fields(email))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let row = sqlx::query_as::<_, DbCredentialRow>(
        "SELECT id, password_hash FROM users WHERE email = ?",
    )
    .bind(email.to_lowercase())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(credentials) => match bcrypt::verify(password, &credentials.password_hash) {
            Ok(true) => Ok(Some(get_user(pool, credentials.id).await?)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(email, role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
    role: Role,
    phone: Option<&str>,
    bio: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let email = email.to_lowercase();
    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (email, password_hash, first_name, last_name, role, phone, bio)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&email)
    .bind(hashed_password)
    .bind(first_name)
    .bind(last_name)
    .bind(role.as_str())
    .bind(phone)
    .bind(bio)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn update_user_profile(
    pool: &Pool<Sqlite>,
    user_id: i64,
    first_name: &str,
    last_name: &str,
    phone: Option<&str>,
    bio: Option<&str>,
    profile_picture: Option<&str>,
) -> Result<(), AppError> {
    info!("Updating user profile");
    sqlx::query(
        "UPDATE users
         SET first_name = ?, last_name = ?, phone = ?, bio = ?, profile_picture = ?,
             updated_at = CURRENT_TIMESTAMP
         WHERE id = ?",
    )
    .bind(first_name)
    .bind(last_name)
    .bind(phone)
    .bind(bio)
    .bind(profile_picture)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Changing the address resets verification; a taken address is a conflict.
#[instrument(skip(pool))]
pub async fn update_user_email(
    pool: &Pool<Sqlite>,
    user_id: i64,
    new_email: &str,
) -> Result<(), AppError> {
    info!("Updating user email");

    let new_email = new_email.to_lowercase();
    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE email = ? AND id != ?")
        .bind(&new_email)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict("Email already taken".to_string()));
    }

    sqlx::query(
        "UPDATE users SET email = ?, email_verified = 0, updated_at = CURRENT_TIMESTAMP
         WHERE id = ?",
    )
    .bind(&new_email)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip_all, fields(user_id))]
pub async fn update_user_password(
    pool: &Pool<Sqlite>,
    user_id: i64,
    new_password: &str,
) -> Result<(), AppError> {
    info!("Updating user password");
    let hashed_password = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;

    sqlx::query("UPDATE users SET password_hash = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(hashed_password)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn set_user_active(
    pool: &Pool<Sqlite>,
    user_id: i64,
    is_active: bool,
) -> Result<(), AppError> {
    info!("Toggling user active flag");
    sqlx::query("UPDATE users SET is_active = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(is_active)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn update_user_role(
    pool: &Pool<Sqlite>,
    user_id: i64,
    role: Role,
) -> Result<(), AppError> {
    info!("Updating user role");
    sqlx::query("UPDATE users SET role = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(role.as_str())
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_users(
    pool: &Pool<Sqlite>,
    role: Option<Role>,
    search: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<User>, AppError> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {USER_COLUMNS} FROM users WHERE 1 = 1"
    ));

    if let Some(role) = role {
        query.push(" AND role = ").push_bind(role.as_str());
    }

    if let Some(search) = search {
        let pattern = format!("%{}%", search);
        query
            .push(" AND (first_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern)
            .push(")");
    }

    query
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows: Vec<DbUser> = query.build_query_as().fetch_all(pool).await?;

    Ok(rows.into_iter().map(User::from).collect())
}

#[instrument(skip(pool))]
pub async fn count_users(
    pool: &Pool<Sqlite>,
    role: Option<Role>,
    search: Option<&str>,
) -> Result<i64, AppError> {
    let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users WHERE 1 = 1");

    if let Some(role) = role {
        query.push(" AND role = ").push_bind(role.as_str());
    }

    if let Some(search) = search {
        let pattern = format!("%{}%", search);
        query
            .push(" AND (first_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern)
            .push(")");
    }

    let count: i64 = query.build_query_scalar().fetch_one(pool).await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn list_active_users_by_ids(
    pool: &Pool<Sqlite>,
    user_ids: &[i64],
) -> Result<Vec<User>, AppError> {
    if user_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {USER_COLUMNS} FROM users WHERE is_active = 1 AND id IN ("
    ));

    let mut separated = query.separated(", ");
    for id in user_ids {
        separated.push_bind(id);
    }
    query.push(")");

    let rows: Vec<DbUser> = query.build_query_as().fetch_all(pool).await?;

    Ok(rows.into_iter().map(User::from).collect())
}

#[instrument(skip(pool))]
pub async fn list_active_users_by_role(
    pool: &Pool<Sqlite>,
    role: Option<Role>,
) -> Result<Vec<User>, AppError> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {USER_COLUMNS} FROM users WHERE is_active = 1"
    ));

    if let Some(role) = role {
        query.push(" AND role = ").push_bind(role.as_str());
    }

    let rows: Vec<DbUser> = query.build_query_as().fetch_all(pool).await?;

    Ok(rows.into_iter().map(User::from).collect())
}
