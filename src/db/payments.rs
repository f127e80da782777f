use rust_decimal::Decimal;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{DbPayment, Payment, PaymentStatus};

const PAYMENT_COLUMNS: &str = "id, user_id, course_id, amount, currency, status, \
     gateway_session_id, gateway_payment_id, payment_method, created_at, updated_at";

#[instrument(skip(pool))]
pub async fn get_payment(pool: &Pool<Sqlite>, id: i64) -> Result<Payment, AppError> {
    let row = sqlx::query_as::<_, DbPayment>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(payment) => Ok(Payment::from(payment)),
        _ => Err(AppError::NotFound(format!(
            "Payment with id {} not found",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_pending_payment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
) -> Result<Option<Payment>, AppError> {
    let row = sqlx::query_as::<_, DbPayment>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments
         WHERE user_id = ? AND course_id = ? AND status = 'pending'"
    ))
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Payment::from))
}

#[instrument(skip(pool, token))]
pub async fn find_payment_by_session(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<Option<Payment>, AppError> {
    let row = sqlx::query_as::<_, DbPayment>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE gateway_session_id = ?"
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Payment::from))
}

/// The partial unique index on (user_id, course_id) WHERE status = 'pending'
/// makes the "one pending checkout per pair" rule hold even when two
/// requests race past the read check.
#[instrument(skip(pool))]
pub async fn create_payment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    amount: Decimal,
    currency: &str,
) -> Result<i64, AppError> {
    info!("Creating payment record");
    let res = sqlx::query(
        "INSERT INTO payments (user_id, course_id, amount, currency) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(amount.to_string())
    .bind(currency)
    .execute(pool)
    .await
    .map_err(|err| match AppError::from(err) {
        AppError::Conflict(_) => AppError::Conflict("Payment already in progress".to_string()),
        other => other,
    })?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn set_payment_status(
    pool: &Pool<Sqlite>,
    payment_id: i64,
    status: PaymentStatus,
) -> Result<(), AppError> {
    info!("Setting payment status");
    sqlx::query("UPDATE payments SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(status.as_str())
        .bind(payment_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool, session_id, payment_ref))]
pub async fn set_payment_gateway_refs(
    pool: &Pool<Sqlite>,
    payment_id: i64,
    session_id: &str,
    payment_ref: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE payments SET gateway_session_id = ?, gateway_payment_id = ?,
                updated_at = CURRENT_TIMESTAMP
         WHERE id = ?",
    )
    .bind(session_id)
    .bind(payment_ref)
    .bind(payment_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_payments_for_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<Payment>, AppError> {
    let rows = sqlx::query_as::<_, DbPayment>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments
         WHERE user_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?"
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Payment::from).collect())
}

#[instrument(skip(pool))]
pub async fn count_payments_for_user(pool: &Pool<Sqlite>, user_id: i64) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payments WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn list_all_payments(
    pool: &Pool<Sqlite>,
    status: Option<PaymentStatus>,
    user_id: Option<i64>,
    course_id: Option<i64>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Payment>, AppError> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE 1 = 1"
    ));

    if let Some(status) = status {
        query.push(" AND status = ").push_bind(status.as_str());
    }

    if let Some(user_id) = user_id {
        query.push(" AND user_id = ").push_bind(user_id);
    }

    if let Some(course_id) = course_id {
        query.push(" AND course_id = ").push_bind(course_id);
    }

    query
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows: Vec<DbPayment> = query.build_query_as().fetch_all(pool).await?;

    Ok(rows.into_iter().map(Payment::from).collect())
}

#[instrument(skip(pool))]
pub async fn count_all_payments(
    pool: &Pool<Sqlite>,
    status: Option<PaymentStatus>,
    user_id: Option<i64>,
    course_id: Option<i64>,
) -> Result<i64, AppError> {
    let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM payments WHERE 1 = 1");

    if let Some(status) = status {
        query.push(" AND status = ").push_bind(status.as_str());
    }

    if let Some(user_id) = user_id {
        query.push(" AND user_id = ").push_bind(user_id);
    }

    if let Some(course_id) = course_id {
        query.push(" AND course_id = ").push_bind(course_id);
    }

    let count: i64 = query.build_query_scalar().fetch_one(pool).await?;

    Ok(count)
}

// Amounts are stored as decimal strings, so revenue is summed in Decimal
// space rather than delegated to SQLite's float arithmetic.
#[instrument(skip(pool))]
pub async fn total_completed_revenue(pool: &Pool<Sqlite>) -> Result<Decimal, AppError> {
    let amounts = sqlx::query_scalar::<_, String>(
        "SELECT amount FROM payments WHERE status = 'completed'",
    )
    .fetch_all(pool)
    .await?;

    Ok(amounts
        .iter()
        .filter_map(|amount| Decimal::from_str_exact(amount).ok())
        .sum())
}

#[derive(sqlx::FromRow)]
struct MonthlyAmountRow {
    month: String,
    amount: String,
}

pub struct MonthlyRevenue {
    pub month: String,
    pub revenue: Decimal,
}

#[instrument(skip(pool))]
pub async fn revenue_by_month(pool: &Pool<Sqlite>) -> Result<Vec<MonthlyRevenue>, AppError> {
    let rows = sqlx::query_as::<_, MonthlyAmountRow>(
        "SELECT strftime('%Y-%m', created_at) AS month, amount
         FROM payments WHERE status = 'completed' ORDER BY month",
    )
    .fetch_all(pool)
    .await?;

    let mut by_month: Vec<MonthlyRevenue> = Vec::new();
    for row in rows {
        let amount = Decimal::from_str_exact(&row.amount).unwrap_or_default();
        match by_month.last_mut() {
            Some(entry) if entry.month == row.month => entry.revenue += amount,
            _ => by_month.push(MonthlyRevenue {
                month: row.month,
                revenue: amount,
            }),
        }
    }

    Ok(by_month)
}
