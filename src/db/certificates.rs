use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{Certificate, DbCertificate, DbEnrollment, Enrollment};

const CERTIFICATE_COLUMNS: &str =
    "id, user_id, course_id, certificate_number, issued_at, file_path, verification_url";

#[instrument(skip(pool))]
pub async fn get_certificate(pool: &Pool<Sqlite>, id: i64) -> Result<Certificate, AppError> {
    let row = sqlx::query_as::<_, DbCertificate>(&format!(
        "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(certificate) => Ok(Certificate::from(certificate)),
        _ => Err(AppError::NotFound(format!(
            "Certificate with id {} not found",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_certificate(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
) -> Result<Option<Certificate>, AppError> {
    let row = sqlx::query_as::<_, DbCertificate>(&format!(
        "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE user_id = ? AND course_id = ?"
    ))
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Certificate::from))
}

/// The UNIQUE (user_id, course_id) constraint backs the one-certificate-per-
/// pair invariant at the data layer.
#[instrument(skip(pool, number))]
pub async fn create_certificate(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    number: &str,
) -> Result<i64, AppError> {
    info!("Creating certificate");
    let res = sqlx::query(
        "INSERT INTO certificates (user_id, course_id, certificate_number) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(number)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, file_path, verification_url))]
pub async fn set_certificate_artifact(
    pool: &Pool<Sqlite>,
    certificate_id: i64,
    file_path: &str,
    verification_url: &str,
) -> Result<(), AppError> {
    sqlx::query("UPDATE certificates SET file_path = ?, verification_url = ? WHERE id = ?")
        .bind(file_path)
        .bind(verification_url)
        .bind(certificate_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_certificates_for_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<Certificate>, AppError> {
    let rows = sqlx::query_as::<_, DbCertificate>(&format!(
        "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE user_id = ? ORDER BY issued_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Certificate::from).collect())
}

#[instrument(skip(pool))]
pub async fn list_certificates_for_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<Certificate>, AppError> {
    let rows = sqlx::query_as::<_, DbCertificate>(&format!(
        "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE course_id = ? ORDER BY issued_at DESC"
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Certificate::from).collect())
}

#[instrument(skip(pool))]
pub async fn list_all_certificates(
    pool: &Pool<Sqlite>,
    course_id: Option<i64>,
    user_id: Option<i64>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Certificate>, AppError> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE 1 = 1"
    ));

    if let Some(course_id) = course_id {
        query.push(" AND course_id = ").push_bind(course_id);
    }

    if let Some(user_id) = user_id {
        query.push(" AND user_id = ").push_bind(user_id);
    }

    query
        .push(" ORDER BY issued_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows: Vec<DbCertificate> = query.build_query_as().fetch_all(pool).await?;

    Ok(rows.into_iter().map(Certificate::from).collect())
}

#[instrument(skip(pool))]
pub async fn count_all_certificates(
    pool: &Pool<Sqlite>,
    course_id: Option<i64>,
    user_id: Option<i64>,
) -> Result<i64, AppError> {
    let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM certificates WHERE 1 = 1");

    if let Some(course_id) = course_id {
        query.push(" AND course_id = ").push_bind(course_id);
    }

    if let Some(user_id) = user_id {
        query.push(" AND user_id = ").push_bind(user_id);
    }

    let count: i64 = query.build_query_scalar().fetch_one(pool).await?;

    Ok(count)
}

/// Completed enrollments on a course whose holder has no certificate yet.
/// Feeds bulk issuance.
#[instrument(skip(pool))]
pub async fn list_uncertified_completions(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<Enrollment>, AppError> {
    let rows = sqlx::query_as::<_, DbEnrollment>(
        "SELECT id, user_id, course_id, enrolled_at, completed_at, progress_percentage, is_active
         FROM enrollments
         WHERE course_id = ? AND completed_at IS NOT NULL AND is_active = 1
           AND user_id NOT IN (SELECT user_id FROM certificates WHERE course_id = ?)",
    )
    .bind(course_id)
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Enrollment::from).collect())
}

/// Minimal public proof record: holder, course, issuer, issue date. Nothing
/// else leaves the verification endpoint.
pub struct CertificateProof {
    pub certificate_number: String,
    pub issued_at: DateTime<Utc>,
    pub holder_name: String,
    pub course_title: String,
    pub instructor_name: String,
}

#[derive(sqlx::FromRow)]
struct DbCertificateProof {
    certificate_number: String,
    issued_at: NaiveDateTime,
    holder_name: String,
    course_title: String,
    instructor_name: String,
}

#[instrument(skip(pool, number))]
pub async fn get_certificate_proof(
    pool: &Pool<Sqlite>,
    number: &str,
) -> Result<Option<CertificateProof>, AppError> {
    let row = sqlx::query_as::<_, DbCertificateProof>(
        "SELECT cert.certificate_number, cert.issued_at,
                (holder.first_name || ' ' || holder.last_name) AS holder_name,
                c.title AS course_title,
                (i.first_name || ' ' || i.last_name) AS instructor_name
         FROM certificates cert
         JOIN users holder ON holder.id = cert.user_id
         JOIN courses c ON c.id = cert.course_id
         JOIN users i ON i.id = c.instructor_id
         WHERE cert.certificate_number = ?",
    )
    .bind(number)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|proof| CertificateProof {
        certificate_number: proof.certificate_number,
        issued_at: DateTime::<Utc>::from_naive_utc_and_offset(proof.issued_at, Utc),
        holder_name: proof.holder_name,
        course_title: proof.course_title,
        instructor_name: proof.instructor_name,
    }))
}
