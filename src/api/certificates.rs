use chrono::Utc;
use rocket::FromForm;
use rocket::State;
use rocket::http::{ContentType, Status};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use crate::auth::{Permission, Role, User};
use crate::db::{
    count_all_certificates, create_certificate, find_certificate, find_enrollment,
    get_certificate, get_certificate_proof, get_course, get_user, list_all_certificates,
    list_certificates_for_course, list_certificates_for_user, list_uncertified_completions,
    set_certificate_artifact,
};
use crate::error::AppError;
use crate::models::{Certificate, Course};
use crate::services::{
    FileStore, certificate_artifact_path, generate_certificate_number, render_certificate,
    verification_url,
};

use super::{PageParams, Pagination, UserData};

#[derive(Serialize, Deserialize)]
pub struct CertificateWithCourse {
    pub certificate: Certificate,
    pub course: Course,
}

#[derive(Serialize, Deserialize)]
pub struct CertificatesResponse {
    pub certificates: Vec<CertificateWithCourse>,
}

#[get("/")]
pub async fn api_get_certificates(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CertificatesResponse>, AppError> {
    user.require_permission(Permission::ViewOwnCertificates)?;

    let certificates = list_certificates_for_user(db, user.id).await?;

    let mut entries = Vec::with_capacity(certificates.len());
    for certificate in certificates {
        let course = get_course(db, certificate.course_id).await?;
        entries.push(CertificateWithCourse {
            certificate,
            course,
        });
    }

    Ok(Json(CertificatesResponse {
        certificates: entries,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct CertificateResponse {
    pub message: String,
    pub certificate: Certificate,
}

async fn issue_certificate(
    db: &Pool<Sqlite>,
    files: &dyn FileStore,
    holder: &User,
    course: &Course,
) -> Result<Certificate, AppError> {
    let number = generate_certificate_number(course.id, holder.id);
    let certificate_id = create_certificate(db, holder.id, course.id, &number).await?;

    let path = certificate_artifact_path(&number);
    let artifact = render_certificate(holder, course, &number, Utc::now());

    // A storage failure leaves the row issued but without an artifact;
    // regeneration backfills it.
    match files.save(&path, &artifact).await {
        Ok(()) => {
            set_certificate_artifact(db, certificate_id, &path, &verification_url(&number)).await?;
        }
        Err(err) => {
            warn!(certificate_id = %certificate_id, error = %err, "Failed to store certificate artifact");
            set_certificate_artifact(db, certificate_id, "", &verification_url(&number)).await?;
        }
    }

    get_certificate(db, certificate_id).await
}

/// Issues the caller's certificate for a completed course. Asking again
/// returns the existing certificate instead of minting a second one.
#[post("/generate/<course_id>")]
pub async fn api_generate_certificate(
    course_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
    files: &State<Box<dyn FileStore>>,
) -> Result<Custom<Json<CertificateResponse>>, AppError> {
    user.require_permission(Permission::ViewOwnCertificates)?;

    let enrollment = find_enrollment(db, user.id, course_id)
        .await?
        .filter(|enrollment| enrollment.is_active)
        .ok_or_else(|| AppError::NotFound("Not enrolled in this course".to_string()))?;

    if enrollment.completed_at.is_none() {
        return Err(AppError::Validation(
            "Course not completed yet".to_string(),
        ));
    }

    if let Some(existing) = find_certificate(db, user.id, course_id).await? {
        return Ok(Custom(
            Status::Ok,
            Json(CertificateResponse {
                message: "Certificate already exists".to_string(),
                certificate: existing,
            }),
        ));
    }

    let course = get_course(db, course_id).await?;
    let certificate = issue_certificate(db, files.inner().as_ref(), &user, &course).await?;

    Ok(Custom(
        Status::Created,
        Json(CertificateResponse {
            message: "Certificate generated successfully".to_string(),
            certificate,
        }),
    ))
}

#[get("/download/<certificate_id>")]
pub async fn api_download_certificate(
    certificate_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
    files: &State<Box<dyn FileStore>>,
) -> Result<(ContentType, Vec<u8>), AppError> {
    let certificate = get_certificate(db, certificate_id).await?;
    let course = get_course(db, certificate.course_id).await?;

    // Holder, course instructor and admins may download; anyone else learns
    // nothing about the certificate's existence.
    let allowed = certificate.user_id == user.id
        || course.instructor_id == user.id
        || matches!(user.role, Role::Admin);

    if !allowed {
        return Err(AppError::NotFound(format!(
            "Certificate with id {} not found",
            certificate_id
        )));
    }

    let path = certificate
        .file_path
        .filter(|path| !path.is_empty())
        .ok_or_else(|| AppError::NotFound("Certificate file not found".to_string()))?;

    let bytes = files.load(&path).await?;

    Ok((ContentType::PDF, bytes))
}

#[derive(Serialize, Deserialize)]
pub struct VerificationResponse {
    pub valid: bool,
    pub certificate: VerifiedCertificate,
}

#[derive(Serialize, Deserialize)]
pub struct VerifiedCertificate {
    pub certificate_number: String,
    pub issued_at: String,
    pub user_name: String,
    pub course_title: String,
    pub instructor_name: String,
    pub issued_by: String,
}

/// Public verification by number: the minimal proof record and nothing else.
#[get("/verify/<certificate_number>")]
pub async fn api_verify_certificate(
    certificate_number: &str,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<VerificationResponse>, AppError> {
    let proof = get_certificate_proof(db, certificate_number)
        .await?
        .ok_or_else(|| AppError::NotFound("Certificate not found".to_string()))?;

    Ok(Json(VerificationResponse {
        valid: true,
        certificate: VerifiedCertificate {
            certificate_number: proof.certificate_number,
            issued_at: proof.issued_at.to_rfc3339(),
            user_name: proof.holder_name,
            course_title: proof.course_title,
            instructor_name: proof.instructor_name,
            issued_by: "CourseHub".to_string(),
        },
    }))
}

/// Re-renders the artifact into the SAME certificate row, releasing the old
/// file first. Never creates a second certificate.
#[post("/regenerate/<certificate_id>")]
pub async fn api_regenerate_certificate(
    certificate_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
    files: &State<Box<dyn FileStore>>,
) -> Result<Json<CertificateResponse>, AppError> {
    let certificate = get_certificate(db, certificate_id).await?;
    user.conceal_unless_owner_or_admin(certificate.user_id, "Certificate")?;

    if let Some(old_path) = certificate.file_path.as_deref().filter(|p| !p.is_empty()) {
        files.delete(old_path).await?;
    }

    let holder = get_user(db, certificate.user_id).await?;
    let course = get_course(db, certificate.course_id).await?;

    let path = certificate_artifact_path(&certificate.certificate_number);
    let artifact = render_certificate(
        &holder,
        &course,
        &certificate.certificate_number,
        certificate.issued_at,
    );

    files.save(&path, &artifact).await?;
    set_certificate_artifact(
        db,
        certificate_id,
        &path,
        &verification_url(&certificate.certificate_number),
    )
    .await?;

    let certificate = get_certificate(db, certificate_id).await?;

    Ok(Json(CertificateResponse {
        message: "Certificate regenerated successfully".to_string(),
        certificate,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct CourseCertificatesResponse {
    pub course_id: i64,
    pub course_title: String,
    pub certificates: Vec<CertificateHolderEntry>,
}

#[derive(Serialize, Deserialize)]
pub struct CertificateHolderEntry {
    pub certificate: Certificate,
    pub user: UserData,
}

#[get("/course/<course_id>")]
pub async fn api_get_course_certificates(
    course_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseCertificatesResponse>, AppError> {
    let course = get_course(db, course_id).await?;
    user.require_owner_or_admin(course.instructor_id)?;

    let certificates = list_certificates_for_course(db, course_id).await?;

    let mut entries = Vec::with_capacity(certificates.len());
    for certificate in certificates {
        let holder = get_user(db, certificate.user_id).await?;
        entries.push(CertificateHolderEntry {
            certificate,
            user: UserData::from(holder),
        });
    }

    Ok(Json(CourseCertificatesResponse {
        course_id,
        course_title: course.title,
        certificates: entries,
    }))
}

#[derive(FromForm)]
pub struct CertificateAdminParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub course_id: Option<i64>,
    pub user_id: Option<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct AllCertificatesResponse {
    pub certificates: Vec<Certificate>,
    pub pagination: Pagination,
}

#[get("/admin/all?<params..>")]
pub async fn api_get_all_certificates(
    params: CertificateAdminParams,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AllCertificatesResponse>, AppError> {
    user.require_permission(Permission::BulkIssueCertificates)?;

    let page_params = PageParams {
        page: params.page,
        per_page: params.per_page,
    };
    let (page, per_page, offset) = page_params.resolve()?;

    let certificates =
        list_all_certificates(db, params.course_id, params.user_id, per_page, offset).await?;
    let total = count_all_certificates(db, params.course_id, params.user_id).await?;

    Ok(Json(AllCertificatesResponse {
        certificates,
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[derive(Deserialize)]
pub struct BulkGenerateRequest {
    course_id: i64,
}

#[derive(Serialize, Deserialize)]
pub struct BulkGenerateResponse {
    pub message: String,
    pub certificates_generated: i64,
    pub course_id: i64,
    pub course_title: String,
}

/// Issues certificates for every completed-but-uncertified enrollment on a
/// course. Individual failures are logged and skipped rather than aborting
/// the batch.
#[post("/admin/bulk-generate", data = "<request>")]
pub async fn api_bulk_generate_certificates(
    request: Json<BulkGenerateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    files: &State<Box<dyn FileStore>>,
) -> Result<Custom<Json<BulkGenerateResponse>>, AppError> {
    user.require_permission(Permission::BulkIssueCertificates)?;

    let course = get_course(db, request.course_id).await?;
    let eligible = list_uncertified_completions(db, course.id).await?;

    if eligible.is_empty() {
        return Ok(Custom(
            Status::Ok,
            Json(BulkGenerateResponse {
                message: "No eligible enrollments found for certificate generation".to_string(),
                certificates_generated: 0,
                course_id: course.id,
                course_title: course.title,
            }),
        ));
    }

    let mut generated = 0;
    for enrollment in eligible {
        let holder = get_user(db, enrollment.user_id).await?;
        match issue_certificate(db, files.inner().as_ref(), &holder, &course).await {
            Ok(_) => generated += 1,
            Err(err) => {
                warn!(user_id = %enrollment.user_id, course_id = %course.id, error = %err,
                    "Failed to generate certificate");
            }
        }
    }

    info!(course_id = %course.id, generated = %generated, "Bulk certificate generation completed");

    Ok(Custom(
        Status::Created,
        Json(BulkGenerateResponse {
            message: "Bulk certificate generation completed".to_string(),
            certificates_generated: generated,
            course_id: course.id,
            course_title: course.title,
        }),
    ))
}
