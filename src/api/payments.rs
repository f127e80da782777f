use rocket::FromForm;
use rocket::State;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::auth::{Permission, User};
use crate::db::{
    count_payments_for_user, create_enrollment, create_payment, find_enrollment,
    find_payment_by_session, find_pending_payment, get_course, get_payment,
    list_payments_for_user, reactivate_enrollment, set_payment_gateway_refs, set_payment_status,
};
use crate::error::AppError;
use crate::models::{Course, CourseStatus, Payment, PaymentStatus};
use crate::services::{GatewayEventKind, PaymentGateway, SessionStatus};

use super::{PageParams, Pagination};

#[derive(Deserialize)]
pub struct CheckoutRequest {
    course_id: i64,
}

#[derive(Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
    pub payment_id: i64,
}

#[post("/checkout", data = "<request>")]
pub async fn api_create_checkout(
    request: Json<CheckoutRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    gateway: &State<Box<dyn PaymentGateway>>,
) -> Result<Json<CheckoutResponse>, AppError> {
    user.require_permission(Permission::InitiatePayments)?;

    let course = get_course(db, request.course_id).await?;

    if course.status != CourseStatus::Published {
        return Err(AppError::Validation(
            "Course is not available for purchase".to_string(),
        ));
    }

    if course.price <= Decimal::ZERO {
        return Err(AppError::Validation(
            "Course is free; enroll directly".to_string(),
        ));
    }

    let enrolled = find_enrollment(db, user.id, course.id)
        .await?
        .map(|enrollment| enrollment.is_active)
        .unwrap_or(false);

    if enrolled {
        return Err(AppError::Conflict(
            "Already enrolled in this course".to_string(),
        ));
    }

    if find_pending_payment(db, user.id, course.id).await?.is_some() {
        return Err(AppError::Conflict(
            "Payment already in progress".to_string(),
        ));
    }

    // The partial unique index still catches a race that slipped past the
    // read above.
    let payment_id = create_payment(db, user.id, course.id, course.price, &course.currency).await?;

    let session = match gateway
        .create_checkout_session(&course, &user, payment_id)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            // The local record must not stay pending when the provider never
            // saw the session.
            set_payment_status(db, payment_id, PaymentStatus::Failed).await?;
            return Err(err);
        }
    };

    set_payment_gateway_refs(db, payment_id, &session.id, None).await?;

    Ok(Json(CheckoutResponse {
        checkout_url: session.url,
        session_id: session.id,
        payment_id,
    }))
}

/// Completion is idempotent: a payment already completed, or an enrollment
/// already present, leaves exactly one enrollment row behind no matter how
/// many times the event is delivered. An inactive row is reactivated rather
/// than duplicated.
async fn complete_payment(
    db: &Pool<Sqlite>,
    payment: &Payment,
    payment_ref: Option<&str>,
) -> Result<(), AppError> {
    if payment.status != PaymentStatus::Completed {
        set_payment_status(db, payment.id, PaymentStatus::Completed).await?;
    }

    if let (Some(session_id), Some(payment_ref)) = (&payment.gateway_session_id, payment_ref) {
        set_payment_gateway_refs(db, payment.id, session_id, Some(payment_ref)).await?;
    }

    match find_enrollment(db, payment.user_id, payment.course_id).await? {
        None => {
            create_enrollment(db, payment.user_id, payment.course_id).await?;
            info!(payment_id = %payment.id, "Enrollment created from payment");
        }
        Some(enrollment) if !enrollment.is_active => {
            reactivate_enrollment(db, enrollment.id).await?;
            info!(payment_id = %payment.id, "Enrollment reactivated from payment");
        }
        Some(_) => {
            info!(payment_id = %payment.id, "Enrollment already exists; nothing to do");
        }
    }

    Ok(())
}

#[derive(Serialize, Deserialize)]
pub struct PaymentOutcomeResponse {
    pub message: String,
    pub payment: Payment,
}

#[get("/success/<payment_id>")]
pub async fn api_payment_success(
    payment_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
    gateway: &State<Box<dyn PaymentGateway>>,
) -> Result<Json<PaymentOutcomeResponse>, AppError> {
    let payment = get_payment(db, payment_id).await?;
    user.conceal_unless_owner_or_admin(payment.user_id, "Payment")?;

    let session_id = payment
        .gateway_session_id
        .clone()
        .ok_or_else(|| AppError::Validation("Payment has no checkout session".to_string()))?;

    match gateway.retrieve_session(&session_id).await? {
        SessionStatus::Paid => {
            complete_payment(db, &payment, None).await?;

            let payment = get_payment(db, payment_id).await?;
            Ok(Json(PaymentOutcomeResponse {
                message: "Payment successful! You are now enrolled in the course.".to_string(),
                payment,
            }))
        }
        SessionStatus::Unpaid => Err(AppError::Validation("Payment not confirmed".to_string())),
    }
}

#[get("/cancel/<payment_id>")]
pub async fn api_payment_cancel(
    payment_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<PaymentOutcomeResponse>, AppError> {
    let payment = get_payment(db, payment_id).await?;
    user.conceal_unless_owner_or_admin(payment.user_id, "Payment")?;

    if payment.status != PaymentStatus::Pending {
        return Err(AppError::Validation(
            "Only pending payments can be cancelled".to_string(),
        ));
    }

    set_payment_status(db, payment_id, PaymentStatus::Failed).await?;

    let payment = get_payment(db, payment_id).await?;

    Ok(Json(PaymentOutcomeResponse {
        message: "Payment was cancelled".to_string(),
        payment,
    }))
}

pub struct WebhookToken(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for WebhookToken {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(WebhookToken(
            request
                .headers()
                .get_one("X-Webhook-Token")
                .map(str::to_string),
        ))
    }
}

/// Provider callback. Deliveries are at-least-once; both event kinds are
/// safe to replay.
#[post("/webhook", data = "<payload>")]
pub async fn api_payment_webhook(
    payload: String,
    token: WebhookToken,
    db: &State<Pool<Sqlite>>,
    gateway: &State<Box<dyn PaymentGateway>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let event = gateway.verify_webhook(payload.as_bytes(), token.0.as_deref())?;

    let Some(payment) = find_payment_by_session(db, &event.session_id).await? else {
        // Unknown session: acknowledge so the provider stops retrying.
        tracing::warn!(session_id = %event.session_id, "Webhook for unknown session");
        return Ok(Json(serde_json::json!({ "status": "ignored" })));
    };

    match event.kind {
        GatewayEventKind::CheckoutCompleted => {
            complete_payment(db, &payment, event.payment_ref.as_deref()).await?;
        }
        GatewayEventKind::CheckoutExpired => {
            // Expiry only fails a still-pending payment; it never touches an
            // enrollment and never un-completes a paid one.
            if payment.status == PaymentStatus::Pending {
                set_payment_status(db, payment.id, PaymentStatus::Failed).await?;
            }
        }
    }

    Ok(Json(serde_json::json!({ "status": "success" })))
}

#[derive(Serialize, Deserialize)]
pub struct PaymentWithCourse {
    pub payment: Payment,
    pub course: Course,
}

#[derive(Serialize, Deserialize)]
pub struct PaymentHistoryResponse {
    pub payments: Vec<PaymentWithCourse>,
    pub pagination: Pagination,
}

#[derive(FromForm)]
pub struct HistoryQueryParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[get("/history?<params..>")]
pub async fn api_payment_history(
    params: HistoryQueryParams,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<PaymentHistoryResponse>, AppError> {
    let page_params = PageParams {
        page: params.page,
        per_page: params.per_page,
    };
    let (page, per_page, offset) = page_params.resolve()?;

    let payments = list_payments_for_user(db, user.id, per_page, offset).await?;
    let total = count_payments_for_user(db, user.id).await?;

    let mut entries = Vec::with_capacity(payments.len());
    for payment in payments {
        let course = get_course(db, payment.course_id).await?;
        entries.push(PaymentWithCourse { payment, course });
    }

    Ok(Json(PaymentHistoryResponse {
        payments: entries,
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[get("/<payment_id>", rank = 2)]
pub async fn api_get_payment(
    payment_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<PaymentWithCourse>, AppError> {
    let payment = get_payment(db, payment_id).await?;
    user.conceal_unless_owner_or_admin(payment.user_id, "Payment")?;

    let course = get_course(db, payment.course_id).await?;

    Ok(Json(PaymentWithCourse { payment, course }))
}

#[derive(Deserialize)]
pub struct RefundRequest {
    reason: Option<String>,
}

/// Records the request for the operations team; the refund itself is
/// processed out of band.
#[post("/<payment_id>/refund", data = "<request>")]
pub async fn api_request_refund(
    payment_id: i64,
    request: Json<RefundRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let payment = get_payment(db, payment_id).await?;
    user.conceal_unless_owner_or_admin(payment.user_id, "Payment")?;

    if payment.status != PaymentStatus::Completed {
        return Err(AppError::Validation(
            "Only completed payments can be refunded".to_string(),
        ));
    }

    let reason = request
        .reason
        .clone()
        .unwrap_or_else(|| "User requested refund".to_string());

    info!(payment_id = %payment_id, reason = %reason, "Refund requested");

    Ok(Json(serde_json::json!({
        "message": "Refund request submitted successfully. It will be processed by our admin team.",
        "payment_id": payment_id,
        "reason": reason,
    })))
}
