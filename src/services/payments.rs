use std::collections::HashMap;
use std::sync::Mutex;

use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::User;
use crate::error::AppError;
use crate::models::Course;

pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Paid,
    Unpaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEventKind {
    CheckoutCompleted,
    CheckoutExpired,
}

pub struct GatewayEvent {
    pub kind: GatewayEventKind,
    pub session_id: String,
    pub payment_ref: Option<String>,
}

/// The payment-provider boundary. The crate only ever needs these three
/// operations; everything provider-specific stays behind this trait.
#[rocket::async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        course: &Course,
        user: &User,
        payment_id: i64,
    ) -> Result<CheckoutSession, AppError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, AppError>;

    /// Authenticates an inbound webhook delivery and decodes it into a
    /// gateway event.
    fn verify_webhook(&self, payload: &[u8], token: Option<&str>) -> Result<GatewayEvent, AppError>;
}

#[derive(Deserialize)]
struct WebhookPayload {
    event: String,
    session_id: String,
    payment_ref: Option<String>,
}

/// Hosted-checkout stand-in used in development and tests: issues session
/// handles locally and learns about payment outcomes from verified webhook
/// deliveries, the same way the app would observe a real provider.
pub struct InProcessGateway {
    checkout_base_url: String,
    webhook_secret: String,
    sessions: Mutex<HashMap<String, bool>>,
}

impl InProcessGateway {
    pub fn new(checkout_base_url: String, webhook_secret: String) -> Self {
        Self {
            checkout_base_url,
            webhook_secret,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        let checkout_base_url = std::env::var("CHECKOUT_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8000/checkout".to_string());
        let webhook_secret =
            std::env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_else(|_| "dev-webhook-secret".to_string());

        Self::new(checkout_base_url, webhook_secret)
    }
}

#[rocket::async_trait]
impl PaymentGateway for InProcessGateway {
    #[instrument(skip_all, fields(payment_id, course_id = %course.id))]
    async fn create_checkout_session(
        &self,
        course: &Course,
        user: &User,
        payment_id: i64,
    ) -> Result<CheckoutSession, AppError> {
        let session_id = format!("cs_{}", Uuid::new_v4().simple());
        let url = format!(
            "{}/{}?course={}&payment={}",
            self.checkout_base_url, session_id, course.id, payment_id
        );

        info!(email = %user.email, session_id = %session_id, "Created checkout session");

        self.sessions
            .lock()
            .map_err(|_| AppError::Internal("Gateway session store poisoned".to_string()))?
            .insert(session_id.clone(), false);

        Ok(CheckoutSession {
            id: session_id,
            url,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, AppError> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| AppError::Internal("Gateway session store poisoned".to_string()))?;

        match sessions.get(session_id) {
            Some(true) => Ok(SessionStatus::Paid),
            Some(false) => Ok(SessionStatus::Unpaid),
            None => Err(AppError::ExternalService(format!(
                "Unknown checkout session {}",
                session_id
            ))),
        }
    }

    fn verify_webhook(&self, payload: &[u8], token: Option<&str>) -> Result<GatewayEvent, AppError> {
        let Some(token) = token else {
            return Err(AppError::Authentication(
                "Missing webhook signature".to_string(),
            ));
        };

        if token != self.webhook_secret {
            warn!("Webhook delivery with invalid signature");
            return Err(AppError::Authentication(
                "Invalid webhook signature".to_string(),
            ));
        }

        let payload: WebhookPayload = serde_json::from_slice(payload)
            .map_err(|err| AppError::Validation(format!("Malformed webhook payload: {}", err)))?;

        let kind = match payload.event.as_str() {
            "checkout.completed" => GatewayEventKind::CheckoutCompleted,
            "checkout.expired" => GatewayEventKind::CheckoutExpired,
            other => {
                return Err(AppError::Validation(format!(
                    "Unsupported webhook event: {}",
                    other
                )));
            }
        };

        // Keep the local view of the session in step with what the provider
        // just told us, so a later retrieve_session agrees with the webhook.
        if let Ok(mut sessions) = self.sessions.lock() {
            if kind == GatewayEventKind::CheckoutCompleted {
                sessions.insert(payload.session_id.clone(), true);
            }
        }

        Ok(GatewayEvent {
            kind,
            session_id: payload.session_id,
            payment_ref: payload.payment_ref,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> InProcessGateway {
        InProcessGateway::new(
            "http://localhost:8000/checkout".to_string(),
            "test-secret".to_string(),
        )
    }

    #[test]
    fn test_webhook_rejects_bad_signature() {
        let gateway = gateway();
        let payload = br#"{"event":"checkout.completed","session_id":"cs_1"}"#;

        assert!(gateway.verify_webhook(payload, None).is_err());
        assert!(gateway.verify_webhook(payload, Some("wrong")).is_err());
        assert!(gateway.verify_webhook(payload, Some("test-secret")).is_ok());
    }

    #[test]
    fn test_webhook_decodes_known_events() {
        let gateway = gateway();

        let completed = gateway
            .verify_webhook(
                br#"{"event":"checkout.completed","session_id":"cs_1","payment_ref":"pi_9"}"#,
                Some("test-secret"),
            )
            .unwrap();
        assert_eq!(completed.kind, GatewayEventKind::CheckoutCompleted);
        assert_eq!(completed.payment_ref.as_deref(), Some("pi_9"));

        let expired = gateway
            .verify_webhook(
                br#"{"event":"checkout.expired","session_id":"cs_1"}"#,
                Some("test-secret"),
            )
            .unwrap();
        assert_eq!(expired.kind, GatewayEventKind::CheckoutExpired);

        let unknown = gateway.verify_webhook(
            br#"{"event":"invoice.created","session_id":"cs_1"}"#,
            Some("test-secret"),
        );
        assert!(unknown.is_err());
    }
}
