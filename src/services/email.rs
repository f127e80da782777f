use tracing::{info, warn};

use crate::auth::User;
use crate::error::AppError;

/// Delivery boundary: the crate hands a message over and moves on. The
/// transport (SMTP relay, provider API) lives behind this trait.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError>;
}

/// Default transport that records the message instead of delivering it.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), AppError> {
        info!(to = %to, subject = %subject, "Email dispatched");
        Ok(())
    }
}

/// Fire-and-forget send. Delivery failures are logged and swallowed; they
/// never roll back the write that triggered the message.
pub fn send_best_effort(mailer: &dyn Mailer, user: &User, subject: &str, body: &str) {
    if let Err(err) = mailer.send(&user.email, subject, body) {
        warn!(to = %user.email, error = %err, "Failed to send email");
    }
}

pub fn send_welcome_email(mailer: &dyn Mailer, user: &User) {
    send_best_effort(
        mailer,
        user,
        "Welcome to CourseHub",
        &format!(
            "Hi {}, your account is ready. Browse the catalog to get started.",
            user.first_name
        ),
    );
}
