use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::User;
use crate::models::Course;

/// Prefix carried by every certificate number issued by this deployment.
pub const CERTIFICATE_PREFIX: &str = "CH";

/// `CH-{course}-{user}-{8 uppercase hex}`. The random suffix makes the
/// number unguessable; the unique index on certificate_number backs global
/// uniqueness.
pub fn generate_certificate_number(course_id: i64, user_id: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("{}-{}-{}-{}", CERTIFICATE_PREFIX, course_id, user_id, suffix)
}

pub fn certificate_artifact_path(certificate_number: &str) -> String {
    format!("certificates/{}.pdf", certificate_number)
}

pub fn verification_url(certificate_number: &str) -> String {
    format!("/api/v1/certificates/verify/{}", certificate_number)
}

/// Renders the completion document handed to the file store. The visual
/// treatment is deliberately minimal; the verification endpoint is the
/// authoritative proof.
pub fn render_certificate(
    holder: &User,
    course: &Course,
    certificate_number: &str,
    issued_at: DateTime<Utc>,
) -> Vec<u8> {
    format!(
        "CERTIFICATE OF COMPLETION\n\
         \n\
         This certifies that {holder} has successfully completed the course\n\
         \"{title}\", taught by {instructor}.\n\
         \n\
         Certificate number: {number}\n\
         Issued: {issued}\n\
         Verify at: {verify}\n",
        holder = holder.full_name(),
        title = course.title,
        instructor = course.instructor_name,
        number = certificate_number,
        issued = issued_at.format("%Y-%m-%d"),
        verify = verification_url(certificate_number),
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_certificate_number_shape() {
        let number = generate_certificate_number(12, 7);
        let parts: Vec<&str> = number.split('-').collect();

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], CERTIFICATE_PREFIX);
        assert_eq!(parts[1], "12");
        assert_eq!(parts[2], "7");
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_certificate_numbers_do_not_repeat() {
        let numbers: HashSet<String> = (0..100)
            .map(|_| generate_certificate_number(1, 1))
            .collect();
        assert_eq!(numbers.len(), 100);
    }
}
