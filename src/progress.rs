//! Enrollment state transitions and progress arithmetic.
//!
//! Every enrollment write in the crate goes through these functions so the
//! guards (published course, single row per pair, one-way completion latch)
//! live in exactly one place.

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{CourseStatus, Enrollment};

/// What an enrollment request should do to the enrollments table.
#[derive(Debug, PartialEq, Eq)]
pub enum EnrollmentAction {
    /// No row exists for the pair: insert one.
    Create,
    /// An inactive row exists: flip it back to active, keeping its id.
    Reactivate(i64),
}

/// Decides the `unenrolled -> active` / `inactive -> active` transition.
///
/// A course only accepts enrollments while published; an already-active
/// enrollment is a conflict rather than a second row.
pub fn plan_enrollment(
    course_status: CourseStatus,
    existing: Option<&Enrollment>,
) -> Result<EnrollmentAction, AppError> {
    match course_status {
        CourseStatus::Published => {}
        CourseStatus::Draft | CourseStatus::Archived => {
            return Err(AppError::Validation(
                "Course is not available for enrollment".to_string(),
            ));
        }
    }

    match existing {
        None => Ok(EnrollmentAction::Create),
        Some(enrollment) if enrollment.is_active => Err(AppError::Conflict(
            "Already enrolled in this course".to_string(),
        )),
        Some(enrollment) => Ok(EnrollmentAction::Reactivate(enrollment.id)),
    }
}

/// Completed / total tracked lessons, as a percentage in [0, 100].
/// An enrollment with no tracked lessons sits at 0.
pub fn progress_percentage(completed_lessons: i64, total_tracked: i64) -> f64 {
    if total_tracked <= 0 {
        return 0.0;
    }

    let ratio = completed_lessons as f64 / total_tracked as f64;
    (ratio * 100.0).clamp(0.0, 100.0)
}

/// The completion latch: `completed_at` is stamped the first time progress
/// reaches exactly 100 and never cleared afterwards, even if a lesson is
/// later marked incomplete.
pub fn completion_latch(
    current: Option<DateTime<Utc>>,
    percentage: f64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match current {
        Some(stamped) => Some(stamped),
        None if percentage >= 100.0 => Some(now),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn enrollment(id: i64, is_active: bool) -> Enrollment {
        Enrollment {
            id,
            user_id: 1,
            course_id: 2,
            enrolled_at: Utc::now(),
            completed_at: None,
            progress_percentage: 0.0,
            is_active,
        }
    }

    #[test]
    fn test_enrollment_requires_published_course() {
        for status in [CourseStatus::Draft, CourseStatus::Archived] {
            let err = plan_enrollment(status, None).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }

        assert_eq!(
            plan_enrollment(CourseStatus::Published, None).unwrap(),
            EnrollmentAction::Create
        );
    }

    #[test]
    fn test_active_enrollment_is_a_conflict() {
        let existing = enrollment(9, true);
        let err = plan_enrollment(CourseStatus::Published, Some(&existing)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_inactive_enrollment_reactivates_same_row() {
        let existing = enrollment(9, false);
        assert_eq!(
            plan_enrollment(CourseStatus::Published, Some(&existing)).unwrap(),
            EnrollmentAction::Reactivate(9)
        );
    }

    #[test]
    fn test_percentage_is_deterministic_and_bounded() {
        assert_eq!(progress_percentage(0, 0), 0.0);
        assert_eq!(progress_percentage(0, 4), 0.0);
        assert_eq!(progress_percentage(1, 4), 25.0);
        assert_eq!(progress_percentage(3, 4), 75.0);
        assert_eq!(progress_percentage(4, 4), 100.0);
        // Counts outside the expected range still land in [0, 100].
        assert_eq!(progress_percentage(5, 4), 100.0);
        assert_eq!(progress_percentage(-1, 4), 0.0);
    }

    #[test]
    fn test_latch_stamps_once_at_full_completion() {
        let now = Utc::now();
        assert_eq!(completion_latch(None, 99.9, now), None);
        assert_eq!(completion_latch(None, 100.0, now), Some(now));
    }

    #[test]
    fn test_latch_never_clears() {
        let stamped = Utc::now() - Duration::days(3);
        let now = Utc::now();

        // Progress dropped back under 100: the stamp survives.
        assert_eq!(completion_latch(Some(stamped), 50.0, now), Some(stamped));
        // Re-reaching 100 keeps the original stamp.
        assert_eq!(completion_latch(Some(stamped), 100.0, now), Some(stamped));
    }
}
