use anyhow::Error;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

fn to_utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl CourseStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CourseStatus::Draft => "draft",
            CourseStatus::Published => "published",
            CourseStatus::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "draft" => Ok(CourseStatus::Draft),
            "published" => Ok(CourseStatus::Published),
            "archived" => Ok(CourseStatus::Archived),
            _ => Err(Error::msg(format!("Unknown course status: {}", s))),
        }
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(Error::msg(format!("Unknown payment status: {}", s))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub instructor_id: i64,
    pub instructor_name: String, // joined from users at query time
    pub price: Decimal,
    pub currency: String,
    pub duration_hours: Option<i64>,
    pub difficulty_level: Option<String>,
    pub thumbnail: Option<String>,
    pub status: CourseStatus,
    pub max_students: Option<i64>,
    pub prerequisites: Option<String>,
    pub learning_outcomes: Option<String>,
    pub enrollment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbCourse {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub instructor_id: i64,
    pub instructor_name: String,
    pub price: String,
    pub currency: String,
    pub duration_hours: Option<i64>,
    pub difficulty_level: Option<String>,
    pub thumbnail: Option<String>,
    pub status: String,
    pub max_students: Option<i64>,
    pub prerequisites: Option<String>,
    pub learning_outcomes: Option<String>,
    pub enrollment_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<DbCourse> for Course {
    fn from(course: DbCourse) -> Self {
        Self {
            id: course.id,
            title: course.title,
            description: course.description,
            short_description: course.short_description,
            instructor_id: course.instructor_id,
            instructor_name: course.instructor_name,
            price: Decimal::from_str_exact(&course.price).unwrap_or_default(),
            currency: course.currency,
            duration_hours: course.duration_hours,
            difficulty_level: course.difficulty_level,
            thumbnail: course.thumbnail,
            status: CourseStatus::from_str(&course.status).unwrap_or_default(),
            max_students: course.max_students,
            prerequisites: course.prerequisites,
            learning_outcomes: course.learning_outcomes,
            enrollment_count: course.enrollment_count,
            created_at: to_utc(course.created_at),
            updated_at: to_utc(course.updated_at),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct CourseModule {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub position: i64,
    pub is_preview: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbCourseModule {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub position: i64,
    pub is_preview: bool,
    pub created_at: NaiveDateTime,
}

impl From<DbCourseModule> for CourseModule {
    fn from(module: DbCourseModule) -> Self {
        Self {
            id: module.id,
            course_id: module.course_id,
            title: module.title,
            description: module.description,
            position: module.position,
            is_preview: module.is_preview,
            created_at: to_utc(module.created_at),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Lesson {
    pub id: i64,
    pub module_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub duration_minutes: Option<i64>,
    pub position: i64,
    pub is_preview: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbLesson {
    pub id: i64,
    pub module_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub duration_minutes: Option<i64>,
    pub position: i64,
    pub is_preview: bool,
    pub created_at: NaiveDateTime,
}

impl From<DbLesson> for Lesson {
    fn from(lesson: DbLesson) -> Self {
        Self {
            id: lesson.id,
            module_id: lesson.module_id,
            title: lesson.title,
            content: lesson.content,
            video_url: lesson.video_url,
            duration_minutes: lesson.duration_minutes,
            position: lesson.position,
            is_preview: lesson.is_preview,
            created_at: to_utc(lesson.created_at),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct LessonResource {
    pub id: i64,
    pub lesson_id: i64,
    pub title: String,
    pub file_path: String,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbLessonResource {
    pub id: i64,
    pub lesson_id: i64,
    pub title: String,
    pub file_path: String,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub created_at: NaiveDateTime,
}

impl From<DbLessonResource> for LessonResource {
    fn from(resource: DbLessonResource) -> Self {
        Self {
            id: resource.id,
            lesson_id: resource.lesson_id,
            title: resource.title,
            file_path: resource.file_path,
            file_type: resource.file_type,
            file_size: resource.file_size,
            created_at: to_utc(resource.created_at),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_percentage: f64,
    pub is_active: bool,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbEnrollment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub enrolled_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub progress_percentage: f64,
    pub is_active: bool,
}

impl From<DbEnrollment> for Enrollment {
    fn from(enrollment: DbEnrollment) -> Self {
        Self {
            id: enrollment.id,
            user_id: enrollment.user_id,
            course_id: enrollment.course_id,
            enrolled_at: to_utc(enrollment.enrolled_at),
            completed_at: enrollment.completed_at.map(to_utc),
            progress_percentage: enrollment.progress_percentage,
            is_active: enrollment.is_active,
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct LessonProgress {
    pub id: i64,
    pub enrollment_id: i64,
    pub lesson_id: i64,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub watch_time_seconds: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbLessonProgress {
    pub id: i64,
    pub enrollment_id: i64,
    pub lesson_id: i64,
    pub completed: bool,
    pub completed_at: Option<NaiveDateTime>,
    pub watch_time_seconds: i64,
}

impl From<DbLessonProgress> for LessonProgress {
    fn from(progress: DbLessonProgress) -> Self {
        Self {
            id: progress.id,
            enrollment_id: progress.enrollment_id,
            lesson_id: progress.lesson_id,
            completed: progress.completed,
            completed_at: progress.completed_at.map(to_utc),
            watch_time_seconds: progress.watch_time_seconds,
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_session_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbPayment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub amount: String,
    pub currency: String,
    pub status: String,
    pub gateway_session_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub payment_method: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<DbPayment> for Payment {
    fn from(payment: DbPayment) -> Self {
        Self {
            id: payment.id,
            user_id: payment.user_id,
            course_id: payment.course_id,
            amount: Decimal::from_str_exact(&payment.amount).unwrap_or_default(),
            currency: payment.currency,
            status: PaymentStatus::from_str(&payment.status).unwrap_or_default(),
            gateway_session_id: payment.gateway_session_id,
            gateway_payment_id: payment.gateway_payment_id,
            payment_method: payment.payment_method,
            created_at: to_utc(payment.created_at),
            updated_at: to_utc(payment.updated_at),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Certificate {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub certificate_number: String,
    pub issued_at: DateTime<Utc>,
    pub file_path: Option<String>,
    pub verification_url: Option<String>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbCertificate {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub certificate_number: String,
    pub issued_at: NaiveDateTime,
    pub file_path: Option<String>,
    pub verification_url: Option<String>,
}

impl From<DbCertificate> for Certificate {
    fn from(certificate: DbCertificate) -> Self {
        Self {
            id: certificate.id,
            user_id: certificate.user_id,
            course_id: certificate.course_id,
            certificate_number: certificate.certificate_number,
            issued_at: to_utc(certificate.issued_at),
            file_path: certificate.file_path,
            verification_url: certificate.verification_url,
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct LiveSession {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub meeting_url: Option<String>,
    pub meeting_id: Option<String>,
    pub meeting_password: Option<String>,
    pub is_recorded: bool,
    pub recording_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbLiveSession {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: i64,
    pub meeting_url: Option<String>,
    pub meeting_id: Option<String>,
    pub meeting_password: Option<String>,
    pub is_recorded: bool,
    pub recording_url: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<DbLiveSession> for LiveSession {
    fn from(session: DbLiveSession) -> Self {
        Self {
            id: session.id,
            course_id: session.course_id,
            title: session.title,
            description: session.description,
            scheduled_at: to_utc(session.scheduled_at),
            duration_minutes: session.duration_minutes,
            meeting_url: session.meeting_url,
            meeting_id: session.meeting_id,
            meeting_password: session.meeting_password,
            is_recorded: session.is_recorded,
            recording_url: session.recording_url,
            created_at: to_utc(session.created_at),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub kind: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbNotification {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub kind: Option<String>,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

impl From<DbNotification> for Notification {
    fn from(notification: DbNotification) -> Self {
        Self {
            id: notification.id,
            user_id: notification.user_id,
            title: notification.title,
            message: notification.message,
            kind: notification.kind,
            is_read: notification.is_read,
            created_at: to_utc(notification.created_at),
        }
    }
}
