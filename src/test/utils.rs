#[cfg(test)]
pub mod test_db {
    use crate::auth::{Role, UserSession};
    use crate::db::{
        create_course, create_enrollment, create_lesson, create_module, create_user,
        create_user_session, record_lesson_progress, set_course_status,
    };
    use crate::db::{NewCourse, NewLesson};
    use crate::error::AppError;
    use crate::models::CourseStatus;
    use crate::services::{FileStore, InProcessGateway, LogMailer, Mailer, PaymentGateway};
    use rocket::http::Header;
    use rocket::local::asynchronous::Client;
    use rust_decimal::Decimal;
    use sqlx::{Pool, Sqlite, SqlitePool};
    use std::collections::HashMap;
    use std::sync::{Mutex, Once};
    use tracing::log::LevelFilter;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "Password123!";
    pub static TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

    /// File store backed by a map, so tests never touch the disk.
    #[derive(Default)]
    pub struct MemoryFileStore {
        files: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[rocket::async_trait]
    impl FileStore for MemoryFileStore {
        async fn save(&self, path: &str, bytes: &[u8]) -> Result<(), AppError> {
            self.files
                .lock()
                .map_err(|_| AppError::Internal("File store poisoned".to_string()))?
                .insert(path.to_string(), bytes.to_vec());
            Ok(())
        }

        async fn load(&self, path: &str) -> Result<Vec<u8>, AppError> {
            self.files
                .lock()
                .map_err(|_| AppError::Internal("File store poisoned".to_string()))?
                .get(path)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("File {} not found", path)))
        }

        async fn delete(&self, path: &str) -> Result<(), AppError> {
            self.files
                .lock()
                .map_err(|_| AppError::Internal("File store poisoned".to_string()))?
                .remove(path);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        courses: Vec<TestCourse>,
        modules: Vec<TestModule>,
        lessons: Vec<TestLesson>,
        enrollments: Vec<TestEnrollment>,
    }

    pub struct TestUser {
        pub email: String,
        pub first_name: String,
        pub last_name: String,
        pub role: Role,
        pub password: String,
    }

    pub struct TestCourse {
        pub title: String,
        pub instructor_email: String,
        pub price: String,
        pub status: CourseStatus,
    }

    pub struct TestModule {
        pub course_title: String,
        pub title: String,
    }

    pub struct TestLesson {
        pub module_title: String,
        pub title: String,
    }

    pub struct TestEnrollment {
        pub user_email: String,
        pub course_title: String,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        fn user(mut self, email: &str, first_name: &str, role: Role) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                first_name: first_name.to_string(),
                last_name: "Tester".to_string(),
                role,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn student(self, email: &str, first_name: &str) -> Self {
            self.user(email, first_name, Role::Student)
        }

        pub fn instructor(self, email: &str, first_name: &str) -> Self {
            self.user(email, first_name, Role::Instructor)
        }

        pub fn admin(self, email: &str, first_name: &str) -> Self {
            self.user(email, first_name, Role::Admin)
        }

        pub fn course(
            mut self,
            title: &str,
            instructor_email: &str,
            price: &str,
            status: CourseStatus,
        ) -> Self {
            self.courses.push(TestCourse {
                title: title.to_string(),
                instructor_email: instructor_email.to_string(),
                price: price.to_string(),
                status,
            });
            self
        }

        pub fn module(mut self, course_title: &str, title: &str) -> Self {
            self.modules.push(TestModule {
                course_title: course_title.to_string(),
                title: title.to_string(),
            });
            self
        }

        pub fn lesson(mut self, module_title: &str, title: &str) -> Self {
            self.lessons.push(TestLesson {
                module_title: module_title.to_string(),
                title: title.to_string(),
            });
            self
        }

        pub fn enrollment(mut self, user_email: &str, course_title: &str) -> Self {
            self.enrollments.push(TestEnrollment {
                user_email: user_email.to_string(),
                course_title: course_title.to_string(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            let pool = SqlitePool::connect("sqlite::memory:").await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut course_id_map: HashMap<String, i64> = HashMap::new();
            let mut module_id_map: HashMap<String, i64> = HashMap::new();
            let mut lesson_id_map: HashMap<String, i64> = HashMap::new();
            let mut enrollment_id_map: HashMap<(String, String), i64> = HashMap::new();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.email,
                    &user.password,
                    &user.first_name,
                    &user.last_name,
                    user.role,
                    None,
                    None,
                )
                .await?;

                user_id_map.insert(user.email.clone(), user_id);
            }

            for course in &self.courses {
                let instructor_id = user_id_map
                    .get(&course.instructor_email)
                    .copied()
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "Unknown instructor {} in test fixture",
                            course.instructor_email
                        ))
                    })?;

                let course_id = create_course(
                    &pool,
                    instructor_id,
                    &NewCourse {
                        title: &course.title,
                        description: Some("Test course"),
                        short_description: None,
                        price: Decimal::from_str_exact(&course.price).unwrap_or_default(),
                        currency: "USD",
                        duration_hours: None,
                        difficulty_level: None,
                        thumbnail: None,
                        max_students: None,
                        prerequisites: None,
                        learning_outcomes: None,
                    },
                )
                .await?;

                if course.status != CourseStatus::Draft {
                    set_course_status(&pool, course_id, course.status).await?;
                }

                course_id_map.insert(course.title.clone(), course_id);
            }

            for module in &self.modules {
                let course_id = course_id_map
                    .get(&module.course_title)
                    .copied()
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "Unknown course {} in test fixture",
                            module.course_title
                        ))
                    })?;

                let module_id = create_module(&pool, course_id, &module.title, None, false).await?;

                module_id_map.insert(module.title.clone(), module_id);
            }

            for lesson in &self.lessons {
                let module_id = module_id_map
                    .get(&lesson.module_title)
                    .copied()
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "Unknown module {} in test fixture",
                            lesson.module_title
                        ))
                    })?;

                let lesson_id = create_lesson(
                    &pool,
                    module_id,
                    &NewLesson {
                        title: &lesson.title,
                        content: Some("Lesson content"),
                        video_url: None,
                        duration_minutes: Some(10),
                        is_preview: false,
                    },
                )
                .await?;

                lesson_id_map.insert(lesson.title.clone(), lesson_id);
            }

            for enrollment in &self.enrollments {
                let user_id = user_id_map
                    .get(&enrollment.user_email)
                    .copied()
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "Unknown user {} in test fixture",
                            enrollment.user_email
                        ))
                    })?;
                let course_id = course_id_map
                    .get(&enrollment.course_title)
                    .copied()
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "Unknown course {} in test fixture",
                            enrollment.course_title
                        ))
                    })?;

                let enrollment_id = create_enrollment(&pool, user_id, course_id).await?;
                enrollment_id_map.insert(
                    (enrollment.user_email.clone(), enrollment.course_title.clone()),
                    enrollment_id,
                );
            }

            Ok(TestDb {
                pool,
                user_id_map,
                course_id_map,
                module_id_map,
                lesson_id_map,
                enrollment_id_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub course_id_map: HashMap<String, i64>,
        pub module_id_map: HashMap<String, i64>,
        pub lesson_id_map: HashMap<String, i64>,
        pub enrollment_id_map: HashMap<(String, String), i64>,
    }

    impl TestDb {
        pub fn user_id(&self, email: &str) -> i64 {
            self.user_id_map[email]
        }

        pub fn course_id(&self, title: &str) -> i64 {
            self.course_id_map[title]
        }

        pub fn module_id(&self, title: &str) -> i64 {
            self.module_id_map[title]
        }

        pub fn lesson_id(&self, title: &str) -> i64 {
            self.lesson_id_map[title]
        }

        pub fn enrollment_id(&self, email: &str, course_title: &str) -> i64 {
            self.enrollment_id_map[&(email.to_string(), course_title.to_string())]
        }

        /// Opens a session for the user directly, sidestepping the login
        /// endpoint and its rate limiter.
        pub async fn issue_token(&self, email: &str) -> String {
            let user_id = self.user_id(email);
            let token = UserSession::generate_token();

            create_user_session(
                &self.pool,
                user_id,
                &token,
                UserSession::default_expiry().naive_utc(),
            )
            .await
            .expect("Failed to create test session");

            token
        }

        /// Marks every lesson of the course completed for the enrollment,
        /// driving its progress to 100 and stamping completed_at.
        pub async fn complete_course(&self, email: &str, course_title: &str, lessons: &[&str]) {
            let enrollment_id = self.enrollment_id(email, course_title);

            for lesson in lessons {
                record_lesson_progress(
                    &self.pool,
                    enrollment_id,
                    self.lesson_id(lesson),
                    Some(true),
                    None,
                )
                .await
                .expect("Failed to record test lesson progress");
            }
        }
    }

    /// Three users (one per role), a free published course with two lessons,
    /// a paid published course and a draft course. Most tests start here.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin("admin@example.com", "Alice")
            .instructor("ada@example.com", "Ada")
            .instructor("grace@example.com", "Grace")
            .student("sam@example.com", "Sam")
            .course("Intro to Rust", "ada@example.com", "0", CourseStatus::Published)
            .module("Intro to Rust", "Basics")
            .lesson("Basics", "Ownership")
            .lesson("Basics", "Borrowing")
            .course("Advanced Rust", "ada@example.com", "49.99", CourseStatus::Published)
            .module("Advanced Rust", "Async")
            .lesson("Async", "Futures")
            .course("Unpublished Notes", "ada@example.com", "0", CourseStatus::Draft)
            .build()
            .await
            .expect("Failed to build test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let gateway: Box<dyn PaymentGateway> = Box::new(InProcessGateway::new(
            "http://localhost:8000/checkout".to_string(),
            TEST_WEBHOOK_SECRET.to_string(),
        ));
        let files: Box<dyn FileStore> = Box::new(MemoryFileStore::default());
        let mailer: Box<dyn Mailer> = Box::new(LogMailer);

        let rocket = crate::init_rocket(test_db.pool.clone(), gateway, files, mailer).await;
        let client = Client::tracked(rocket)
            .await
            .expect("Failed to build test client");

        (client, test_db)
    }

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }
}
