use rocket::FromForm;
use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, Role, User};
use crate::db::{
    CourseFilter, NewCourse, NewLesson, count_courses, count_enrollments_for_course,
    count_lessons_for_course, count_modules, course_has_preview_module, create_course,
    create_lesson, create_module, delete_course, delete_lesson, delete_module, find_enrollment,
    get_course, get_lesson, get_module, get_user, list_active_enrollments_for_course,
    list_courses, list_courses_by_instructor, list_lessons, list_modules, set_course_status,
    update_course, update_lesson, update_module,
};
use crate::error::AppError;
use crate::models::{Course, CourseModule, CourseStatus, Enrollment, Lesson};
use crate::validation::{JsonValidateExt, ValidationResponse};

use super::{PageParams, Pagination, UserData};

#[derive(Serialize, Deserialize)]
pub struct ModuleWithLessons {
    #[serde(flatten)]
    pub module: CourseModule,
    pub lessons: Vec<Lesson>,
}

#[derive(Serialize, Deserialize)]
pub struct CourseDetailResponse {
    pub course: Course,
    pub is_enrolled: bool,
    pub modules: Option<Vec<ModuleWithLessons>>,
}

#[derive(Serialize, Deserialize)]
pub struct CourseListResponse {
    pub courses: Vec<Course>,
    pub pagination: Pagination,
}

#[derive(FromForm)]
pub struct CourseQueryParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub difficulty: Option<String>,
    pub instructor_id: Option<i64>,
    pub search: Option<String>,
}

/// Public catalog: published courses only, whoever is asking.
#[get("/?<params..>")]
pub async fn api_list_courses(
    params: CourseQueryParams,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseListResponse>, AppError> {
    let page_params = PageParams {
        page: params.page,
        per_page: params.per_page,
    };
    let (page, per_page, offset) = page_params.resolve()?;

    let filter = CourseFilter {
        status: Some(CourseStatus::Published),
        difficulty: params.difficulty.as_deref(),
        instructor_id: params.instructor_id,
        search: params.search.as_deref(),
    };

    let courses = list_courses(db, &filter, per_page, offset).await?;
    let total = count_courses(db, &filter).await?;

    Ok(Json(CourseListResponse {
        courses,
        pagination: Pagination::new(page, per_page, total),
    }))
}

async fn modules_with_lessons(
    db: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<ModuleWithLessons>, AppError> {
    let modules = list_modules(db, course_id).await?;

    let mut out = Vec::with_capacity(modules.len());
    for module in modules {
        let lessons = list_lessons(db, module.id).await?;
        out.push(ModuleWithLessons { module, lessons });
    }

    Ok(out)
}

/// Course detail. Unpublished courses exist only for their owner and admins;
/// everyone else gets the same answer as for a course that was never created.
#[get("/<course_id>")]
pub async fn api_get_course(
    course_id: i64,
    user: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseDetailResponse>, AppError> {
    let course = get_course(db, course_id).await?;

    let is_owner_or_admin = user
        .as_ref()
        .map(|u| matches!(u.role, Role::Admin) || u.id == course.instructor_id)
        .unwrap_or(false);

    if course.status != CourseStatus::Published && !is_owner_or_admin {
        return Err(AppError::NotFound(format!(
            "Course with id {} not found",
            course_id
        )));
    }

    let is_enrolled = match &user {
        Some(user) => find_enrollment(db, user.id, course_id)
            .await?
            .map(|enrollment| enrollment.is_active)
            .unwrap_or(false),
        None => false,
    };

    // Module content is gated behind enrollment unless the course carries a
    // preview module or the caller owns it.
    let include_modules =
        is_enrolled || is_owner_or_admin || course_has_preview_module(db, course_id).await?;

    let modules = if include_modules {
        Some(modules_with_lessons(db, course_id).await?)
    } else {
        None
    };

    Ok(Json(CourseDetailResponse {
        course,
        is_enrolled,
        modules,
    }))
}

#[derive(Deserialize, Validate, Clone)]
pub struct CreateCourseRequest {
    #[validate(length(min = 3, message = "Title must be at least 3 characters long"))]
    title: String,
    description: Option<String>,
    short_description: Option<String>,
    #[validate(length(min = 1, message = "Price is required"))]
    price: String,
    currency: Option<String>,
    duration_hours: Option<i64>,
    difficulty_level: Option<String>,
    thumbnail: Option<String>,
    max_students: Option<i64>,
    prerequisites: Option<String>,
    learning_outcomes: Option<String>,
}

fn parse_price(raw: &str) -> Result<Decimal, AppError> {
    let price = Decimal::from_str_exact(raw.trim())
        .map_err(|_| AppError::Validation(format!("Invalid price: {}", raw)))?;

    if price < Decimal::ZERO {
        return Err(AppError::Validation(
            "Price cannot be negative".to_string(),
        ));
    }

    Ok(price)
}

#[derive(Serialize, Deserialize)]
pub struct CourseResponse {
    pub message: String,
    pub course: Course,
}

/// Courses always start life in draft; publishing is a separate, validated
/// transition.
#[post("/", data = "<request>")]
pub async fn api_create_course(
    request: Json<CreateCourseRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CourseResponse>>, Custom<Json<ValidationResponse>>> {
    use crate::validation::AppErrorExt;

    user.require_permission(Permission::ManageOwnCourses)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    let price = parse_price(&validated.price).validate_custom()?;

    let course_id = create_course(
        db,
        user.id,
        &NewCourse {
            title: &validated.title,
            description: validated.description.as_deref(),
            short_description: validated.short_description.as_deref(),
            price,
            currency: validated.currency.as_deref().unwrap_or("USD"),
            duration_hours: validated.duration_hours,
            difficulty_level: validated.difficulty_level.as_deref(),
            thumbnail: validated.thumbnail.as_deref(),
            max_students: validated.max_students,
            prerequisites: validated.prerequisites.as_deref(),
            learning_outcomes: validated.learning_outcomes.as_deref(),
        },
    )
    .await
    .validate_custom()?;

    let course = get_course(db, course_id).await.validate_custom()?;

    Ok(Custom(
        Status::Created,
        Json(CourseResponse {
            message: "Course created successfully".to_string(),
            course,
        }),
    ))
}

#[derive(Deserialize)]
pub struct UpdateCourseRequest {
    title: Option<String>,
    description: Option<String>,
    short_description: Option<String>,
    price: Option<String>,
    currency: Option<String>,
    duration_hours: Option<i64>,
    difficulty_level: Option<String>,
    thumbnail: Option<String>,
    max_students: Option<i64>,
    prerequisites: Option<String>,
    learning_outcomes: Option<String>,
    status: Option<String>,
}

#[put("/<course_id>", data = "<request>")]
pub async fn api_update_course(
    course_id: i64,
    request: Json<UpdateCourseRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseResponse>, AppError> {
    user.require_permission(Permission::ManageOwnCourses)?;

    let course = get_course(db, course_id).await?;
    user.require_owner_or_admin(course.instructor_id)?;

    let price = match &request.price {
        Some(raw) => parse_price(raw)?,
        None => course.price,
    };

    let title = request.title.clone().unwrap_or(course.title);
    let description = request.description.clone().or(course.description);
    let short_description = request.short_description.clone().or(course.short_description);
    let currency = request.currency.clone().unwrap_or(course.currency);
    let duration_hours = request.duration_hours.or(course.duration_hours);
    let difficulty_level = request.difficulty_level.clone().or(course.difficulty_level);
    let thumbnail = request.thumbnail.clone().or(course.thumbnail);
    let max_students = request.max_students.or(course.max_students);
    let prerequisites = request.prerequisites.clone().or(course.prerequisites);
    let learning_outcomes = request.learning_outcomes.clone().or(course.learning_outcomes);

    update_course(
        db,
        course_id,
        &NewCourse {
            title: &title,
            description: description.as_deref(),
            short_description: short_description.as_deref(),
            price,
            currency: &currency,
            duration_hours,
            difficulty_level: difficulty_level.as_deref(),
            thumbnail: thumbnail.as_deref(),
            max_students,
            prerequisites: prerequisites.as_deref(),
            learning_outcomes: learning_outcomes.as_deref(),
        },
    )
    .await?;

    // Direct status edits are an admin override; instructors use the publish
    // transition, which validates content.
    if let Some(status) = &request.status {
        user.require_permission(Permission::OverrideCourseStatus)?;
        let status = CourseStatus::from_str(status)
            .map_err(|_| AppError::Validation(format!("Invalid status: {}", status)))?;
        set_course_status(db, course_id, status).await?;
    }

    let course = get_course(db, course_id).await?;

    Ok(Json(CourseResponse {
        message: "Course updated successfully".to_string(),
        course,
    }))
}

/// A course that has ever had an enrollment (active or not) cannot be
/// deleted.
#[delete("/<course_id>")]
pub async fn api_delete_course(
    course_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_permission(Permission::ManageOwnCourses)?;

    let course = get_course(db, course_id).await?;
    user.require_owner_or_admin(course.instructor_id)?;

    if count_enrollments_for_course(db, course_id).await? > 0 {
        return Err(AppError::Validation(
            "Cannot delete course with enrollments".to_string(),
        ));
    }

    delete_course(db, course_id).await?;

    Ok(Json(serde_json::json!({
        "message": "Course deleted successfully"
    })))
}

#[derive(Deserialize)]
pub struct CreateModuleRequest {
    title: String,
    description: Option<String>,
    is_preview: Option<bool>,
}

#[derive(Serialize, Deserialize)]
pub struct ModuleResponse {
    pub message: String,
    pub module: CourseModule,
}

#[post("/<course_id>/modules", data = "<request>")]
pub async fn api_create_module(
    course_id: i64,
    request: Json<CreateModuleRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<ModuleResponse>>, AppError> {
    user.require_permission(Permission::ManageOwnCourses)?;

    let course = get_course(db, course_id).await?;
    user.require_owner_or_admin(course.instructor_id)?;

    if request.title.trim().is_empty() {
        return Err(AppError::Validation("Module title is required".to_string()));
    }

    let module_id = create_module(
        db,
        course_id,
        &request.title,
        request.description.as_deref(),
        request.is_preview.unwrap_or(false),
    )
    .await?;

    let module = get_module(db, module_id).await?;

    Ok(Custom(
        Status::Created,
        Json(ModuleResponse {
            message: "Module created successfully".to_string(),
            module,
        }),
    ))
}

#[derive(Deserialize)]
pub struct UpdateModuleRequest {
    title: Option<String>,
    description: Option<String>,
    is_preview: Option<bool>,
}

#[put("/<course_id>/modules/<module_id>", data = "<request>")]
pub async fn api_update_module(
    course_id: i64,
    module_id: i64,
    request: Json<UpdateModuleRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ModuleResponse>, AppError> {
    user.require_permission(Permission::ManageOwnCourses)?;

    let course = get_course(db, course_id).await?;
    let module = get_module(db, module_id).await?;

    if module.course_id != course_id {
        return Err(AppError::NotFound(format!(
            "Module with id {} not found",
            module_id
        )));
    }

    user.require_owner_or_admin(course.instructor_id)?;

    let title = request.title.clone().unwrap_or(module.title);
    let description = request.description.clone().or(module.description);
    let is_preview = request.is_preview.unwrap_or(module.is_preview);

    if title.trim().is_empty() {
        return Err(AppError::Validation("Module title is required".to_string()));
    }

    update_module(db, module_id, &title, description.as_deref(), is_preview).await?;

    let module = get_module(db, module_id).await?;

    Ok(Json(ModuleResponse {
        message: "Module updated successfully".to_string(),
        module,
    }))
}

#[delete("/<course_id>/modules/<module_id>")]
pub async fn api_delete_module(
    course_id: i64,
    module_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_permission(Permission::ManageOwnCourses)?;

    let course = get_course(db, course_id).await?;
    let module = get_module(db, module_id).await?;

    if module.course_id != course_id {
        return Err(AppError::NotFound(format!(
            "Module with id {} not found",
            module_id
        )));
    }

    user.require_owner_or_admin(course.instructor_id)?;

    delete_module(db, module_id).await?;

    Ok(Json(serde_json::json!({
        "message": "Module deleted successfully"
    })))
}

#[derive(Deserialize)]
pub struct CreateLessonRequest {
    title: String,
    content: Option<String>,
    video_url: Option<String>,
    duration_minutes: Option<i64>,
    is_preview: Option<bool>,
}

#[derive(Serialize, Deserialize)]
pub struct LessonResponse {
    pub message: String,
    pub lesson: Lesson,
}

#[post("/<course_id>/modules/<module_id>/lessons", data = "<request>")]
pub async fn api_create_lesson(
    course_id: i64,
    module_id: i64,
    request: Json<CreateLessonRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<LessonResponse>>, AppError> {
    user.require_permission(Permission::ManageOwnCourses)?;

    let course = get_course(db, course_id).await?;
    let module = get_module(db, module_id).await?;

    if module.course_id != course_id {
        return Err(AppError::NotFound(format!(
            "Module with id {} not found",
            module_id
        )));
    }

    user.require_owner_or_admin(course.instructor_id)?;

    if request.title.trim().is_empty() {
        return Err(AppError::Validation("Lesson title is required".to_string()));
    }

    let lesson_id = create_lesson(
        db,
        module_id,
        &NewLesson {
            title: &request.title,
            content: request.content.as_deref(),
            video_url: request.video_url.as_deref(),
            duration_minutes: request.duration_minutes,
            is_preview: request.is_preview.unwrap_or(false),
        },
    )
    .await?;

    let lesson = get_lesson(db, lesson_id).await?;

    Ok(Custom(
        Status::Created,
        Json(LessonResponse {
            message: "Lesson created successfully".to_string(),
            lesson,
        }),
    ))
}

#[derive(Deserialize)]
pub struct UpdateLessonRequest {
    title: Option<String>,
    content: Option<String>,
    video_url: Option<String>,
    duration_minutes: Option<i64>,
    is_preview: Option<bool>,
}

#[put("/<course_id>/modules/<module_id>/lessons/<lesson_id>", data = "<request>")]
pub async fn api_update_lesson(
    course_id: i64,
    module_id: i64,
    lesson_id: i64,
    request: Json<UpdateLessonRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LessonResponse>, AppError> {
    user.require_permission(Permission::ManageOwnCourses)?;

    let course = get_course(db, course_id).await?;
    let module = get_module(db, module_id).await?;
    let lesson = get_lesson(db, lesson_id).await?;

    if module.course_id != course_id || lesson.module_id != module_id {
        return Err(AppError::NotFound(format!(
            "Lesson with id {} not found",
            lesson_id
        )));
    }

    user.require_owner_or_admin(course.instructor_id)?;

    let title = request.title.clone().unwrap_or(lesson.title);
    let content = request.content.clone().or(lesson.content);
    let video_url = request.video_url.clone().or(lesson.video_url);
    let duration_minutes = request.duration_minutes.or(lesson.duration_minutes);
    let is_preview = request.is_preview.unwrap_or(lesson.is_preview);

    if title.trim().is_empty() {
        return Err(AppError::Validation("Lesson title is required".to_string()));
    }

    update_lesson(
        db,
        lesson_id,
        &NewLesson {
            title: &title,
            content: content.as_deref(),
            video_url: video_url.as_deref(),
            duration_minutes,
            is_preview,
        },
    )
    .await?;

    let lesson = get_lesson(db, lesson_id).await?;

    Ok(Json(LessonResponse {
        message: "Lesson updated successfully".to_string(),
        lesson,
    }))
}

#[delete("/<course_id>/modules/<module_id>/lessons/<lesson_id>")]
pub async fn api_delete_lesson(
    course_id: i64,
    module_id: i64,
    lesson_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_permission(Permission::ManageOwnCourses)?;

    let course = get_course(db, course_id).await?;
    let module = get_module(db, module_id).await?;
    let lesson = get_lesson(db, lesson_id).await?;

    if module.course_id != course_id || lesson.module_id != module_id {
        return Err(AppError::NotFound(format!(
            "Lesson with id {} not found",
            lesson_id
        )));
    }

    user.require_owner_or_admin(course.instructor_id)?;

    delete_lesson(db, lesson_id).await?;

    Ok(Json(serde_json::json!({
        "message": "Lesson deleted successfully"
    })))
}

#[derive(Serialize, Deserialize)]
pub struct MyCoursesResponse {
    pub courses: Vec<Course>,
}

#[get("/my-courses")]
pub async fn api_get_my_courses(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MyCoursesResponse>, AppError> {
    user.require_permission(Permission::ManageOwnCourses)?;

    let courses = match user.role {
        Role::Admin => {
            list_courses(db, &CourseFilter::default(), i64::MAX, 0).await?
        }
        _ => list_courses_by_instructor(db, user.id).await?,
    };

    Ok(Json(MyCoursesResponse { courses }))
}

/// The draft -> published transition. Content requirements are validated
/// here, not at creation time.
#[post("/<course_id>/publish")]
pub async fn api_publish_course(
    course_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseResponse>, AppError> {
    user.require_permission(Permission::PublishOwnCourses)?;

    let course = get_course(db, course_id).await?;
    user.require_owner_or_admin(course.instructor_id)?;

    if count_modules(db, course_id).await? == 0 {
        return Err(AppError::Validation(
            "Course must have at least one module to be published".to_string(),
        ));
    }

    if count_lessons_for_course(db, course_id).await? == 0 {
        return Err(AppError::Validation(
            "Course must have at least one lesson to be published".to_string(),
        ));
    }

    set_course_status(db, course_id, CourseStatus::Published).await?;

    let course = get_course(db, course_id).await?;

    Ok(Json(CourseResponse {
        message: "Course published successfully".to_string(),
        course,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct CourseEnrollmentEntry {
    pub user: UserData,
    pub enrollment: Enrollment,
}

#[derive(Serialize, Deserialize)]
pub struct CourseEnrollmentsResponse {
    pub course_id: i64,
    pub course_title: String,
    pub total_enrollments: i64,
    pub enrollments: Vec<CourseEnrollmentEntry>,
}

#[get("/<course_id>/enrollments")]
pub async fn api_get_course_enrollments(
    course_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseEnrollmentsResponse>, AppError> {
    user.require_permission(Permission::ViewCourseEnrollments)?;

    let course = get_course(db, course_id).await?;
    user.require_owner_or_admin(course.instructor_id)?;

    let enrollments = list_active_enrollments_for_course(db, course_id).await?;

    let mut entries = Vec::with_capacity(enrollments.len());
    for enrollment in enrollments {
        let enrolled_user = get_user(db, enrollment.user_id).await?;
        entries.push(CourseEnrollmentEntry {
            user: UserData::from(enrolled_user),
            enrollment,
        });
    }

    Ok(Json(CourseEnrollmentsResponse {
        course_id,
        course_title: course.title,
        total_enrollments: entries.len() as i64,
        enrollments: entries,
    }))
}
