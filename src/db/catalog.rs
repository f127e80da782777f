use rust_decimal::Decimal;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{
    CourseModule, CourseStatus, DbCourse, DbCourseModule, DbLesson, DbLessonResource, Lesson,
    LessonResource,
};

const COURSE_COLUMNS: &str = "c.id, c.title, c.description, c.short_description, c.instructor_id, \
     (u.first_name || ' ' || u.last_name) AS instructor_name, c.price, c.currency, \
     c.duration_hours, c.difficulty_level, c.thumbnail, c.status, c.max_students, \
     c.prerequisites, c.learning_outcomes, \
     (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS enrollment_count, \
     c.created_at, c.updated_at";

fn course_select() -> String {
    format!("SELECT {COURSE_COLUMNS} FROM courses c JOIN users u ON u.id = c.instructor_id")
}

/// Optional filters for the public catalog listing.
#[derive(Debug, Default)]
pub struct CourseFilter<'a> {
    pub status: Option<CourseStatus>,
    pub difficulty: Option<&'a str>,
    pub instructor_id: Option<i64>,
    pub search: Option<&'a str>,
}

fn apply_course_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &CourseFilter<'_>) {
    if let Some(status) = filter.status {
        query.push(" AND c.status = ").push_bind(status.as_str());
    }

    if let Some(difficulty) = filter.difficulty {
        query
            .push(" AND c.difficulty_level = ")
            .push_bind(difficulty.to_string());
    }

    if let Some(instructor_id) = filter.instructor_id {
        query
            .push(" AND c.instructor_id = ")
            .push_bind(instructor_id);
    }

    if let Some(search) = filter.search {
        let pattern = format!("%{}%", search);
        query
            .push(" AND (c.title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.description LIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.short_description LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[instrument(skip(pool))]
pub async fn get_course(pool: &Pool<Sqlite>, id: i64) -> Result<crate::models::Course, AppError> {
    let row = sqlx::query_as::<_, DbCourse>(&format!("{} WHERE c.id = ?", course_select()))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(course) => Ok(crate::models::Course::from(course)),
        _ => Err(AppError::NotFound(format!(
            "Course with id {} not found",
            id
        ))),
    }
}

#[instrument(skip(pool, filter))]
pub async fn list_courses(
    pool: &Pool<Sqlite>,
    filter: &CourseFilter<'_>,
    limit: i64,
    offset: i64,
) -> Result<Vec<crate::models::Course>, AppError> {
    let mut query = QueryBuilder::<Sqlite>::new(format!("{} WHERE 1 = 1", course_select()));

    apply_course_filter(&mut query, filter);

    query
        .push(" ORDER BY c.created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows: Vec<DbCourse> = query.build_query_as().fetch_all(pool).await?;

    Ok(rows.into_iter().map(crate::models::Course::from).collect())
}

#[instrument(skip(pool, filter))]
pub async fn count_courses(
    pool: &Pool<Sqlite>,
    filter: &CourseFilter<'_>,
) -> Result<i64, AppError> {
    let mut query =
        QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM courses c WHERE 1 = 1");

    apply_course_filter(&mut query, filter);

    let count: i64 = query.build_query_scalar().fetch_one(pool).await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn list_courses_by_instructor(
    pool: &Pool<Sqlite>,
    instructor_id: i64,
) -> Result<Vec<crate::models::Course>, AppError> {
    let rows = sqlx::query_as::<_, DbCourse>(&format!(
        "{} WHERE c.instructor_id = ? ORDER BY c.created_at DESC",
        course_select()
    ))
    .bind(instructor_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(crate::models::Course::from).collect())
}

pub struct NewCourse<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub short_description: Option<&'a str>,
    pub price: Decimal,
    pub currency: &'a str,
    pub duration_hours: Option<i64>,
    pub difficulty_level: Option<&'a str>,
    pub thumbnail: Option<&'a str>,
    pub max_students: Option<i64>,
    pub prerequisites: Option<&'a str>,
    pub learning_outcomes: Option<&'a str>,
}

#[instrument(skip(pool, course), fields(title = %course.title))]
pub async fn create_course(
    pool: &Pool<Sqlite>,
    instructor_id: i64,
    course: &NewCourse<'_>,
) -> Result<i64, AppError> {
    info!("Creating course");
    let res = sqlx::query(
        "INSERT INTO courses
         (title, description, short_description, instructor_id, price, currency, duration_hours,
          difficulty_level, thumbnail, max_students, prerequisites, learning_outcomes)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(course.title)
    .bind(course.description)
    .bind(course.short_description)
    .bind(instructor_id)
    .bind(course.price.to_string())
    .bind(course.currency)
    .bind(course.duration_hours)
    .bind(course.difficulty_level)
    .bind(course.thumbnail)
    .bind(course.max_students)
    .bind(course.prerequisites)
    .bind(course.learning_outcomes)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, course), fields(title = %course.title))]
pub async fn update_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
    course: &NewCourse<'_>,
) -> Result<(), AppError> {
    info!("Updating course");
    sqlx::query(
        "UPDATE courses
         SET title = ?, description = ?, short_description = ?, price = ?, currency = ?,
             duration_hours = ?, difficulty_level = ?, thumbnail = ?, max_students = ?,
             prerequisites = ?, learning_outcomes = ?, updated_at = CURRENT_TIMESTAMP
         WHERE id = ?",
    )
    .bind(course.title)
    .bind(course.description)
    .bind(course.short_description)
    .bind(course.price.to_string())
    .bind(course.currency)
    .bind(course.duration_hours)
    .bind(course.difficulty_level)
    .bind(course.thumbnail)
    .bind(course.max_students)
    .bind(course.prerequisites)
    .bind(course.learning_outcomes)
    .bind(course_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn set_course_status(
    pool: &Pool<Sqlite>,
    course_id: i64,
    status: CourseStatus,
) -> Result<(), AppError> {
    info!("Setting course status");
    sqlx::query("UPDATE courses SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(status.as_str())
        .bind(course_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_course(pool: &Pool<Sqlite>, course_id: i64) -> Result<(), AppError> {
    info!("Deleting course");
    sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(course_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn count_modules(pool: &Pool<Sqlite>, course_id: i64) -> Result<i64, AppError> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM course_modules WHERE course_id = ?")
            .bind(course_id)
            .fetch_one(pool)
            .await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn count_lessons_for_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM lessons l
         JOIN course_modules m ON m.id = l.module_id
         WHERE m.course_id = ?",
    )
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn course_has_preview_module(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<bool, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM course_modules WHERE course_id = ? AND is_preview = 1",
    )
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

// Positions are assigned max+1 at creation and never renumbered on deletion,
// so gaps are expected.
#[instrument(skip(pool))]
pub async fn create_module(
    pool: &Pool<Sqlite>,
    course_id: i64,
    title: &str,
    description: Option<&str>,
    is_preview: bool,
) -> Result<i64, AppError> {
    info!("Creating course module");
    let res = sqlx::query(
        "INSERT INTO course_modules (course_id, title, description, position, is_preview)
         SELECT ?, ?, ?, COALESCE(MAX(position), 0) + 1, ?
         FROM course_modules WHERE course_id = ?",
    )
    .bind(course_id)
    .bind(title)
    .bind(description)
    .bind(is_preview)
    .bind(course_id)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_module(pool: &Pool<Sqlite>, id: i64) -> Result<CourseModule, AppError> {
    let row = sqlx::query_as::<_, DbCourseModule>(
        "SELECT id, course_id, title, description, position, is_preview, created_at
         FROM course_modules WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(module) => Ok(CourseModule::from(module)),
        _ => Err(AppError::NotFound(format!(
            "Module with id {} not found",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn update_module(
    pool: &Pool<Sqlite>,
    module_id: i64,
    title: &str,
    description: Option<&str>,
    is_preview: bool,
) -> Result<(), AppError> {
    info!("Updating course module");
    sqlx::query("UPDATE course_modules SET title = ?, description = ?, is_preview = ? WHERE id = ?")
        .bind(title)
        .bind(description)
        .bind(is_preview)
        .bind(module_id)
        .execute(pool)
        .await?;

    Ok(())
}

// Remaining modules keep their positions; the gap is tolerated.
#[instrument(skip(pool))]
pub async fn delete_module(pool: &Pool<Sqlite>, module_id: i64) -> Result<(), AppError> {
    info!("Deleting course module");
    sqlx::query("DELETE FROM course_modules WHERE id = ?")
        .bind(module_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_modules(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<CourseModule>, AppError> {
    let rows = sqlx::query_as::<_, DbCourseModule>(
        "SELECT id, course_id, title, description, position, is_preview, created_at
         FROM course_modules WHERE course_id = ? ORDER BY position",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(CourseModule::from).collect())
}

pub struct NewLesson<'a> {
    pub title: &'a str,
    pub content: Option<&'a str>,
    pub video_url: Option<&'a str>,
    pub duration_minutes: Option<i64>,
    pub is_preview: bool,
}

#[instrument(skip(pool, lesson), fields(title = %lesson.title))]
pub async fn create_lesson(
    pool: &Pool<Sqlite>,
    module_id: i64,
    lesson: &NewLesson<'_>,
) -> Result<i64, AppError> {
    info!("Creating lesson");
    let res = sqlx::query(
        "INSERT INTO lessons (module_id, title, content, video_url, duration_minutes, position, is_preview)
         SELECT ?, ?, ?, ?, ?, COALESCE(MAX(position), 0) + 1, ?
         FROM lessons WHERE module_id = ?",
    )
    .bind(module_id)
    .bind(lesson.title)
    .bind(lesson.content)
    .bind(lesson.video_url)
    .bind(lesson.duration_minutes)
    .bind(lesson.is_preview)
    .bind(module_id)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_lesson(pool: &Pool<Sqlite>, id: i64) -> Result<Lesson, AppError> {
    let row = sqlx::query_as::<_, DbLesson>(
        "SELECT id, module_id, title, content, video_url, duration_minutes, position, is_preview,
                created_at
         FROM lessons WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(lesson) => Ok(Lesson::from(lesson)),
        _ => Err(AppError::NotFound(format!(
            "Lesson with id {} not found",
            id
        ))),
    }
}

#[instrument(skip(pool, lesson), fields(title = %lesson.title))]
pub async fn update_lesson(
    pool: &Pool<Sqlite>,
    lesson_id: i64,
    lesson: &NewLesson<'_>,
) -> Result<(), AppError> {
    info!("Updating lesson");
    sqlx::query(
        "UPDATE lessons
         SET title = ?, content = ?, video_url = ?, duration_minutes = ?, is_preview = ?
         WHERE id = ?",
    )
    .bind(lesson.title)
    .bind(lesson.content)
    .bind(lesson.video_url)
    .bind(lesson.duration_minutes)
    .bind(lesson.is_preview)
    .bind(lesson_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_lesson(pool: &Pool<Sqlite>, lesson_id: i64) -> Result<(), AppError> {
    info!("Deleting lesson");
    sqlx::query("DELETE FROM lessons WHERE id = ?")
        .bind(lesson_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_lessons(pool: &Pool<Sqlite>, module_id: i64) -> Result<Vec<Lesson>, AppError> {
    let rows = sqlx::query_as::<_, DbLesson>(
        "SELECT id, module_id, title, content, video_url, duration_minutes, position, is_preview,
                created_at
         FROM lessons WHERE module_id = ? ORDER BY position",
    )
    .bind(module_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Lesson::from).collect())
}

#[instrument(skip(pool))]
pub async fn lesson_belongs_to_course(
    pool: &Pool<Sqlite>,
    lesson_id: i64,
    course_id: i64,
) -> Result<bool, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM lessons l
         JOIN course_modules m ON m.id = l.module_id
         WHERE l.id = ? AND m.course_id = ?",
    )
    .bind(lesson_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

#[instrument(skip(pool))]
pub async fn create_lesson_resource(
    pool: &Pool<Sqlite>,
    lesson_id: i64,
    title: &str,
    file_path: &str,
    file_type: Option<&str>,
    file_size: Option<i64>,
) -> Result<i64, AppError> {
    info!("Creating lesson resource");
    let res = sqlx::query(
        "INSERT INTO lesson_resources (lesson_id, title, file_path, file_type, file_size)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(lesson_id)
    .bind(title)
    .bind(file_path)
    .bind(file_type)
    .bind(file_size)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_lesson_resource(
    pool: &Pool<Sqlite>,
    id: i64,
) -> Result<LessonResource, AppError> {
    let row = sqlx::query_as::<_, DbLessonResource>(
        "SELECT id, lesson_id, title, file_path, file_type, file_size, created_at
         FROM lesson_resources WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(resource) => Ok(LessonResource::from(resource)),
        _ => Err(AppError::NotFound(format!(
            "Resource with id {} not found",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn list_lesson_resources(
    pool: &Pool<Sqlite>,
    lesson_id: i64,
) -> Result<Vec<LessonResource>, AppError> {
    let rows = sqlx::query_as::<_, DbLessonResource>(
        "SELECT id, lesson_id, title, file_path, file_type, file_size, created_at
         FROM lesson_resources WHERE lesson_id = ? ORDER BY created_at",
    )
    .bind(lesson_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(LessonResource::from).collect())
}

#[instrument(skip(pool))]
pub async fn delete_lesson_resource(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting lesson resource");
    sqlx::query("DELETE FROM lesson_resources WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
