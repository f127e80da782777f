use rocket::Data;
use rocket::State;
use rocket::data::ToByteUnit;
use rocket::http::{ContentType, Status};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::auth::{Permission, Role, User};
use crate::db::{
    create_lesson_resource, delete_lesson_resource, find_enrollment, get_course, get_lesson,
    get_lesson_resource, get_module,
};
use crate::error::AppError;
use crate::models::LessonResource;
use crate::services::FileStore;

const MAX_UPLOAD_MIB: u64 = 100;

/// Resolves the owning course for a lesson, for ownership checks.
async fn course_for_lesson(
    db: &Pool<Sqlite>,
    lesson_id: i64,
) -> Result<crate::models::Course, AppError> {
    let lesson = get_lesson(db, lesson_id).await?;
    let module = get_module(db, lesson.module_id).await?;
    get_course(db, module.course_id).await
}

fn file_type_from_name(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_lowercase())
}

#[derive(Serialize, Deserialize)]
pub struct ResourceResponse {
    pub message: String,
    pub resource: LessonResource,
}

#[post("/lessons/<lesson_id>/resources?<title>&<file_name>", data = "<data>")]
pub async fn api_upload_lesson_resource(
    lesson_id: i64,
    title: &str,
    file_name: &str,
    data: Data<'_>,
    user: User,
    db: &State<Pool<Sqlite>>,
    files: &State<Box<dyn FileStore>>,
) -> Result<Custom<Json<ResourceResponse>>, AppError> {
    user.require_permission(Permission::UploadLessonResources)?;

    let course = course_for_lesson(db, lesson_id).await?;
    user.require_owner_or_admin(course.instructor_id)?;

    if title.trim().is_empty() || file_name.trim().is_empty() {
        return Err(AppError::Validation(
            "Title and file name are required".to_string(),
        ));
    }

    let bytes = data
        .open(MAX_UPLOAD_MIB.mebibytes())
        .into_bytes()
        .await
        .map_err(|err| AppError::Internal(format!("Upload read error: {}", err)))?;

    if !bytes.is_complete() {
        return Err(AppError::Validation(format!(
            "File exceeds the {} MiB upload limit",
            MAX_UPLOAD_MIB
        )));
    }

    let bytes = bytes.into_inner();
    let sanitized_name: String = file_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let path = format!(
        "resources/{}/{}_{}",
        lesson_id,
        Uuid::new_v4().simple(),
        sanitized_name
    );

    files.save(&path, &bytes).await?;

    let resource_id = create_lesson_resource(
        db,
        lesson_id,
        title,
        &path,
        file_type_from_name(&sanitized_name).as_deref(),
        Some(bytes.len() as i64),
    )
    .await?;

    let resource = get_lesson_resource(db, resource_id).await?;

    Ok(Custom(
        Status::Created,
        Json(ResourceResponse {
            message: "Resource uploaded successfully".to_string(),
            resource,
        }),
    ))
}

#[derive(Serialize, Deserialize)]
pub struct ResourcesResponse {
    pub resources: Vec<LessonResource>,
}

#[get("/lessons/<lesson_id>/resources")]
pub async fn api_list_lesson_resources(
    lesson_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ResourcesResponse>, AppError> {
    let course = course_for_lesson(db, lesson_id).await?;
    require_course_content_access(db, &user, &course).await?;

    let resources = crate::db::list_lesson_resources(db, lesson_id).await?;

    Ok(Json(ResourcesResponse { resources }))
}

/// Content access: admins and the owning instructor always; students only
/// with an active enrollment. Everyone else sees nothing.
async fn require_course_content_access(
    db: &Pool<Sqlite>,
    user: &User,
    course: &crate::models::Course,
) -> Result<(), AppError> {
    let allowed = match user.role {
        Role::Admin => true,
        Role::Instructor if course.instructor_id == user.id => true,
        _ => find_enrollment(db, user.id, course.id)
            .await?
            .map(|enrollment| enrollment.is_active)
            .unwrap_or(false),
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::NotFound("Resource not found".to_string()))
    }
}

#[get("/resources/<resource_id>/download")]
pub async fn api_download_resource(
    resource_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
    files: &State<Box<dyn FileStore>>,
) -> Result<(ContentType, Vec<u8>), AppError> {
    let resource = get_lesson_resource(db, resource_id).await?;
    let course = course_for_lesson(db, resource.lesson_id).await?;

    require_course_content_access(db, &user, &course).await?;

    let bytes = files.load(&resource.file_path).await?;

    let content_type = resource
        .file_type
        .as_deref()
        .and_then(ContentType::from_extension)
        .unwrap_or(ContentType::Binary);

    Ok((content_type, bytes))
}

#[delete("/resources/<resource_id>")]
pub async fn api_delete_resource(
    resource_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
    files: &State<Box<dyn FileStore>>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_permission(Permission::UploadLessonResources)?;

    let resource = get_lesson_resource(db, resource_id).await?;
    let course = course_for_lesson(db, resource.lesson_id).await?;
    user.require_owner_or_admin(course.instructor_id)?;

    // Release the blob before dropping the row that points at it.
    files.delete(&resource.file_path).await?;
    delete_lesson_resource(db, resource_id).await?;

    Ok(Json(serde_json::json!({
        "message": "Resource deleted successfully"
    })))
}
