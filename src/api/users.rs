use std::sync::Arc;

use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::State;

use crate::api::ApiError;
use crate::images::{ImageError, PathResolver};
use crate::models::{CreateProjectResponse, CreateUserRequest, CreateUserResponse};
use crate::storage;
use crate::store::RecordStore;

#[post("/create", format = "json", data = "<request>")]
pub async fn create_user(
    request: Json<CreateUserRequest>,
    store: &State<Arc<dyn RecordStore>>,
    resolver: &State<PathResolver>,
) -> Result<Custom<Json<CreateUserResponse>>, ApiError> {
    let name = request.name.trim();
    let email = request.email.trim();
    if name.is_empty() || email.is_empty() {
        return Err(ImageError::InvalidParameter("name and email are required".to_string()).into());
    }

    let user = store.create_user(name, email).await?;

    let user_dir = resolver.user_dir(&user.id)?;
    storage::ensure_dir(&user_dir).await.map_err(ImageError::from)?;
    log::info!("Created user {}", user.id);

    Ok(Custom(
        Status::Created,
        Json(CreateUserResponse {
            message: "User created successfully".to_string(),
            user_id: user.id,
        }),
    ))
}

#[post("/create/<user_id>/<project_name>")]
pub async fn create_project(
    user_id: &str,
    project_name: &str,
    store: &State<Arc<dyn RecordStore>>,
    resolver: &State<PathResolver>,
) -> Result<Custom<Json<CreateProjectResponse>>, ApiError> {
    // Validate both segments before touching the store
    let original_dir = resolver.original_dir(user_id, project_name)?;
    let transformed_dir = resolver.transformed_dir(user_id, project_name)?;

    let user = store
        .find_user(user_id)
        .await?
        .ok_or_else(|| ImageError::UserNotFound(user_id.to_string()))?;
    let project = store.create_project(&user.id, project_name).await?;

    for dir in [&original_dir, &transformed_dir] {
        storage::ensure_dir(dir).await.map_err(ImageError::from)?;
    }
    log::info!("Created project {} ({}) for user {}", project.name, project.id, user.id);

    Ok(Custom(
        Status::Created,
        Json(CreateProjectResponse {
            message: "Project created successfully".to_string(),
            project_id: project.id,
            project_name: project.name,
            user_id: user.id,
        }),
    ))
}
