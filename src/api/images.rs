use std::io::Cursor;
use std::path::Path;

use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::{ContentType, Header, Status};
use rocket::serde::json::Json;
use rocket::{request::Request, response::{self, Responder, Response}};
use rocket::State;
use uuid::Uuid;

use crate::api::ApiError;
use crate::cache::DerivativeCache;
use crate::config::AppConfig;
use crate::images::{
    detect_image_type, ImageError, OutputFormat, OutputLimits, PathResolver, TransformSpec,
};
use crate::ingest::Ingestor;
use crate::lifecycle::{self, Directive, LifecycleOutcome};
use crate::models::{MessageResponse, UploadResponse};
use crate::storage;

// Responder for image data
pub struct ImageResponse {
    pub data: Vec<u8>,
    pub content_type: String,
    pub from_cache: bool,
}

impl<'r> Responder<'r, 'static> for ImageResponse {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let content_type =
            ContentType::parse_flexible(&self.content_type).unwrap_or(ContentType::Binary);
        let etag = format!("\"{:x}\"", md5::compute(&self.data));
        let cache_status = if self.from_cache { "HIT" } else { "MISS" };

        // Check If-None-Match header
        if let Some(if_none_match) = req.headers().get_one("If-None-Match") {
            if if_none_match == etag {
                return Response::build()
                    .status(Status::NotModified)
                    .header(Header::new("ETag", etag))
                    .header(Header::new("Cache-Control", "public, max-age=86400"))
                    .ok();
            }
        }
        Response::build()
            .header(content_type)
            .header(Header::new("Cache-Control", "public, max-age=86400"))
            .header(Header::new("ETag", etag))
            .header(Header::new("X-Cache", cache_status))
            .sized_body(self.data.len(), Cursor::new(self.data))
            .ok()
    }
}

/// Either the image itself or the outcome of a lifecycle directive.
pub enum DownloadResponse {
    Image(ImageResponse),
    Message(Status, String),
}

impl<'r> Responder<'r, 'static> for DownloadResponse {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        match self {
            DownloadResponse::Image(image) => image.respond_to(req),
            DownloadResponse::Message(status, message) => {
                let mut response = Json(MessageResponse { message }).respond_to(req)?;
                response.set_status(status);
                Ok(response)
            }
        }
    }
}

/// Raw query values; validated by hand so bad input becomes `InvalidParameter`.
#[derive(FromForm, Debug, Default)]
pub struct DownloadQuery {
    pub w: Option<String>,
    pub h: Option<String>,
    pub f: Option<String>,
    pub q: Option<String>,
    pub rotate: Option<String>,
    pub delete: Option<String>,
    pub expire: Option<String>,
    pub target: Option<String>,
}

impl DownloadQuery {
    fn to_transform_spec(&self, limits: &OutputLimits) -> Result<TransformSpec, ImageError> {
        let spec = TransformSpec::from_query(
            self.w.as_deref(),
            self.h.as_deref(),
            self.f.as_deref(),
            self.q.as_deref(),
            self.rotate.as_deref(),
        )?;
        spec.check_limits(limits)?;
        Ok(spec)
    }

    fn to_directive(&self) -> Result<Option<Directive>, ImageError> {
        Directive::from_query(
            self.expire.as_deref(),
            self.target.as_deref(),
            self.delete.as_deref(),
        )
    }
}

#[get("/download/<user_id>/<project_name>/<file_name>?<query..>")]
pub async fn download_image(
    user_id: &str,
    project_name: &str,
    file_name: &str,
    query: DownloadQuery,
    resolver: &State<PathResolver>,
    cache: &State<DerivativeCache>,
    config: &State<AppConfig>,
) -> Result<DownloadResponse, ApiError> {
    log::debug!(
        "Download user={} project={} file={} query={:?}",
        user_id, project_name, file_name, query
    );

    let spec = query.to_transform_spec(&OutputLimits::from(config.inner()))?;
    let directive = query.to_directive()?;
    let location = resolver.resolve(user_id, project_name, file_name, &spec)?;

    // Expiry and deletion always short-circuit the transform
    if let Some(directive) = directive {
        match lifecycle::apply(directive, &location).await? {
            LifecycleOutcome::Gone(message) => {
                return Ok(DownloadResponse::Message(Status::Gone, message))
            }
            LifecycleOutcome::Deleted(message) => {
                return Ok(DownloadResponse::Message(Status::Ok, message))
            }
            LifecycleOutcome::Continue => {}
        }
    }

    if let Some(format) = location.target_format.as_deref() {
        OutputFormat::from_token(format)?;
    }

    let derivative = cache.get(&location, &spec).await?;
    log::info!(
        "Serving {} for user={} project={} (from_cache={})",
        location.cache_key, user_id, project_name, derivative.from_cache
    );

    Ok(DownloadResponse::Image(ImageResponse {
        content_type: detect_image_type(&derivative.bytes).to_string(),
        data: derivative.bytes,
        from_cache: derivative.from_cache,
    }))
}

#[derive(FromForm)]
pub struct Upload<'r> {
    pub file: TempFile<'r>,
}

#[post("/upload/<user_id>/<project_name>", data = "<upload>")]
pub async fn upload_image(
    user_id: &str,
    project_name: &str,
    mut upload: Form<Upload<'_>>,
    ingestor: &State<Ingestor>,
    config: &State<AppConfig>,
) -> Result<Json<UploadResponse>, ApiError> {
    let original_name = upload
        .file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ImageError::InvalidParameter("upload is missing a file name".to_string()))?;

    // Hand the pipeline a real path on the same filesystem as the store
    let staging_dir = config.storage_root.join("tmp");
    storage::ensure_dir(&staging_dir).await.map_err(ImageError::from)?;
    let staged = staging_dir.join(format!("upload-{}", Uuid::new_v4()));
    upload
        .file
        .move_copy_to(&staged)
        .await
        .map_err(ImageError::from)?;

    let result = ingestor
        .ingest(&staged, &original_name, user_id, project_name)
        .await;
    if result.is_err() {
        discard_staged(&staged).await;
    }
    let stored = result?;

    Ok(Json(UploadResponse {
        message: "Image uploaded successfully".to_string(),
        filename: stored.file_name,
    }))
}

async fn discard_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to discard staged upload {}: {}", path.display(), e);
        }
    }
}
