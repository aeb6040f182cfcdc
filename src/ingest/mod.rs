use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};

use crate::config::AppConfig;
use crate::images::paths::{source_extension, validate_identifier};
use crate::images::{ImageError, OutputFormat, PathResolver, TransformSpec, Transformer};
use crate::models::{ImageRecord, NewImage};
use crate::storage;
use crate::store::RecordStore;

/// Thresholds above which an upload is re-encoded instead of stored verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    pub max_bytes: u64,
    pub max_dimension: u32,
    pub max_width: u32,
    pub quality: u8,
}

impl From<&AppConfig> for IngestLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_bytes: config.ingest_max_bytes,
            max_dimension: config.ingest_max_dimension,
            max_width: config.ingest_max_width,
            quality: config.ingest_quality,
        }
    }
}

impl Default for IngestLimits {
    fn default() -> Self {
        IngestLimits::from(&AppConfig::default())
    }
}

const REENCODE_FALLBACK_EXT: &str = "jpg";

#[derive(Debug, Clone)]
struct Reencode {
    spec: TransformSpec,
    /// Upload name with the extension matching the re-encoded container.
    file_name: String,
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub record: ImageRecord,
    pub file_name: String,
    pub path: PathBuf,
    pub reencoded: bool,
}

/// Turns received uploads into stored originals plus their records.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    resolver: PathResolver,
    codec: Arc<dyn Transformer>,
    limits: IngestLimits,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: PathResolver,
        codec: Arc<dyn Transformer>,
        limits: IngestLimits,
    ) -> Self {
        Self {
            store,
            resolver,
            codec,
            limits,
        }
    }

    pub async fn ingest(
        &self,
        temp_path: &Path,
        original_file_name: &str,
        user_id: &str,
        project_name: &str,
    ) -> Result<StoredImage, ImageError> {
        validate_identifier("fileName", original_file_name)?;
        let original_dir = self.resolver.original_dir(user_id, project_name)?;

        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| ImageError::UserNotFound(user_id.to_string()))?;
        let project = self
            .store
            .find_project(&user.id, project_name)
            .await?
            .ok_or_else(|| ImageError::ProjectNotFound(project_name.to_string()))?;

        storage::ensure_dir(&original_dir).await?;

        let size = tokio::fs::metadata(temp_path).await?.len();
        let dimensions = read_dimensions(temp_path.to_path_buf()).await?;
        let reencode = self.reencode_plan(original_file_name, size, dimensions);
        let stored_name = reencode
            .as_ref()
            .map_or(original_file_name, |plan| plan.file_name.as_str());

        let (file_name, path) =
            storage::reserve_unique(&original_dir, Utc::now().timestamp_millis(), stored_name).await?;

        let stored = match &reencode {
            Some(plan) => self.store_reencoded(temp_path, &path, &plan.spec).await,
            None => storage::move_file(temp_path, &path).await.map_err(ImageError::from),
        };
        if let Err(e) = stored {
            error!(
                "Failed to store upload user={} project={} file={}: {}",
                user_id, project_name, original_file_name, e
            );
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                warn!("Failed to release reserved name {}: {}", path.display(), cleanup);
            }
            return Err(e);
        }

        let record = self
            .store
            .create_image(NewImage {
                file_name: file_name.clone(),
                file_path: path.to_string_lossy().into_owned(),
                user_id: user.id.clone(),
                project_id: project.id.clone(),
            })
            .await
            .map_err(|e| {
                error!(
                    "Stored {} but failed to record it (user={} project={}): {}",
                    path.display(),
                    user_id,
                    project_name,
                    e
                );
                ImageError::PartialIngestFailure {
                    file_name: file_name.clone(),
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;

        info!(
            "Stored {} for user={} project={} ({} bytes, {}x{}, reencoded={})",
            file_name,
            user_id,
            project_name,
            size,
            dimensions.0,
            dimensions.1,
            reencode.is_some()
        );

        Ok(StoredImage {
            record,
            file_name,
            path,
            reencoded: reencode.is_some(),
        })
    }

    /// `Some` when the upload exceeds a limit and must be re-encoded.
    fn reencode_plan(
        &self,
        file_name: &str,
        size: u64,
        (width, height): (u32, u32),
    ) -> Option<Reencode> {
        let limits = &self.limits;
        let oversized = size > limits.max_bytes || width.max(height) > limits.max_dimension;
        if !oversized {
            return None;
        }

        let scale = 1f64
            .min(limits.max_width as f64 / width as f64)
            .min(limits.max_dimension as f64 / height as f64);
        let target_width = if scale < 1.0 {
            Some(((width as f64 * scale).floor() as u32).max(1))
        } else {
            None
        };

        // Lossy uploads keep their container; everything else becomes JPEG
        let (format, file_name) = match source_extension(file_name) {
            Some(ext) if OutputFormat::from_token(&ext).map_or(false, |f| f.is_lossy()) => {
                (ext, file_name.to_string())
            }
            _ => (REENCODE_FALLBACK_EXT.to_string(), with_extension(file_name, REENCODE_FALLBACK_EXT)),
        };

        Some(Reencode {
            spec: TransformSpec {
                width: target_width,
                format: Some(format),
                quality: Some(limits.quality),
                ..Default::default()
            },
            file_name,
        })
    }

    async fn store_reencoded(
        &self,
        temp_path: &Path,
        dest: &Path,
        spec: &TransformSpec,
    ) -> Result<(), ImageError> {
        let source = tokio::fs::read(temp_path).await?;
        let codec = self.codec.clone();
        let transform_spec = spec.clone();
        let encoded = tokio::task::spawn_blocking(move || codec.transform(&source, &transform_spec))
            .await
            .map_err(|e| ImageError::TransformFailed(format!("codec task failed: {}", e)))??;

        storage::write_atomic(dest.to_path_buf(), encoded).await?;
        if let Err(e) = tokio::fs::remove_file(temp_path).await {
            warn!("Failed to remove upload temp file {}: {}", temp_path.display(), e);
        }
        Ok(())
    }
}

fn with_extension(file_name: &str, ext: &str) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    format!("{}.{}", stem, ext)
}

async fn read_dimensions(path: PathBuf) -> Result<(u32, u32), ImageError> {
    tokio::task::spawn_blocking(move || -> Result<(u32, u32), ImageError> {
        image::io::Reader::open(&path)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| ImageError::DecodeError(format!("Uploaded file is not a readable image: {}", e)))
    })
    .await
    .map_err(|e| ImageError::DecodeError(format!("dimension probe failed: {}", e)))?
}
