//! Deterministic on-disk locations for originals and their derivatives.
//!
//! Layout under the storage root:
//!
//! ```text
//! users/{userId}/{projectName}/original/{fileName}
//! users/{userId}/{projectName}/transformed/{cacheKey}
//! ```

use std::path::{Path, PathBuf};

use crate::images::{ImageError, TransformSpec};

pub const ORIGINAL_DIR: &str = "original";
pub const TRANSFORMED_DIR: &str = "transformed";

/// Everything a retrieval needs to know about where its files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLocation {
    pub user_id: String,
    pub project_name: String,
    pub file_name: String,
    pub original: PathBuf,
    pub derivative: PathBuf,
    pub cache_key: String,
    /// Format the derivative is written in, when one can be determined.
    pub target_format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn user_dir(&self, user_id: &str) -> Result<PathBuf, ImageError> {
        validate_identifier("userId", user_id)?;
        Ok(self.root.join("users").join(user_id))
    }

    pub fn project_dir(&self, user_id: &str, project_name: &str) -> Result<PathBuf, ImageError> {
        validate_identifier("projectName", project_name)?;
        Ok(self.user_dir(user_id)?.join(project_name))
    }

    pub fn original_dir(&self, user_id: &str, project_name: &str) -> Result<PathBuf, ImageError> {
        Ok(self.project_dir(user_id, project_name)?.join(ORIGINAL_DIR))
    }

    pub fn transformed_dir(&self, user_id: &str, project_name: &str) -> Result<PathBuf, ImageError> {
        Ok(self.project_dir(user_id, project_name)?.join(TRANSFORMED_DIR))
    }

    pub fn original_path(
        &self,
        user_id: &str,
        project_name: &str,
        file_name: &str,
    ) -> Result<PathBuf, ImageError> {
        validate_identifier("fileName", file_name)?;
        Ok(self.original_dir(user_id, project_name)?.join(file_name))
    }

    pub fn derivative_path(
        &self,
        user_id: &str,
        project_name: &str,
        file_name: &str,
        spec: &TransformSpec,
    ) -> Result<PathBuf, ImageError> {
        validate_identifier("fileName", file_name)?;
        Ok(self
            .transformed_dir(user_id, project_name)?
            .join(cache_key(file_name, spec)))
    }

    pub fn resolve(
        &self,
        user_id: &str,
        project_name: &str,
        file_name: &str,
        spec: &TransformSpec,
    ) -> Result<ImageLocation, ImageError> {
        Ok(ImageLocation {
            user_id: user_id.to_string(),
            project_name: project_name.to_string(),
            file_name: file_name.to_string(),
            original: self.original_path(user_id, project_name, file_name)?,
            derivative: self.derivative_path(user_id, project_name, file_name, spec)?,
            cache_key: cache_key(file_name, spec),
            target_format: target_format(file_name, spec),
        })
    }
}

/// Reject anything that could escape its directory once joined onto a path.
pub fn validate_identifier(kind: &str, value: &str) -> Result<(), ImageError> {
    let invalid = value.is_empty()
        || value == "."
        || value.contains("..")
        || value.contains(['/', '\\', '\0', ':'])
        || Path::new(value).is_absolute();

    if invalid {
        return Err(ImageError::InvalidIdentifier(format!(
            "{} '{}' is not a valid path segment",
            kind, value
        )));
    }
    Ok(())
}

/// Lowercased extension of a file name, if it has one.
pub fn source_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Requested format, falling back to the source file's extension.
pub fn target_format(file_name: &str, spec: &TransformSpec) -> Option<String> {
    spec.format.clone().or_else(|| source_extension(file_name))
}

/// Derivative file name for `file_name` under `spec`.
///
/// `{stem}_{w|auto}x{h|auto}_{format|original}_q{quality|default}[_r{deg}].{ext}`
pub fn cache_key(file_name: &str, spec: &TransformSpec) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);

    let width = spec.width.map_or_else(|| "auto".to_string(), |w| w.to_string());
    let height = spec.height.map_or_else(|| "auto".to_string(), |h| h.to_string());
    let format = spec.format.as_deref().unwrap_or("original");
    let quality = spec.quality.map_or_else(|| "default".to_string(), |q| q.to_string());

    let mut key = format!("{}_{}x{}_{}_q{}", stem, width, height, format, quality);
    if let Some(degrees) = spec.rotate {
        key.push_str(&format!("_r{}", degrees));
    }
    if let Some(ext) = target_format(file_name, spec) {
        key.push('.');
        key.push_str(&ext);
    }
    key
}
