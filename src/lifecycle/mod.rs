//! Age-based expiry and explicit deletion of originals and derivatives.
//!
//! Directives come from the `expire`, `target` and `delete` query parameters
//! and are resolved before any cache lookup. When one fires, the request is
//! answered here and never reaches the derivative cache.

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use log::info;

use crate::images::{ImageError, ImageLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    Expired,
    Fresh,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Original,
    Transformed,
    Both,
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self, ImageError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "o" | "original" => Ok(Target::Original),
            "t" | "transformed" => Ok(Target::Transformed),
            "both" => Ok(Target::Both),
            other => Err(ImageError::InvalidParameter(format!(
                "target must be one of original, transformed, both; got '{}'",
                other
            ))),
        }
    }

    fn includes_original(self) -> bool {
        matches!(self, Target::Original | Target::Both)
    }

    fn includes_transformed(self) -> bool {
        matches!(self, Target::Transformed | Target::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Delete whichever targeted files are older than `hours`.
    Expire { hours: u64, target: Target },
    /// Delete the targeted files unconditionally.
    Delete(Target),
}

impl Directive {
    /// With `expire` present, `target` (or `delete` as a fallback) names what
    /// to age-check and `delete` is not applied on its own. An `expire` with
    /// nothing to check is a no-op.
    pub fn from_query(
        expire: Option<&str>,
        target: Option<&str>,
        delete: Option<&str>,
    ) -> Result<Option<Self>, ImageError> {
        let expire = expire.map(str::trim).filter(|v| !v.is_empty());
        let target = target.map(str::trim).filter(|v| !v.is_empty());
        let delete = delete.map(str::trim).filter(|v| !v.is_empty());

        if let Some(raw) = expire {
            let hours = match raw.parse::<u64>() {
                Ok(hours) if hours > 0 => hours,
                _ => {
                    return Err(ImageError::InvalidParameter(format!(
                        "expire must be a positive number of hours, got '{}'",
                        raw
                    )))
                }
            };
            return match target.or(delete) {
                Some(target) => Ok(Some(Directive::Expire {
                    hours,
                    target: Target::parse(target)?,
                })),
                None => Ok(None),
            };
        }

        match delete {
            Some(raw) => Ok(Some(Directive::Delete(Target::parse(raw)?))),
            None => Ok(None),
        }
    }
}

/// What the lifecycle manager decided for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// Expired files were removed; answer 410.
    Gone(String),
    /// Explicit deletion succeeded; answer 200.
    Deleted(String),
    /// Nothing to do; serve the image as usual.
    Continue,
}

pub async fn check_expiration(path: &Path, max_age_hours: u64) -> io::Result<Expiration> {
    check_expiration_at(path, max_age_hours, SystemTime::now()).await
}

pub async fn check_expiration_at(
    path: &Path,
    max_age_hours: u64,
    now: SystemTime,
) -> io::Result<Expiration> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Expiration::Absent),
        Err(e) => return Err(e),
    };
    let modified = metadata.modified()?;
    let max_age = Duration::from_secs(max_age_hours.saturating_mul(3600));

    // mtime in the future counts as fresh
    match now.duration_since(modified) {
        Ok(age) if age > max_age => Ok(Expiration::Expired),
        _ => Ok(Expiration::Fresh),
    }
}

pub async fn delete_if_exists(path: &Path) -> io::Result<Removal> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(Removal::Deleted),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Removal::NotFound),
        Err(e) => Err(e),
    }
}

pub async fn apply(
    directive: Directive,
    location: &ImageLocation,
) -> Result<LifecycleOutcome, ImageError> {
    match directive {
        Directive::Expire { hours, target } => expire(hours, target, location).await,
        Directive::Delete(target) => delete(target, location).await,
    }
}

async fn expire(
    hours: u64,
    target: Target,
    location: &ImageLocation,
) -> Result<LifecycleOutcome, ImageError> {
    let mut original_gone = false;
    let mut transformed_gone = false;

    if target.includes_original() {
        original_gone = expire_one(&location.original, hours).await?;
    }
    if target.includes_transformed() {
        transformed_gone = expire_one(&location.derivative, hours).await?;
    }

    let message = match (original_gone, transformed_gone) {
        (true, true) => "Original and transformed images have expired and have been deleted",
        (true, false) => "Original image has expired and has been deleted",
        (false, true) => "Transformed image has expired and has been deleted",
        (false, false) => return Ok(LifecycleOutcome::Continue),
    };
    info!(
        "Expired user={} project={} file={} (max age {}h, target {:?})",
        location.user_id, location.project_name, location.file_name, hours, target
    );
    Ok(LifecycleOutcome::Gone(message.to_string()))
}

async fn expire_one(path: &Path, hours: u64) -> Result<bool, ImageError> {
    match check_expiration(path, hours).await? {
        Expiration::Expired => Ok(delete_if_exists(path).await? == Removal::Deleted),
        Expiration::Fresh | Expiration::Absent => Ok(false),
    }
}

async fn delete(target: Target, location: &ImageLocation) -> Result<LifecycleOutcome, ImageError> {
    let message = match target {
        Target::Original => match delete_if_exists(&location.original).await? {
            Removal::Deleted => "Original image deleted successfully",
            Removal::NotFound => return Err(ImageError::OriginalNotFound),
        },
        Target::Transformed => match delete_if_exists(&location.derivative).await? {
            Removal::Deleted => "Transformed image deleted successfully",
            Removal::NotFound => return Err(ImageError::TransformedNotFound),
        },
        Target::Both => {
            let original = delete_if_exists(&location.original).await?;
            let transformed = delete_if_exists(&location.derivative).await?;
            match (original, transformed) {
                (Removal::Deleted, Removal::Deleted) => {
                    "Original and transformed images deleted successfully"
                }
                (Removal::Deleted, Removal::NotFound) => "Original image deleted successfully",
                (Removal::NotFound, Removal::Deleted) => "Transformed image deleted successfully",
                (Removal::NotFound, Removal::NotFound) => return Err(ImageError::OriginalNotFound),
            }
        }
    };
    info!(
        "Deleted {:?} for user={} project={} file={}",
        target, location.user_id, location.project_name, location.file_name
    );
    Ok(LifecycleOutcome::Deleted(message.to_string()))
}
