use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Original image not found")]
    OriginalNotFound,

    #[error("Transformed image not found")]
    TransformedNotFound,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Transform failed: {0}")]
    TransformFailed(String),

    // The file made it to disk but its record did not
    #[error("Image {file_name} stored at {} but its record could not be saved: {reason}", path.display())]
    PartialIngestFailure {
        file_name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Storage error: {0}")]
    StorageIo(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
