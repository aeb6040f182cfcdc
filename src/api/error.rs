use crate::images::ImageError;
use crate::store::StoreError;
use rocket::http::Status;
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    ImageError(ImageError),
    StoreError(StoreError),
}

impl From<ImageError> for ApiError {
    fn from(error: ImageError) -> Self {
        match error {
            ImageError::Store(inner) => ApiError::StoreError(inner),
            other => ApiError::ImageError(other),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        ApiError::StoreError(error)
    }
}

impl ApiError {
    /// Status, error label and client-safe message.
    fn parts(&self) -> (Status, &'static str, String) {
        match self {
            ApiError::ImageError(ImageError::UserNotFound(_)) => {
                (Status::NotFound, "UserNotFound", "User not found".to_string())
            }
            ApiError::ImageError(ImageError::ProjectNotFound(_)) => {
                (Status::NotFound, "ProjectNotFound", "Project not found".to_string())
            }
            ApiError::ImageError(ImageError::OriginalNotFound) => (
                Status::NotFound,
                "OriginalNotFound",
                "Original image not found".to_string(),
            ),
            ApiError::ImageError(ImageError::TransformedNotFound) => (
                Status::NotFound,
                "TransformedNotFound",
                "Transformed image not found".to_string(),
            ),
            ApiError::ImageError(ImageError::InvalidParameter(message)) => {
                (Status::BadRequest, "InvalidParameter", message.clone())
            }
            ApiError::ImageError(ImageError::InvalidIdentifier(message)) => {
                (Status::BadRequest, "InvalidIdentifier", message.clone())
            }
            ApiError::ImageError(ImageError::UnsupportedFormat(format)) => (
                Status::BadRequest,
                "UnsupportedFormat",
                format!("Unsupported format: {}", format),
            ),
            ApiError::ImageError(ImageError::DecodeError(message)) => {
                (Status::BadRequest, "DecodeError", message.clone())
            }
            ApiError::ImageError(ImageError::TransformFailed(_)) => (
                Status::InternalServerError,
                "TransformFailed",
                "Error processing image".to_string(),
            ),
            ApiError::ImageError(ImageError::PartialIngestFailure { file_name, .. }) => (
                Status::InternalServerError,
                "PartialIngestFailure",
                format!("Image {} was stored but its record could not be saved", file_name),
            ),
            ApiError::ImageError(ImageError::StorageIo(_))
            | ApiError::ImageError(ImageError::Store(_))
            | ApiError::StoreError(StoreError::Backend(_)) => (
                Status::InternalServerError,
                "InternalError",
                "Internal server error".to_string(),
            ),
            ApiError::StoreError(StoreError::Duplicate(message)) => {
                (Status::Conflict, "Duplicate", message.clone())
            }
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let (status, label, message) = self.parts();
        if status == Status::InternalServerError {
            log::error!("Request failed: {:?}", self);
        }

        let body = json!({
            "error": label,
            "message": message,
        })
        .to_string();

        rocket::Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(body.len(), std::io::Cursor::new(body))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn status_of(error: impl Into<ApiError>) -> Status {
        error.into().parts().0
    }

    #[test]
    fn maps_taxonomy_to_statuses() {
        assert_eq!(status_of(ImageError::UserNotFound("u".into())), Status::NotFound);
        assert_eq!(status_of(ImageError::ProjectNotFound("p".into())), Status::NotFound);
        assert_eq!(status_of(ImageError::OriginalNotFound), Status::NotFound);
        assert_eq!(status_of(ImageError::TransformedNotFound), Status::NotFound);
        assert_eq!(status_of(ImageError::InvalidParameter("x".into())), Status::BadRequest);
        assert_eq!(status_of(ImageError::InvalidIdentifier("x".into())), Status::BadRequest);
        assert_eq!(status_of(ImageError::UnsupportedFormat("x".into())), Status::BadRequest);
        assert_eq!(status_of(ImageError::DecodeError("x".into())), Status::BadRequest);
        assert_eq!(status_of(ImageError::TransformFailed("x".into())), Status::InternalServerError);
        assert_eq!(status_of(StoreError::Duplicate("x".into())), Status::Conflict);
        assert_eq!(
            status_of(ImageError::Store(StoreError::Backend("x".into()))),
            Status::InternalServerError
        );
    }

    #[test]
    fn internal_errors_do_not_leak_paths() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "/srv/images/users/u/secret");
        let (status, _, message) = ApiError::from(ImageError::StorageIo(io)).parts();
        assert_eq!(status, Status::InternalServerError);
        assert!(!message.contains("/srv"));

        let partial = ImageError::PartialIngestFailure {
            file_name: "1-a.png".into(),
            path: PathBuf::from("/srv/images/users/u/p/original/1-a.png"),
            reason: "db down".into(),
        };
        let (_, label, message) = ApiError::from(partial).parts();
        assert_eq!(label, "PartialIngestFailure");
        assert!(message.contains("1-a.png"));
        assert!(!message.contains("/srv"));
    }
}
