pub mod error;
pub mod images;
pub mod users;

pub use error::ApiError;
