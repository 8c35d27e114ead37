use thiserror::Error;

/// Errors surfaced by template creation, import/export and tile rendering.
///
/// Pixel arithmetic never produces these; only input validation and real
/// decode/encode/storage failures do.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid template document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
