use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Input directory not found: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("Cannot read sprite {}: {source}", path.display())]
    SpriteRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Atlas '{atlas}' does not fit into {width}x{height} ({bins} bins required)")]
    Oversize {
        atlas: String,
        width: u32,
        height: u32,
        bins: usize,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Encoding error: {0}")]
    Encode(String),
    #[error("Invalid atlas document: {0}")]
    InvalidAtlas(String),
}

pub type Result<T> = std::result::Result<T, AtlasError>;
