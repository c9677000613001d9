//! Transform pipeline errors. All of them surface as HTTP 500 except where
//! the executor decides otherwise; none of them are cache-related.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransformError>;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to decode source image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("crop coordinates out of bounds: image is {width}x{height}, crop area is ({x1},{y1}) to ({x2},{y2})")]
    CropOutOfBounds {
        width: u32,
        height: u32,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
    },

    #[error("crop area resolves to zero pixels on a {width}x{height} image")]
    EmptyCrop { width: u32, height: u32 },

    #[error("failed to encode {format} output: {source}")]
    Encode {
        format: &'static str,
        #[source]
        source: image::ImageError,
    },
}
