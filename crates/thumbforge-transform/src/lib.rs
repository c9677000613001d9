//! Image transformation pipeline.
//!
//! Applies a parsed [`RequestPlan`] to source bytes and returns the encoded
//! result plus its MIME type. The apply order is fixed:
//!
//! 1. Decode with EXIF autorotation.
//! 2. Apply the non-resize operations in URL-declared order (crops).
//! 3. Apply the resize operation strictly last, so the output dimensions
//!    always match the request.
//! 4. Encode with the plan's format and quality.
//!
//! The pipeline is CPU-bound and synchronous; callers run it on a blocking
//! thread and bound concurrency with a semaphore.

pub mod error;

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageReader, Rgba, RgbaImage};

use thumbforge_core::{FillColor, FitMode, Operation, OutputFormat, RequestPlan};

pub use error::{Result, TransformError};

/// An encoded transformation result.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub bytes: Bytes,
    pub content_type: &'static str,
}

/// The transformation engine as seen by the request executor. Tests swap in
/// instrumented implementations to observe invocation counts.
pub trait Transform: Send + Sync {
    fn apply(&self, source: &[u8], plan: &RequestPlan) -> Result<Rendered>;
}

/// Pipeline implementation over the `image` crate.
#[derive(Debug, Default)]
pub struct ImageTransformer;

impl ImageTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for ImageTransformer {
    fn apply(&self, source: &[u8], plan: &RequestPlan) -> Result<Rendered> {
        let mut img = decode(source)?;

        for op in &plan.operations {
            match op {
                Operation::Crop { x1, y1, x2, y2 } => {
                    img = apply_crop(img, *x1, *y1, *x2, *y2)?;
                }
                Operation::PercentCrop { x1, y1, x2, y2 } => {
                    img = apply_pcrop(img, *x1, *y1, *x2, *y2)?;
                }
                // Resize is applied after this loop; format and quality are
                // consumed by the encoder; fit was folded into the resize
                // operation at parse time.
                Operation::Resize { .. }
                | Operation::Format(_)
                | Operation::Quality(_)
                | Operation::Fit { .. } => {}
            }
        }

        let (width, height, fit, fill) = plan.resize();
        img = apply_resize(img, width, height, fit, fill);

        encode(&img, plan.format(), plan.quality())
    }
}

/// Decode source bytes, honoring the EXIF orientation tag so rotated camera
/// output comes out upright.
fn decode(source: &[u8]) -> Result<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(|e| TransformError::Decode(image::ImageError::IoError(e)))?;
    let mut decoder = reader.into_decoder().map_err(TransformError::Decode)?;
    let orientation = decoder
        .orientation()
        .unwrap_or(image::metadata::Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder).map_err(TransformError::Decode)?;
    img.apply_orientation(orientation);
    Ok(img)
}

fn apply_crop(img: DynamicImage, x1: u32, y1: u32, x2: u32, y2: u32) -> Result<DynamicImage> {
    let (width, height) = img.dimensions();
    if x2 > width || y2 > height {
        return Err(TransformError::CropOutOfBounds {
            width,
            height,
            x1,
            y1,
            x2,
            y2,
        });
    }
    Ok(img.crop_imm(x1, y1, x2 - x1, y2 - y1))
}

/// Translate percentages into pixels against the current dimensions, then
/// extract. `pcrop(0,0,100,100)` leaves the pixels untouched.
fn apply_pcrop(img: DynamicImage, x1: u8, y1: u8, x2: u8, y2: u8) -> Result<DynamicImage> {
    let (width, height) = img.dimensions();
    let left = (width as u64 * x1 as u64 / 100) as u32;
    let top = (height as u64 * y1 as u64 / 100) as u32;
    let right = (width as u64 * x2 as u64 / 100) as u32;
    let bottom = (height as u64 * y2 as u64 / 100) as u32;

    if right <= left || bottom <= top {
        return Err(TransformError::EmptyCrop { width, height });
    }
    if left == 0 && top == 0 && right == width && bottom == height {
        return Ok(img);
    }
    Ok(img.crop_imm(left, top, right - left, bottom - top))
}

fn apply_resize(
    img: DynamicImage,
    width: Option<u32>,
    height: Option<u32>,
    fit: FitMode,
    fill: FillColor,
) -> DynamicImage {
    match (width, height) {
        (None, None) => img,
        (Some(w), None) => {
            // Aspect-preserving scale to the requested width; never upscale.
            if img.width() <= w {
                img
            } else {
                img.resize(w, u32::MAX, FilterType::Lanczos3)
            }
        }
        (None, Some(h)) => {
            if img.height() <= h {
                img
            } else {
                img.resize(u32::MAX, h, FilterType::Lanczos3)
            }
        }
        (Some(w), Some(h)) => match fit {
            FitMode::Cover => img.resize_to_fill(w, h, FilterType::Lanczos3),
            FitMode::Fill => resize_fill(img, w, h, fill),
        },
    }
}

/// Fill mode: scale down to fit within the target box, then center the
/// result on a canvas of the exact target size.
fn resize_fill(img: DynamicImage, width: u32, height: u32, fill: FillColor) -> DynamicImage {
    let scaled = if img.width() > width || img.height() > height {
        img.resize(width, height, FilterType::Lanczos3)
    } else {
        img
    };
    if scaled.dimensions() == (width, height) {
        return scaled;
    }

    let background: Rgba<u8> = match fill {
        FillColor::White => Rgba([255, 255, 255, 255]),
        FillColor::Black => Rgba([0, 0, 0, 255]),
        FillColor::Transparent => Rgba([0, 0, 0, 0]),
    };

    let (sw, sh) = scaled.dimensions();
    let left = (width.saturating_sub(sw)) / 2;
    let top = (height.saturating_sub(sh)) / 2;

    let mut canvas = RgbaImage::from_pixel(width, height, background);
    imageops::overlay(&mut canvas, &scaled.to_rgba8(), left as i64, top as i64);
    DynamicImage::ImageRgba8(canvas)
}

fn encode(img: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Rendered> {
    let mut out = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            // JPEG cannot carry alpha; flatten to RGB first.
            let rgb = img.to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut out, quality);
            rgb.write_with_encoder(encoder).map_err(|e| TransformError::Encode {
                format: "jpeg",
                source: e,
            })?;
        }
        OutputFormat::Png => {
            let encoder = PngEncoder::new(&mut out);
            img.write_with_encoder(encoder).map_err(|e| TransformError::Encode {
                format: "png",
                source: e,
            })?;
        }
        OutputFormat::Webp => {
            let rgba = img.to_rgba8();
            let encoder = WebPEncoder::new_lossless(&mut out);
            rgba.write_with_encoder(encoder).map_err(|e| TransformError::Encode {
                format: "webp",
                source: e,
            })?;
        }
        OutputFormat::Avif => {
            let rgba = img.to_rgba8();
            let encoder = AvifEncoder::new_with_speed_quality(&mut out, 4, quality);
            rgba.write_with_encoder(encoder).map_err(|e| TransformError::Encode {
                format: "avif",
                source: e,
            })?;
        }
    }

    Ok(Rendered {
        bytes: Bytes::from(out),
        content_type: format.content_type(),
    })
}
