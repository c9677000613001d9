//! Error types for URL parsing and signature verification.
//!
//! `ParseError` covers everything that makes a request URL unusable and maps
//! to HTTP 400. `SignatureError` covers the HMAC protocol and maps to HTTP
//! 404 so that invalid signatures do not reveal whether a resource exists.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("path must start with /thumbs/")]
    InvalidPrefix,

    #[error("invalid path format, expected /thumbs/[{{signature}}/]{{size}}/[filters:{{filters}}/]{{path}}")]
    TooFewSegments,

    #[error("invalid size format, expected {{width}}x{{height}}, x{{height}}, {{width}}x, or x (got: {0})")]
    InvalidSize(String),

    #[error("invalid {dimension}: {value} exceeds maximum allowed value {max}")]
    DimensionTooLarge {
        dimension: &'static str,
        value: u32,
        max: u32,
    },

    #[error("invalid dimensions: {width}x{height} ({area} px) exceeds maximum resolution {max} px")]
    ResolutionTooLarge {
        width: u32,
        height: u32,
        area: u64,
        max: u64,
    },

    #[error("invalid signature format: expected 8-64 hex characters")]
    InvalidSignatureFormat,

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("duplicate filter: {0} may only appear once")]
    DuplicateFilter(&'static str),

    #[error("{filter} filter: {reason}")]
    InvalidFilter {
        filter: &'static str,
        reason: String,
    },

    #[error("missing file path after filters")]
    MissingPath,

    #[error("crop and pcrop cannot be combined in one request")]
    ConflictingCrops,

    #[error("fit(fill) requires both width and height to be specified")]
    FillRequiresBothDimensions,

    #[error("transparent fill color requires an alpha-capable format (png, webp, or avif), got {0}")]
    TransparentRequiresAlpha(&'static str),

    #[error("alias extension {alias} conflicts with explicit format filter {format}")]
    AliasFormatMismatch {
        alias: &'static str,
        format: &'static str,
    },

    #[error("unsupported alias extension: {0} (supported: jpeg, png, webp, avif)")]
    UnsupportedAliasExtension(String),
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature provided in URL but signature validation is not configured on server")]
    NotConfigured,

    #[error("signature required but not provided in URL")]
    Missing,

    #[error("invalid signature")]
    Mismatch,
}
