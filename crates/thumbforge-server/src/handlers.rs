//! Request executor.
//!
//! The thumbnail handler is cache-first: the raw URL path is the cache key,
//! and a hit in the thumbnail tier bypasses parsing and signature
//! validation entirely. Misses parse and verify the URL, coalesce through
//! the singleflight group, then run the bounded pipeline:
//!
//! ```text
//! Receive -> [thumb cache hit?] --yes--> respond (X-Cache: HIT)
//!        |no
//!        parse (400) -> verify signature (404) -> singleflight join
//!        leader: acquire slot -> fetch source -> apply pipeline -> release
//!        write memory cache (sync) -> enqueue disk write (async)
//!        respond (X-Cache: MISS)
//! ```
//!
//! Cache failures never fail the request; signature failures surface as
//! 404 rather than 403 so invalid signatures cannot probe for existence.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use thiserror::Error;

use thumbforge_core::RequestPlan;
use thumbforge_storage::StorageError;

use crate::envelope;
use crate::AppState;

/// One year; thumbnails are immutable for a given URL.
const CACHE_CONTROL_VALUE: &str = "public, max-age=31536000";

/// A finished thumbnail, as shared through the singleflight group.
#[derive(Debug, Clone)]
pub struct ThumbnailResult {
    pub data: Bytes,
    pub content_type: String,
}

/// Executor errors, cloneable so one leader failure can fan out to every
/// coalesced follower.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("backing store failure: {0}")]
    Backend(String),

    #[error("transform failure: {0}")]
    Transform(String),

    #[error("request was canceled")]
    Canceled,
}

impl ExecError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Backend(_) | Self::Transform(_) | Self::Canceled => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type ThumbResult = Result<ThumbnailResult, ExecError>;

pub async fn health() -> &'static str {
    "OK"
}

pub async fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

pub async fn thumbnail(State(state): State<AppState>, uri: Uri) -> Response {
    let cache_key = uri.path().to_string();

    // Cache-first: a hit skips parsing and signature validation.
    if state.storage.thumbs_enabled() {
        if let Some(cached) = state.storage.get_thumbnail(&cache_key).await {
            match envelope::decode(&cached) {
                Ok((content_type, data)) => {
                    tracing::debug!(key = %cache_key, "Thumbnail cache hit");
                    return image_response(&content_type, data, "HIT");
                }
                Err(err) => {
                    // Corrupt envelope: fall through and reprocess.
                    tracing::warn!(key = %cache_key, error = %err, "Failed to decode cached thumbnail");
                }
            }
        }
    }

    let plan = match state.parser.parse(&cache_key) {
        Ok(plan) => plan,
        Err(err) => {
            tracing::warn!(url = %cache_key, error = %err, "URL parse failed");
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid URL format: {err} (url={cache_key})"),
            );
        }
    };

    if let Err(err) = state.signer.verify(&plan) {
        tracing::warn!(url = %cache_key, error = %err, "Signature validation failed");
        // 404 instead of 403: an invalid signature must not reveal whether
        // the resource exists.
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Signature validation failed: {err}"),
        );
    }

    tracing::debug!(
        key = %cache_key,
        source = %plan.source_key,
        format = %plan.format(),
        "Processing thumbnail"
    );

    let flight = Arc::clone(&state.flight);
    let exec_state = state.clone();
    let (result, coalesced) = flight
        .run(&cache_key, move || execute(exec_state, plan))
        .await;

    let thumbnail = match result {
        Ok(thumbnail) => thumbnail,
        Err(err) => {
            tracing::error!(url = %cache_key, error = %err, "Thumbnail generation failed");
            return error_response(
                err.status(),
                format!("Failed to create thumbnail: {err} (url={cache_key})"),
            );
        }
    };

    if coalesced {
        tracing::debug!(key = %cache_key, "Served from coalesced in-flight request");
    }

    if state.storage.thumbs_enabled() {
        let encoded = envelope::encode(&thumbnail.content_type, &thumbnail.data);
        // Memory write is synchronous so the next same-key lookup hits; the
        // disk write is queued and best-effort.
        state.storage.set_thumbnail_sync(&cache_key, encoded.clone()).await;
        state.storage.set_thumbnail_async(&cache_key, encoded);
    }

    image_response(&thumbnail.content_type, thumbnail.data, "MISS")
}

/// The leader-only section of a cache miss: one processing slot, a source
/// fetch through the sources tier, and the pipeline on a blocking thread.
async fn execute(state: AppState, plan: RequestPlan) -> ThumbResult {
    let _permit = state
        .process_slots
        .acquire()
        .await
        .map_err(|_| ExecError::Canceled)?;

    let source = state.storage.fetch(&plan.source_key).await.map_err(|err| match err {
        StorageError::NotFound(key) => ExecError::NotFound(key),
        other => ExecError::Backend(other.to_string()),
    })?;

    let transformer = state.transformer.clone();
    let rendered = tokio::task::spawn_blocking(move || transformer.apply(&source, &plan))
        .await
        .map_err(|err| ExecError::Transform(format!("transform task failed: {err}")))?
        .map_err(|err| ExecError::Transform(err.to_string()))?;

    Ok(ThumbnailResult {
        data: rendered.bytes,
        content_type: rendered.content_type.to_string(),
    })
}

fn image_response(content_type: &str, data: Bytes, cache_status: &'static str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, CACHE_CONTROL_VALUE)
        .header("x-cache", cache_status)
        .header(header::CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .expect("static response headers are valid")
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, message).into_response()
}
