//! HTTP edge for the thumbforge thumbnail service.
//!
//! Routes:
//!
//! - `GET /thumbs/...`: the thumbnail grammar (see `thumbforge-core`)
//! - `GET /health`: liveness, returns `OK`
//! - everything else: 404
//!
//! The request executor lives in [`handlers`]; request coalescing in
//! [`singleflight`]; the cache envelope format in [`envelope`].

pub mod config;
pub mod envelope;
pub mod handlers;
pub mod shutdown;
pub mod singleflight;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

use thumbforge_core::{ParserLimits, Signer, UrlParser};
use thumbforge_storage::CachedStorage;
use thumbforge_transform::Transform;

pub use config::ServerConfig;
pub use singleflight::Flight;

/// Shared state for the request handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<CachedStorage>,
    pub transformer: Arc<dyn Transform>,
    pub parser: Arc<UrlParser>,
    pub signer: Arc<Signer>,
    pub flight: Arc<Flight>,
    /// Bounds concurrent pipeline invocations; deliberately smaller than
    /// the HTTP server's effective request concurrency.
    pub process_slots: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        storage: Arc<CachedStorage>,
        transformer: Arc<dyn Transform>,
        signature_secret: &str,
        parser_limits: ParserLimits,
        max_concurrent_transforms: usize,
    ) -> Self {
        Self {
            storage,
            transformer,
            parser: Arc::new(UrlParser::new(parser_limits)),
            signer: Arc::new(Signer::new(signature_secret)),
            flight: Arc::new(Flight::new()),
            process_slots: Arc::new(Semaphore::new(max_concurrent_transforms)),
        }
    }
}

/// Build the service router. Cache hits are served as-is, with no gzip layer on
/// the image path; the payloads are already compressed formats.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/thumbs/*rest", get(handlers::thumbnail))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
