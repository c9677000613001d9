//! thumbforge server entry point.
//!
//! Bootstrap order: environment and logging, server config, storage config,
//! backing store, cache stack, router, then serve with graceful shutdown.
//! On shutdown the cached storage is closed last so queued cache writes
//! drain before the process exits.

use std::sync::Arc;

use anyhow::Context;
use tower_http::timeout::TimeoutLayer;

use thumbforge_server::{create_router, shutdown, AppState, ServerConfig};
use thumbforge_storage::{build_backend, CachedStorage, StorageConfig};
use thumbforge_transform::ImageTransformer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A .env file is optional; real environment variables win.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(
        port = config.port,
        storage_config = %config.storage_config_path,
        "Starting thumbnail server"
    );

    let storage_config = StorageConfig::load(&config.storage_config_path)
        .with_context(|| format!("loading storage config from {}", config.storage_config_path))?;

    // The environment secret wins over the config file.
    let signature_secret = if config.signature_secret.is_empty() {
        storage_config.signature_secret.clone().unwrap_or_default()
    } else {
        config.signature_secret.clone()
    };
    tracing::info!(
        signature_validation = !signature_secret.is_empty(),
        "Signature validation configured"
    );

    let backend = build_backend(&storage_config).context("initializing backing store")?;
    let storage = Arc::new(
        CachedStorage::from_config(backend, storage_config.cache.as_ref())
            .await
            .context("initializing cache stack")?,
    );

    tracing::info!(
        slots = config.max_concurrent_transforms,
        max_width = config.parser_limits.max_width,
        max_height = config.parser_limits.max_height,
        "Transform pipeline configured"
    );

    let state = AppState::new(
        Arc::clone(&storage),
        Arc::new(ImageTransformer::new()),
        &signature_secret,
        config.parser_limits,
        config.max_concurrent_transforms,
    );

    // The response deadline rides on the router; the header-read timeout
    // and buffer cap are applied per connection by the serve loop.
    let router = create_router(state).layer(TimeoutLayer::new(config.write_timeout));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        addr = %addr,
        header_timeout_secs = config.read_header_timeout.as_secs(),
        response_timeout_secs = config.write_timeout.as_secs(),
        max_header_bytes = config.max_header_bytes,
        "Server listening"
    );
    tracing::info!("Thumbnail endpoint: /thumbs/[{{signature}}/]{{size}}/[filters:{{filters}}/]{{path}}[/as/{{alias.ext}}]");

    shutdown::serve_with_shutdown(listener, router, &config)
        .await
        .context("serving HTTP")?;

    // Drain writer queues and pending memory writes, then stop the disk
    // cache scanners.
    storage.close().await;
    tracing::info!("Server shut down gracefully");

    Ok(())
}
