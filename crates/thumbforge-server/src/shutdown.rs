//! Serving and graceful shutdown.
//!
//! The accept loop builds each connection through a hyper-util HTTP/1
//! builder so the configured header-read timeout and read-buffer cap are
//! actually enforced at the socket. The header timer restarts whenever the
//! connection waits for the next request, which also bounds keep-alive
//! idle time. On SIGINT/SIGTERM the listener stops and in-flight
//! connections are drained with a deadline.

use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;

use crate::config::ServerConfig;

/// How long to wait for in-flight connections after a shutdown signal.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Resolves when SIGINT (Ctrl+C) or SIGTERM arrives.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Accept connections until a shutdown signal, serving each through the
/// router with the configured connection limits applied.
pub async fn serve_with_shutdown(
    listener: TcpListener,
    router: Router,
    config: &ServerConfig,
) -> std::io::Result<()> {
    let mut builder = ConnectionBuilder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(config.read_header_timeout)
        .max_buf_size(config.max_header_bytes);

    let graceful = GracefulShutdown::new();
    let mut signal = std::pin::pin!(shutdown_signal());

    loop {
        tokio::select! {
            _ = &mut signal => break,
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!(error = %err, "Accept failed");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let service = TowerToHyperService::new(router.clone());
                let connection = graceful.watch(builder.serve_connection(io, service).into_owned());
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        tracing::debug!(remote = %remote, error = %err, "Connection closed with error");
                    }
                });
            }
        }
    }

    tokio::select! {
        _ = graceful.shutdown() => {
            tracing::info!("All connections drained");
        }
        _ = tokio::time::sleep(DRAIN_DEADLINE) => {
            tracing::warn!(deadline_secs = DRAIN_DEADLINE.as_secs(), "Drain deadline reached, closing remaining connections");
        }
    }

    Ok(())
}
