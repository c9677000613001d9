//! Server configuration from environment variables.
//!
//! Environment values take precedence over the storage config file for
//! every key listed here. A `.env` file is loaded at startup when present.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `PORT` | `8080` | HTTP listen port |
//! | `HTTP_READ_HEADER_TIMEOUT_SECONDS` | `5` | request-header read timeout; also bounds keep-alive idle waits |
//! | `HTTP_WRITE_TIMEOUT_SECONDS` | `30` | response deadline |
//! | `HTTP_MAX_HEADER_BYTES` | `1048576` | request read-buffer cap |
//! | `STORAGE_CONFIG_PATH` | `./storage.json` | storage config file |
//! | `SIGNATURE_SECRET` | empty | HMAC secret, empty disables validation |
//! | `MAX_RESIZE_WIDTH` | `10000` | largest accepted width |
//! | `MAX_RESIZE_HEIGHT` | `10000` | largest accepted height |
//! | `MAX_RESIZE_RESOLUTION` | width·height | largest accepted pixel area |
//! | `TRANSFORM_MAX_CONCURRENT` | `min(2·CPU, 32)` | pipeline slots |
//!
//! The header timeout is enforced by the HTTP/1 connection builder, which
//! restarts the timer whenever it waits for the next request on a
//! keep-alive connection, so the same knob bounds idle connections. The
//! write timeout is a response deadline applied as a request layer.

use std::time::Duration;

use thumbforge_core::ParserLimits;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub read_header_timeout: Duration,
    pub write_timeout: Duration,
    pub max_header_bytes: usize,
    pub storage_config_path: String,
    pub signature_secret: String,
    pub parser_limits: ParserLimits,
    pub max_concurrent_transforms: usize,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let max_width = env_u32("MAX_RESIZE_WIDTH", 10_000);
        let max_height = env_u32("MAX_RESIZE_HEIGHT", 10_000);
        let max_resolution = env_u64(
            "MAX_RESIZE_RESOLUTION",
            max_width as u64 * max_height as u64,
        );

        Self {
            port: env_u32("PORT", 8080) as u16,
            read_header_timeout: env_duration_secs("HTTP_READ_HEADER_TIMEOUT_SECONDS", 5),
            write_timeout: env_duration_secs("HTTP_WRITE_TIMEOUT_SECONDS", 30),
            max_header_bytes: env_u64("HTTP_MAX_HEADER_BYTES", 1 << 20) as usize,
            storage_config_path: env_string("STORAGE_CONFIG_PATH", "./storage.json"),
            signature_secret: env_string("SIGNATURE_SECRET", ""),
            parser_limits: ParserLimits {
                max_width,
                max_height,
                max_resolution,
            },
            max_concurrent_transforms: transform_slots(),
        }
    }
}

/// Default transformer concurrency: 2x the CPU count for mixed I/O and CPU
/// work, capped at 32 to bound peak pixel-buffer memory. Overridable via
/// `TRANSFORM_MAX_CONCURRENT`.
pub fn transform_slots() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let default = (cpus * 2).min(32);
    match std::env::var("TRANSFORM_MAX_CONCURRENT") {
        Ok(value) => match value.parse::<usize>() {
            Ok(n) if n > 0 => {
                tracing::info!(slots = n, "Using TRANSFORM_MAX_CONCURRENT override");
                n
            }
            _ => {
                tracing::warn!(value = %value, "Ignoring TRANSFORM_MAX_CONCURRENT (must be a positive integer)");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_u64(key, default_secs))
}
