//! End-to-end tests against the full router: parsing, signatures, the
//! transform pipeline, coalescing, and the cache lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{GenericImageView, RgbImage};
use object_store::local::LocalFileSystem;
use object_store::ObjectStore;
use tempfile::TempDir;
use tower::ServiceExt;

use thumbforge_core::{ParserLimits, Signer};
use thumbforge_server::{create_router, AppState};
use thumbforge_storage::{CacheSection, CachedStorage};
use thumbforge_transform::{ImageTransformer, Rendered, Transform, TransformError};

struct TestApp {
    router: Router,
    storage: Arc<CachedStorage>,
    backend_root: TempDir,
    _cache_root: TempDir,
}

const FULL_CACHE: &str = r#"{
    "sources": {
        "memory": { "enabled": true, "max_size_mb": 32, "ttl_seconds": 60 },
        "disk": { "enabled": true, "dir": "{CACHE}/sources", "ttl_seconds": 60 }
    },
    "thumbnails": {
        "memory": { "enabled": true, "max_size_mb": 32, "ttl_seconds": 60 },
        "disk": { "enabled": true, "dir": "{CACHE}/thumbs", "ttl_seconds": 60 }
    }
}"#;

async fn setup(secret: &str, cache_json: Option<&str>, transformer: Arc<dyn Transform>) -> TestApp {
    let backend_root = TempDir::new().unwrap();
    let cache_root = TempDir::new().unwrap();

    let section: Option<CacheSection> = cache_json.map(|json| {
        let json = json.replace("{CACHE}", cache_root.path().to_str().unwrap());
        serde_json::from_str(&json).unwrap()
    });

    let backend: Arc<dyn ObjectStore> =
        Arc::new(LocalFileSystem::new_with_prefix(backend_root.path()).unwrap());
    let storage = Arc::new(
        CachedStorage::from_config(backend, section.as_ref())
            .await
            .unwrap(),
    );

    let state = AppState::new(
        Arc::clone(&storage),
        transformer,
        secret,
        ParserLimits::default(),
        8,
    );

    TestApp {
        router: create_router(state),
        storage,
        backend_root,
        _cache_root: cache_root,
    }
}

fn write_source(app: &TestApp, key: &str, data: &[u8]) {
    let path = app.backend_root.path().join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

fn jpeg_image(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut out = Vec::new();
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, 90))
        .unwrap();
    out
}

fn png_image(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut out = Vec::new();
    img.write_with_encoder(PngEncoder::new(&mut out)).unwrap();
    out
}

async fn get(router: &Router, path: &str) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

/// Counts pipeline invocations; used to observe coalescing.
struct CountingTransformer {
    inner: ImageTransformer,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingTransformer {
    fn new(delay: Duration) -> Self {
        Self {
            inner: ImageTransformer::new(),
            calls: AtomicUsize::new(0),
            delay,
        }
    }
}

impl Transform for CountingTransformer {
    fn apply(
        &self,
        source: &[u8],
        plan: &thumbforge_core::RequestPlan,
    ) -> Result<Rendered, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.inner.apply(source, plan)
    }
}

/// Produces fixed-size payloads regardless of input; used to drive the
/// disk cache with predictable entry sizes.
struct FixedSizeTransformer {
    calls: AtomicUsize,
    size: usize,
}

impl Transform for FixedSizeTransformer {
    fn apply(
        &self,
        _source: &[u8],
        _plan: &thumbforge_core::RequestPlan,
    ) -> Result<Rendered, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Rendered {
            bytes: Bytes::from(vec![0xAB; self.size]),
            content_type: "image/jpeg",
        })
    }
}

#[tokio::test]
async fn test_health() {
    let app = setup("", None, Arc::new(ImageTransformer::new())).await;
    let (status, _, body) = get(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"OK"));
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let app = setup("", None, Arc::new(ImageTransformer::new())).await;
    let (status, _, _) = get(&app.router, "/other/stuff").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsigned_cover_default() {
    // A 200x150 source requested at /thumbs/100x100 yields an exact
    // 100x100 jpeg, center-cropped.
    let app = setup("", Some(FULL_CACHE), Arc::new(ImageTransformer::new())).await;
    write_source(&app, "a/b.jpg", &jpeg_image(200, 150, [200, 40, 40]));

    let (status, headers, body) = get(&app.router, "/thumbs/100x100/a/b.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "image/jpeg");
    assert_eq!(headers["x-cache"], "MISS");
    assert_eq!(headers["cache-control"], "public, max-age=31536000");
    assert_eq!(
        headers["content-length"].to_str().unwrap(),
        body.len().to_string()
    );

    let img = image::load_from_memory(&body).unwrap();
    assert_eq!(img.dimensions(), (100, 100));
    app.storage.close().await;
}

#[tokio::test]
async fn test_second_request_hits_cache() {
    let app = setup("", Some(FULL_CACHE), Arc::new(ImageTransformer::new())).await;
    write_source(&app, "a.jpg", &jpeg_image(120, 90, [10, 10, 200]));

    let (_, first_headers, first_body) = get(&app.router, "/thumbs/50x50/a.jpg").await;
    assert_eq!(first_headers["x-cache"], "MISS");

    let (status, headers, body) = get(&app.router, "/thumbs/50x50/a.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-cache"], "HIT");
    assert_eq!(body, first_body, "hit must serve identical bytes");
    app.storage.close().await;
}

#[tokio::test]
async fn test_signed_fill_with_black_bars() {
    // Signed URL: a 400x100 source into 200x100 fill lands centered with
    // black bars above and below.
    let app = setup("k", Some(FULL_CACHE), Arc::new(ImageTransformer::new())).await;
    write_source(&app, "img.jpg", &png_image(400, 100, [220, 20, 20]));

    let payload = "/200x100/filters:format(png);fit(fill,black)/img.jpg";
    let sig = Signer::new("k").sign(payload);
    let (status, headers, body) =
        get(&app.router, &format!("/thumbs/{sig}{payload}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "image/png");

    let img = image::load_from_memory(&body).unwrap();
    assert_eq!(img.dimensions(), (200, 100));
    let bar = img.get_pixel(100, 5);
    assert_eq!(bar.0[..3], [0, 0, 0], "expected a black bar above the image");
    let center = img.get_pixel(100, 50);
    assert!(center.0[0] > 150, "expected source color at the center");
    app.storage.close().await;
}

#[tokio::test]
async fn test_signature_mismatch_is_404() {
    // A wrong signature is a 404, not a 403.
    let app = setup("k", Some(FULL_CACHE), Arc::new(ImageTransformer::new())).await;
    write_source(&app, "img.jpg", &png_image(40, 40, [1, 2, 3]));

    let (status, _, body) = get(
        &app.router,
        "/thumbs/deadbeefdeadbeef/200x100/filters:format(png);fit(fill,black)/img.jpg",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("Signature validation failed"), "body: {body}");
    app.storage.close().await;
}

#[tokio::test]
async fn test_missing_signature_rejected_when_required() {
    let app = setup("k", Some(FULL_CACHE), Arc::new(ImageTransformer::new())).await;
    write_source(&app, "img.jpg", &png_image(40, 40, [1, 2, 3]));
    let (status, _, _) = get(&app.router, "/thumbs/100x100/img.jpg").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    app.storage.close().await;
}

#[tokio::test]
async fn test_concurrent_requests_coalesce() {
    // Two simultaneous cold requests for the same URL: one transformer
    // invocation, identical bytes on both responses.
    let transformer = Arc::new(CountingTransformer::new(Duration::from_millis(100)));
    let app = setup("", Some(FULL_CACHE), transformer.clone() as Arc<dyn Transform>).await;
    write_source(&app, "big.jpg", &jpeg_image(400, 400, [90, 90, 90]));

    let (a, b) = tokio::join!(
        get(&app.router, "/thumbs/300x300/big.jpg"),
        get(&app.router, "/thumbs/300x300/big.jpg"),
    );
    assert_eq!(a.0, StatusCode::OK);
    assert_eq!(b.0, StatusCode::OK);
    assert_eq!(a.2, b.2, "both requests must carry identical bytes");
    for headers in [&a.1, &b.1] {
        let x_cache = headers["x-cache"].to_str().unwrap();
        assert!(x_cache == "MISS" || x_cache == "HIT");
    }
    assert_eq!(
        transformer.calls.load(Ordering::SeqCst),
        1,
        "transformer must run exactly once"
    );
    app.storage.close().await;
}

#[tokio::test]
async fn test_disk_cache_cycle_watermark_and_ttl() {
    // 20 distinct 100KB thumbnails against a 1MB disk-only thumbnail
    // cache with a 2s TTL. The watermark keeps usage at or below 95%;
    // after expiry every request reprocesses.
    let transformer = Arc::new(FixedSizeTransformer {
        calls: AtomicUsize::new(0),
        size: 100_000,
    });
    let cache = r#"{
        "thumbnails": {
            "disk": { "enabled": true, "dir": "{CACHE}/thumbs", "ttl_seconds": 2, "max_size_mb": 1 },
            "writer": { "workers": 2, "queue_size": 64 }
        }
    }"#;
    let app = setup("", Some(cache), transformer.clone() as Arc<dyn Transform>).await;
    for i in 0..20 {
        write_source(&app, &format!("img-{i}.jpg"), b"stub");
    }

    for i in 0..20 {
        let (status, _, _) = get(&app.router, &format!("/thumbs/100x100/img-{i}.jpg")).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(transformer.calls.load(Ordering::SeqCst), 20);

    // Wait for the async writes to drain: poll until the disk stats hold
    // still, then check the high watermark (0.95 * 1MB) was enforced.
    let high: u64 = 1024 * 1024 / 100 * 95;
    let mut last = (0usize, 0u64);
    let mut stable = 0;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = app.storage.thumb_disk_stats().unwrap();
        let now = (stats.entries, stats.current_size);
        if now == last && now.0 > 0 {
            stable += 1;
            if stable >= 3 {
                break;
            }
        } else {
            stable = 0;
        }
        last = now;
    }
    let stats = app.storage.thumb_disk_stats().unwrap();
    assert!(stats.entries > 0, "async writes never reached disk");
    assert!(
        stats.current_size <= high,
        "current size {} above high watermark {high}",
        stats.current_size
    );

    // Past the TTL, all 20 URLs are cache misses again and reprocess.
    tokio::time::sleep(Duration::from_secs(3)).await;
    for i in 0..20 {
        let (status, _, _) = get(&app.router, &format!("/thumbs/100x100/img-{i}.jpg")).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(transformer.calls.load(Ordering::SeqCst), 40);
    app.storage.close().await;
}

#[tokio::test]
async fn test_alias_extension_conflict_is_400() {
    let app = setup("", Some(FULL_CACHE), Arc::new(ImageTransformer::new())).await;
    write_source(&app, "img.jpg", &jpeg_image(50, 50, [5, 5, 5]));

    let (status, _, body) = get(
        &app.router,
        "/thumbs/100x100/filters:format(webp)/img.jpg/as/card.png",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("alias"), "body: {body}");
    app.storage.close().await;
}

#[tokio::test]
async fn test_parse_error_is_400() {
    let app = setup("", Some(FULL_CACHE), Arc::new(ImageTransformer::new())).await;
    let (status, _, _) = get(&app.router, "/thumbs/100x100/filters:quality(0)/a.jpg").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = get(&app.router, "/thumbs/notasize/").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    app.storage.close().await;
}

#[tokio::test]
async fn test_missing_source_is_404() {
    let app = setup("", Some(FULL_CACHE), Arc::new(ImageTransformer::new())).await;
    let (status, _, _) = get(&app.router, "/thumbs/100x100/does-not-exist.jpg").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    app.storage.close().await;
}

/// Reports the largest number of concurrently running pipeline applies.
struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Transform for ConcurrencyProbe {
    fn apply(
        &self,
        _source: &[u8],
        _plan: &thumbforge_core::RequestPlan,
    ) -> Result<Rendered, TransformError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(Rendered {
            bytes: Bytes::from_static(b"probe"),
            content_type: "image/jpeg",
        })
    }
}

#[tokio::test]
async fn test_processing_slots_bound_concurrency() {
    // Eight distinct URLs race through a two-slot semaphore; at no point
    // may more than two transforms run at once.
    let probe = Arc::new(ConcurrencyProbe {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let backend_root = TempDir::new().unwrap();
    for i in 0..8 {
        std::fs::write(backend_root.path().join(format!("p{i}.jpg")), b"stub").unwrap();
    }
    let backend: Arc<dyn ObjectStore> =
        Arc::new(LocalFileSystem::new_with_prefix(backend_root.path()).unwrap());
    let storage = Arc::new(CachedStorage::uncached(backend));
    let state = AppState::new(
        Arc::clone(&storage),
        probe.clone() as Arc<dyn Transform>,
        "",
        ParserLimits::default(),
        2,
    );
    let router = create_router(state);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let router = router.clone();
        tasks.push(tokio::spawn(async move {
            get(&router, &format!("/thumbs/10x10/p{i}.jpg")).await.0
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }
    assert!(
        probe.peak.load(Ordering::SeqCst) <= 2,
        "observed {} concurrent transforms with 2 slots",
        probe.peak.load(Ordering::SeqCst)
    );
    storage.close().await;
}

#[tokio::test]
async fn test_uncached_deployment_still_serves() {
    let app = setup("", None, Arc::new(ImageTransformer::new())).await;
    write_source(&app, "a.jpg", &jpeg_image(80, 80, [60, 120, 60]));

    for _ in 0..2 {
        let (status, headers, body) = get(&app.router, "/thumbs/40x40/a.jpg").await;
        assert_eq!(status, StatusCode::OK);
        // Without a thumbnail cache every request is a miss.
        assert_eq!(headers["x-cache"], "MISS");
        let img = image::load_from_memory(&body).unwrap();
        assert_eq!(img.dimensions(), (40, 40));
    }
    app.storage.close().await;
}
