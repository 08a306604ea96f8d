use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{post, put};
use axum::{Json, Router};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dog_upload::{
    HttpBackend, HttpBackendConfig, HttpTransport, UploadConfig, UploadError, UploadOrchestrator,
    UploadOutcome, UploadState,
};

/// In-process stand-in for the coordination service and the bucket
#[derive(Default)]
struct FakeStorage {
    base_url: String,
    reject_complete: bool,
    /// Part answered with this status instead of 200
    reject_part: Option<(u32, StatusCode)>,
    /// Part answered without an ETag header
    omit_etag_for: Option<u32>,
    initiated: Option<Value>,
    targets_requested: Option<Value>,
    parts: BTreeMap<u32, Bytes>,
    completed: Option<Value>,
    aborted: Option<Value>,
}

type Shared = Arc<Mutex<FakeStorage>>;

async fn create_multipart(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    state.lock().initiated = Some(body);
    Json(json!({ "uploadId": "mpu-1", "key": "uploads/clip.bin", "bucket": "media" }))
}

async fn create_presigned_urls(
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut storage = state.lock();
    let parts = body["parts"].as_u64().unwrap_or_default();
    let urls: Vec<Value> = (1..=parts)
        .map(|n| json!({ "partNumber": n, "url": format!("{}/parts/{}", storage.base_url, n) }))
        .collect();
    storage.targets_requested = Some(body);
    Json(json!({ "presignedUrls": urls }))
}

async fn put_part(
    State(state): State<Shared>,
    Path(n): Path<u32>,
    body: Bytes,
) -> impl IntoResponse {
    let mut storage = state.lock();
    let mut headers = HeaderMap::new();

    if let Some((part, status)) = storage.reject_part {
        if part == n {
            return (status, headers);
        }
    }
    storage.parts.insert(n, body);
    if storage.omit_etag_for != Some(n) {
        headers.insert(header::ETAG, format!("\"etag-{}\"", n).parse().unwrap());
    }
    (StatusCode::OK, headers)
}

async fn complete_multipart(
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut storage = state.lock();
    storage.completed = Some(body);
    if storage.reject_complete {
        let error = json!({ "error": "One or more parts could not be found" });
        return (StatusCode::BAD_REQUEST, Json(error));
    }
    let done = json!({
        "message": "Upload completed",
        "location": "https://media.example/uploads/clip.bin"
    });
    (StatusCode::OK, Json(done))
}

async fn abort_multipart(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    state.lock().aborted = Some(body);
    Json(json!({ "message": "Upload aborted" }))
}

async fn start_server(storage: FakeStorage) -> (String, Shared) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let state: Shared = Arc::new(Mutex::new(FakeStorage {
        base_url: base_url.clone(),
        ..storage
    }));

    let app = Router::new()
        .route("/create-multipart", post(create_multipart))
        .route("/create-presigned-urls", post(create_presigned_urls))
        .route("/parts/{n}", put(put_part))
        .route("/complete-multipart", post(complete_multipart))
        .route("/abort-multipart", post(abort_multipart))
        .with_state(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base_url, state)
}

fn orchestrator_for(backend_config: HttpBackendConfig, config: UploadConfig) -> UploadOrchestrator {
    let backend = HttpBackend::new(backend_config.with_timeout(Duration::from_secs(5))).unwrap();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    UploadOrchestrator::new(backend, HttpTransport::with_client(client), config)
}

fn upload_config() -> UploadConfig {
    UploadConfig::default()
        .with_min_part_size(1)
        .with_chunk_size(100 * 1024)
        .with_max_concurrency(3)
}

fn http_orchestrator(base_url: &str) -> UploadOrchestrator {
    orchestrator_for(HttpBackendConfig::new(base_url), upload_config())
}

fn write_file(dir: &tempfile::TempDir, len: usize) -> (std::path::PathBuf, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
    let path = dir.path().join("clip.bin");
    std::fs::write(&path, &data).unwrap();
    (path, data)
}

#[tokio::test]
async fn test_file_is_uploaded_end_to_end_over_http() {
    let (base_url, state) = start_server(FakeStorage::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let (path, data) = write_file(&dir, 250 * 1024);

    let orchestrator = http_orchestrator(&base_url);
    let outcome = orchestrator.upload_file(&path, "video/mp4").await;

    let receipt = tokio_test::assert_ok!(outcome.into_result());
    assert_eq!(receipt.parts, 3);
    assert_eq!(receipt.key, "uploads/clip.bin");
    assert_eq!(
        receipt.location.as_deref(),
        Some("https://media.example/uploads/clip.bin")
    );
    assert_eq!(receipt.message.as_deref(), Some("Upload completed"));

    let storage = state.lock();
    assert_eq!(
        storage.initiated,
        Some(json!({ "fileName": "clip.bin", "fileType": "video/mp4", "fileSize": 250 * 1024 }))
    );
    assert_eq!(
        storage.targets_requested,
        Some(json!({ "uploadId": "mpu-1", "key": "uploads/clip.bin", "parts": 3 }))
    );

    let reassembled: Vec<u8> = storage.parts.values().flat_map(|b| b.iter().copied()).collect();
    assert_eq!(reassembled, data);

    assert_eq!(
        storage.completed,
        Some(json!({
            "uploadId": "mpu-1",
            "key": "uploads/clip.bin",
            "parts": [
                { "ETag": "\"etag-1\"", "PartNumber": 1 },
                { "ETag": "\"etag-2\"", "PartNumber": 2 },
                { "ETag": "\"etag-3\"", "PartNumber": 3 }
            ]
        }))
    );
    assert_eq!(orchestrator.snapshot().overall_percent, 100);
}

#[tokio::test]
async fn test_forbidden_part_fails_the_upload_without_finalize() {
    let (base_url, state) = start_server(FakeStorage {
        reject_part: Some((2, StatusCode::FORBIDDEN)),
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, 250 * 1024);

    let outcome = http_orchestrator(&base_url).upload_file(&path, "video/mp4").await;

    match outcome {
        UploadOutcome::Failed {
            stage: UploadState::UploadingParts,
            error: UploadError::PartUploadFailed { part_number, cause },
        } => {
            assert_eq!(part_number, 2);
            assert!(cause.contains("403"), "{}", cause);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(state.lock().completed.is_none());
}

#[tokio::test]
async fn test_part_without_etag_fails_the_upload_without_finalize() {
    let (base_url, state) = start_server(FakeStorage {
        omit_etag_for: Some(3),
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, 250 * 1024);

    let outcome = http_orchestrator(&base_url).upload_file(&path, "video/mp4").await;

    match outcome {
        UploadOutcome::Failed {
            stage: UploadState::UploadingParts,
            error: UploadError::PartUploadFailed { part_number, cause },
        } => {
            assert_eq!(part_number, 3);
            assert!(cause.contains("ETag"), "{}", cause);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(state.lock().completed.is_none());
}

#[tokio::test]
async fn test_failed_part_posts_to_the_configured_abort_path() {
    let (base_url, state) = start_server(FakeStorage {
        reject_part: Some((1, StatusCode::FORBIDDEN)),
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, 150 * 1024);

    let backend_config = HttpBackendConfig::new(&base_url).with_abort_path("/abort-multipart");
    let orchestrator = orchestrator_for(backend_config, upload_config().abort_on_failure());
    let outcome = orchestrator.upload_file(&path, "video/mp4").await;

    assert!(matches!(
        outcome.error(),
        Some(UploadError::PartUploadFailed { part_number: 1, .. })
    ));
    let storage = state.lock();
    assert!(storage.completed.is_none());
    assert_eq!(
        storage.aborted,
        Some(json!({ "uploadId": "mpu-1", "key": "uploads/clip.bin" }))
    );
}

#[tokio::test]
async fn test_abort_is_skipped_without_an_abort_path() {
    let (base_url, state) = start_server(FakeStorage {
        reject_part: Some((1, StatusCode::FORBIDDEN)),
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, 1024);

    let orchestrator =
        orchestrator_for(HttpBackendConfig::new(&base_url), upload_config().abort_on_failure());
    let outcome = orchestrator.upload_file(&path, "video/mp4").await;

    assert!(matches!(
        outcome.error(),
        Some(UploadError::PartUploadFailed { part_number: 1, .. })
    ));
    assert!(state.lock().aborted.is_none());
}

#[tokio::test]
async fn test_finalize_error_body_becomes_the_cause() {
    let (base_url, _state) = start_server(FakeStorage {
        reject_complete: true,
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, 1024);

    let outcome = http_orchestrator(&base_url)
        .upload_file(&path, "application/octet-stream")
        .await;

    match outcome {
        UploadOutcome::Failed {
            stage: UploadState::Finalizing,
            error: UploadError::FinalizeFailed { cause },
        } => assert!(cause.contains("One or more parts could not be found"), "{}", cause),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_backend_fails_at_initiate() {
    // bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_file(&dir, 1024);

    let outcome = http_orchestrator(&base_url)
        .upload_file(&path, "application/octet-stream")
        .await;

    assert!(matches!(
        outcome,
        UploadOutcome::Failed {
            stage: UploadState::Initiating,
            error: UploadError::InitiateFailed { .. }
        }
    ));
}

#[tokio::test]
async fn test_missing_file_is_invalid_input() {
    let orchestrator = http_orchestrator("http://127.0.0.1:9");
    let outcome = orchestrator
        .upload_file("/definitely/not/here.bin", "application/octet-stream")
        .await;

    assert!(matches!(outcome.error(), Some(UploadError::InvalidInput { .. })));
}
