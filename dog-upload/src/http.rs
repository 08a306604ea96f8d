//! HTTP implementations of the backend and transport seams.
//!
//! The coordination service speaks camelCase JSON on three endpoints; parts
//! are PUT to presigned URLs and acknowledged with an `ETag` header.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, ETAG};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::env_var;
use crate::{
    CompletedUpload, CompletionToken, FileMeta, PartAck, PartTransport, ProgressReporter,
    UploadBackend, UploadError, UploadId, UploadResult, UploadSession, UploadTarget,
};

/// Size of the slices a part body is streamed in; progress is reported per slice
pub const STREAM_SLICE: usize = 64 * 1024;

/// Where the coordination endpoints live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub initiate_path: String,
    pub targets_path: String,
    pub complete_path: String,
    /// Most deployments have no abort endpoint
    pub abort_path: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            initiate_path: "/create-multipart".to_string(),
            targets_path: "/create-presigned-urls".to_string(),
            complete_path: "/complete-multipart".to_string(),
            abort_path: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpBackendConfig {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Read `DOG_UPLOAD__BASE_URL`, `DOG_UPLOAD__INITIATE_PATH`, `DOG_UPLOAD__TARGETS_PATH`,
    /// `DOG_UPLOAD__COMPLETE_PATH`, `DOG_UPLOAD__ABORT_PATH` and `DOG_UPLOAD__HTTP_TIMEOUT_SECS`
    pub fn from_env() -> UploadResult<Self> {
        let mut config = Self::default();
        if let Some(url) = env_var("BASE_URL") {
            config.base_url = url;
        }
        if let Some(path) = env_var("INITIATE_PATH") {
            config.initiate_path = path;
        }
        if let Some(path) = env_var("TARGETS_PATH") {
            config.targets_path = path;
        }
        if let Some(path) = env_var("COMPLETE_PATH") {
            config.complete_path = path;
        }
        config.abort_path = env_var("ABORT_PATH");
        if let Some(secs) = env_var("HTTP_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| UploadError::invalid(format!("Invalid HTTP_TIMEOUT_SECS: {}", secs)))?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_abort_path<S: Into<String>>(mut self, path: S) -> Self {
        self.abort_path = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest<'a> {
    file_name: &'a str,
    file_type: &'a str,
    file_size: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    upload_id: String,
    key: String,
    bucket: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TargetsRequest<'a> {
    upload_id: &'a str,
    key: &'a str,
    parts: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetsResponse {
    presigned_urls: Vec<PresignedUrl>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresignedUrl {
    part_number: u32,
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    upload_id: &'a str,
    key: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    upload_id: &'a str,
    key: &'a str,
    parts: Vec<CompletedPart<'a>>,
}

#[derive(Serialize)]
struct CompletedPart<'a> {
    #[serde(rename = "ETag")]
    etag: &'a str,
    #[serde(rename = "PartNumber")]
    part_number: u32,
}

#[derive(Deserialize)]
struct CompleteResponse {
    message: Option<String>,
    location: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Coordination backend reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> UploadResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UploadError::invalid(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> UploadResult<Self> {
        Self::new(HttpBackendConfig::from_env()?)
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    /// POST a JSON body and decode the JSON reply; failures come back as plain causes
    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, String>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = self.config.url(path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("Request to {} failed: {}", url, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| format!("Failed to read response from {}: {}", url, e))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            return Err(format!("{} returned {}: {}", url, status.as_u16(), detail));
        }

        serde_json::from_str(&text).map_err(|e| format!("Unexpected response from {}: {}", url, e))
    }
}

#[async_trait]
impl UploadBackend for HttpBackend {
    async fn initiate(&self, file: &FileMeta) -> UploadResult<UploadSession> {
        let request = InitiateRequest {
            file_name: &file.name,
            file_type: &file.content_type,
            file_size: file.size,
        };
        let response: InitiateResponse = self
            .post(&self.config.initiate_path, &request)
            .await
            .map_err(UploadError::initiate_failed)?;

        Ok(UploadSession {
            upload_id: UploadId::from_string(response.upload_id),
            key: response.key,
            bucket: response.bucket,
        })
    }

    async fn request_targets(
        &self,
        session: &UploadSession,
        parts: u32,
    ) -> UploadResult<Vec<UploadTarget>> {
        let request = TargetsRequest {
            upload_id: session.upload_id.as_str(),
            key: &session.key,
            parts,
        };
        let response: TargetsResponse = self
            .post(&self.config.targets_path, &request)
            .await
            .map_err(UploadError::targets_failed)?;

        Ok(response
            .presigned_urls
            .into_iter()
            .map(|p| UploadTarget {
                part_number: p.part_number,
                destination: p.url,
            })
            .collect())
    }

    async fn complete(
        &self,
        session: &UploadSession,
        tokens: &[CompletionToken],
    ) -> UploadResult<CompletedUpload> {
        let request = CompleteRequest {
            upload_id: session.upload_id.as_str(),
            key: &session.key,
            parts: tokens
                .iter()
                .map(|t| CompletedPart {
                    etag: &t.token,
                    part_number: t.part_number,
                })
                .collect(),
        };
        let response: CompleteResponse = self
            .post(&self.config.complete_path, &request)
            .await
            .map_err(UploadError::finalize_failed)?;

        Ok(CompletedUpload {
            message: response.message,
            location: response.location,
        })
    }

    async fn abort(&self, session: &UploadSession) -> UploadResult<()> {
        let Some(path) = self.config.abort_path.as_deref() else {
            return Err(UploadError::Unsupported);
        };
        let request = SessionRequest {
            upload_id: session.upload_id.as_str(),
            key: &session.key,
        };
        self.post::<_, serde_json::Value>(path, &request)
            .await
            .map(|_| ())
            .map_err(UploadError::invalid)
    }
}

/// PUTs part bodies to presigned URLs
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PartTransport for HttpTransport {
    async fn put_part(
        &self,
        destination: &str,
        body: Bytes,
        progress: Arc<ProgressReporter>,
    ) -> UploadResult<PartAck> {
        let part_number = progress.part_number();
        let length = body.len();

        let stream = async_stream::stream! {
            let mut offset = 0;
            while offset < body.len() {
                let end = (offset + STREAM_SLICE).min(body.len());
                let slice = body.slice(offset..end);
                offset = end;
                progress.bytes_sent(slice.len() as u64);
                yield Ok::<Bytes, std::io::Error>(slice);
            }
        };

        let response = self
            .client
            .put(destination)
            .header(CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|e| UploadError::transfer_failed(part_number, e.to_string()))?;

        let status = response.status().as_u16();
        let token = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        debug!("PUT part {} answered {} (etag {:?})", part_number, status, token);
        Ok(PartAck::new(status, token))
    }
}
