use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{CompletionToken, FileMeta, UploadError, UploadResult, UploadSession, UploadTarget};

/// The coordination endpoints of a multipart-capable storage backend
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// Start a multipart upload for a file
    async fn initiate(&self, file: &FileMeta) -> UploadResult<UploadSession>;

    /// Issue one upload target per part, for parts `1..=parts`
    async fn request_targets(
        &self,
        session: &UploadSession,
        parts: u32,
    ) -> UploadResult<Vec<UploadTarget>>;

    /// Assemble the object from its parts; `tokens` are sorted by part number
    async fn complete(
        &self,
        session: &UploadSession,
        tokens: &[CompletionToken],
    ) -> UploadResult<CompletedUpload>;

    /// Release the parts of an abandoned upload
    async fn abort(&self, _session: &UploadSession) -> UploadResult<()> {
        Err(UploadError::Unsupported)
    }
}

/// What the backend reports after assembling the object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedUpload {
    pub message: Option<String>,
    pub location: Option<String>,
}
