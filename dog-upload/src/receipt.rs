use serde::{Deserialize, Serialize};

use crate::{AttemptId, UploadError, UploadId, UploadSession, UploadState};

/// Receipt returned after the backend assembled the uploaded object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub attempt_id: AttemptId,
    pub upload_id: UploadId,
    pub key: String,
    pub bucket: String,
    pub size_bytes: u64,
    pub parts: u32,
    pub location: Option<String>,
    pub message: Option<String>,
    pub completed_at: i64,
}

impl UploadReceipt {
    /// Create a new upload receipt
    pub fn new(attempt_id: AttemptId, session: UploadSession, size_bytes: u64, parts: u32) -> Self {
        Self {
            attempt_id,
            upload_id: session.upload_id,
            key: session.key,
            bucket: session.bucket,
            size_bytes,
            parts,
            location: None,
            message: None,
            completed_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Set final location
    pub fn with_location<S: Into<String>>(mut self, location: S) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set backend message
    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Terminal value of one upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Succeeded(UploadReceipt),
    Failed {
        /// State the attempt was in when it failed
        stage: UploadState,
        error: UploadError,
    },
}

impl UploadOutcome {
    pub fn failed(stage: UploadState, error: UploadError) -> Self {
        Self::Failed { stage, error }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn receipt(&self) -> Option<&UploadReceipt> {
        match self {
            Self::Succeeded(receipt) => Some(receipt),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&UploadError> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed { error, .. } => Some(error),
        }
    }

    /// Convert into a plain `Result`
    pub fn into_result(self) -> Result<UploadReceipt, UploadError> {
        match self {
            Self::Succeeded(receipt) => Ok(receipt),
            Self::Failed { error, .. } => Err(error),
        }
    }
}
