use serde::{Deserialize, Serialize};
use std::ops::Range;
use uuid::Uuid;

/// Backend-issued identifier for a multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(pub String);

impl UploadId {
    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UploadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-side identifier for one upload attempt, used to correlate logs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub String);

impl AttemptId {
    /// Generate a new random attempt ID
    pub fn new() -> Self {
        Self(format!("att_{}", Uuid::new_v4().simple()))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the caller knows about the file being uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub content_type: String,
    pub size: u64,
}

impl FileMeta {
    pub fn new<S: Into<String>>(name: S, size: u64) -> Self {
        Self {
            name: name.into(),
            content_type: "application/octet-stream".to_string(),
            size,
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// Identifiers returned by the backend when an upload is initiated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: UploadId,
    pub key: String,
    pub bucket: String,
}

/// One contiguous slice of the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartDescriptor {
    /// 1-based, dense
    pub part_number: u32,
    /// Inclusive start offset
    pub start: u64,
    /// Exclusive end offset
    pub end: u64,
    pub size: u64,
}

impl PartDescriptor {
    /// Half-open byte range `[start, end)`
    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }
}

/// Destination issued by the backend for exactly one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub part_number: u32,
    pub destination: String,
}

/// Status of a single part within an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

/// Progress of a single part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartProgressRecord {
    pub part_number: u32,
    pub status: PartStatus,
    /// 0..=100
    pub percent: u8,
    pub size: u64,
}

/// Opaque token returned for a successfully transferred part (an ETag for S3)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionToken {
    pub part_number: u32,
    pub token: String,
}

/// Where an attempt currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadState {
    Idle,
    Initiating,
    PlanningParts,
    RequestingTargets,
    UploadingParts,
    Finalizing,
    Succeeded,
    Failed,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initiating => "initiating",
            Self::PlanningParts => "planning_parts",
            Self::RequestingTargets => "requesting_targets",
            Self::UploadingParts => "uploading_parts",
            Self::Finalizing => "finalizing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
