//! # dog-upload: Client-side multipart upload orchestration
//!
//! `dog-upload` pushes one large file to S3-compatible storage as independently
//! uploaded parts. The storage backend hands out one presigned target per part;
//! the client uploads every part concurrently and asks the backend to assemble
//! the object once all of them succeeded.
//!
//! ## Key Features
//!
//! - **Deterministic planning**: fixed-size contiguous parts, numbered from 1
//! - **Concurrent parts**: bounded worker pool, first failure stops new launches
//! - **Live progress**: per-part and overall percentages over a `watch` channel
//! - **Ordered finalize**: completion tokens always sorted by part number
//! - **Backend agnostic**: plug any coordination service behind [`UploadBackend`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_upload::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! // 1. Point the orchestrator at the coordination service
//! let backend = HttpBackend::new(HttpBackendConfig::new("http://localhost:3001"))?;
//! let orchestrator =
//!     UploadOrchestrator::new(backend, HttpTransport::new(), UploadConfig::default());
//!
//! // 2. Follow progress from anywhere
//! let mut progress = orchestrator.progress();
//! tokio::spawn(async move {
//!     while progress.changed().await.is_ok() {
//!         let snapshot = progress.borrow().clone();
//!         println!("{} {}%", snapshot.state, snapshot.overall_percent);
//!     }
//! });
//!
//! // 3. Upload
//! let receipt = orchestrator
//!     .upload_file("video.mp4", "video/mp4")
//!     .await
//!     .into_result()?;
//! println!("stored at {:?}", receipt.location);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  UploadOrchestrator  │  ← state machine, worker pool, progress owner
//! ├──────────┬───────────┤
//! │ Backend  │ Uploader  │  ← coordination calls │ one part at a time
//! ├──────────┼───────────┤
//! │   HTTP   │ Transport │  ← JSON endpoints     │ presigned PUT
//! └──────────┴───────────┘
//! ```
//!
//! Part tasks never touch shared progress state: they send [`ProgressEvent`]s
//! to the orchestrator, which applies them to its [`ProgressAggregator`] and
//! publishes a fresh [`ProgressSnapshot`].

mod backend;
mod config;
mod error;
mod http;
mod orchestrator;
mod part;
mod planner;
mod progress;
mod receipt;
mod source;
mod transport;
mod types;

// Re-export main types for clean API
pub use backend::{CompletedUpload, UploadBackend};
pub use config::{UploadConfig, DEFAULT_CHUNK_SIZE, ENV_PREFIX, MIN_PART_SIZE};
pub use error::{UploadError, UploadResult};
pub use http::{HttpBackend, HttpBackendConfig, HttpTransport, STREAM_SLICE};
pub use orchestrator::UploadOrchestrator;
pub use part::PartUploader;
pub use planner::ChunkPlanner;
pub use progress::{PartCounts, ProgressAggregator, ProgressEvent, ProgressSnapshot};
pub use receipt::{UploadOutcome, UploadReceipt};
pub use source::{FileSource, MemorySource, PartSource};
pub use transport::{PartAck, PartTransport, ProgressReporter};
pub use types::{
    AttemptId, CompletionToken, FileMeta, PartDescriptor, PartProgressRecord, PartStatus,
    UploadId, UploadSession, UploadState, UploadTarget,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        FileMeta, HttpBackend, HttpBackendConfig, HttpTransport, ProgressSnapshot, UploadBackend,
        UploadConfig, UploadError, UploadOrchestrator, UploadOutcome, UploadReceipt, UploadResult,
        UploadState,
    };
}
