use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{
    CompletionToken, PartDescriptor, PartSource, PartTransport, ProgressReporter, UploadError,
    UploadResult, UploadTarget,
};

/// Moves one part from the source to its upload target
#[derive(Clone)]
pub struct PartUploader {
    transport: Arc<dyn PartTransport>,
    timeout: Duration,
}

impl PartUploader {
    pub fn new(transport: Arc<dyn PartTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Transfer a single part and return its completion token.
    ///
    /// One attempt only. The reporter is closed before this returns, whatever
    /// the outcome, so no progress arrives after the result.
    #[instrument(
        skip(self, target, source, progress),
        fields(part_number = part.part_number, size = part.size)
    )]
    pub async fn upload(
        &self,
        part: &PartDescriptor,
        target: &UploadTarget,
        source: &dyn PartSource,
        progress: Arc<ProgressReporter>,
    ) -> UploadResult<CompletionToken> {
        let result = self.transfer(part, target, source, progress.clone()).await;
        progress.close();
        result
    }

    async fn transfer(
        &self,
        part: &PartDescriptor,
        target: &UploadTarget,
        source: &dyn PartSource,
        progress: Arc<ProgressReporter>,
    ) -> UploadResult<CompletionToken> {
        let part_number = part.part_number;
        if target.part_number != part_number {
            return Err(UploadError::transfer_failed(
                part_number,
                format!("Target is for part {}", target.part_number),
            ));
        }

        let body = source
            .read_range(part.start, part.size)
            .await
            .map_err(|e| UploadError::transfer_failed(part_number, e.to_string()))?;
        if body.len() as u64 != part.size {
            return Err(UploadError::transfer_failed(
                part_number,
                format!("Read {} bytes, expected {}", body.len(), part.size),
            ));
        }

        let ack = tokio::time::timeout(
            self.timeout,
            self.transport.put_part(&target.destination, body, progress),
        )
        .await
        .map_err(|_| {
            UploadError::transfer_failed(part_number, format!("Timed out after {:?}", self.timeout))
        })?
        .map_err(|e| match e {
            UploadError::TransferFailed { .. } => e,
            other => UploadError::transfer_failed(part_number, other.to_string()),
        })?;

        if !ack.is_success() {
            return Err(UploadError::transfer_failed(
                part_number,
                format!("Destination responded with status {}", ack.status),
            ));
        }

        let token = ack
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                UploadError::transfer_failed(part_number, "Acknowledgement carried no ETag")
            })?;

        debug!("Part {} acknowledged with token {}", part_number, token);
        Ok(CompletionToken { part_number, token })
    }
}
