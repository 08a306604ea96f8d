use thiserror::Error;

use crate::PartStatus;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors that can occur during a multipart upload attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Failed to initiate multipart upload: {cause}")]
    InitiateFailed { cause: String },

    #[error("Failed to get upload targets: {cause}")]
    TargetsFailed { cause: String },

    #[error("Upload targets incomplete: {message}")]
    TargetsIncomplete { message: String },

    #[error("Failed to upload part {part_number}: {cause}")]
    TransferFailed { part_number: u32, cause: String },

    #[error("Part upload failed for part {part_number}: {cause}")]
    PartUploadFailed { part_number: u32, cause: String },

    #[error("Failed to complete multipart upload: {cause}")]
    FinalizeFailed { cause: String },

    #[error("Upload attempt was reset")]
    Cancelled,

    #[error("Illegal transition for part {part_number}: {from:?} -> {to:?}")]
    IllegalTransition {
        part_number: u32,
        from: PartStatus,
        to: PartStatus,
    },

    #[error("Operation not supported by this backend")]
    Unsupported,
}

impl UploadError {
    /// Create an invalid input error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an initiate failure
    pub fn initiate_failed<S: Into<String>>(cause: S) -> Self {
        Self::InitiateFailed {
            cause: cause.into(),
        }
    }

    /// Create a targets request failure
    pub fn targets_failed<S: Into<String>>(cause: S) -> Self {
        Self::TargetsFailed {
            cause: cause.into(),
        }
    }

    /// Create a targets protocol violation
    pub fn targets_incomplete<S: Into<String>>(message: S) -> Self {
        Self::TargetsIncomplete {
            message: message.into(),
        }
    }

    /// Create a single-part transfer failure
    pub fn transfer_failed<S: Into<String>>(part_number: u32, cause: S) -> Self {
        Self::TransferFailed {
            part_number,
            cause: cause.into(),
        }
    }

    /// Create a finalize failure
    pub fn finalize_failed<S: Into<String>>(cause: S) -> Self {
        Self::FinalizeFailed {
            cause: cause.into(),
        }
    }

    /// Lift a per-part failure into the aggregate failure surfaced by the barrier join.
    ///
    /// Any error that is not already tied to a part keeps its message as the cause.
    pub fn into_part_upload_failed(self, part_number: u32) -> Self {
        match self {
            Self::TransferFailed { part_number, cause } => {
                Self::PartUploadFailed { part_number, cause }
            }
            Self::PartUploadFailed { .. } => self,
            other => Self::PartUploadFailed {
                part_number,
                cause: other.to_string(),
            },
        }
    }

    /// Errors that already name the coordination stage they came from
    pub fn is_stage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. }
                | Self::InitiateFailed { .. }
                | Self::TargetsFailed { .. }
                | Self::TargetsIncomplete { .. }
                | Self::FinalizeFailed { .. }
                | Self::Cancelled
        )
    }

    /// Part number the error is attributed to, if any
    pub fn part_number(&self) -> Option<u32> {
        match self {
            Self::TransferFailed { part_number, .. }
            | Self::PartUploadFailed { part_number, .. }
            | Self::IllegalTransition { part_number, .. } => Some(*part_number),
            _ => None,
        }
    }
}
