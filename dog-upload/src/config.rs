use std::env;
use std::time::Duration;

use crate::{UploadError, UploadResult};

/// Smallest part most S3-compatible backends accept for non-final parts (5MB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Default chunk size (5MB)
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Prefix for environment overrides, e.g. `DOG_UPLOAD__CHUNK_SIZE=8388608`
pub const ENV_PREFIX: &str = "DOG_UPLOAD__";

/// Configuration for upload attempts
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Size of every part except the last
    pub chunk_size: u64,

    /// Backend minimum for non-final parts; `chunk_size` must not go below it
    pub min_part_size: u64,

    /// Upper bound to protect memory/state
    pub max_parts: u32,

    /// Simultaneous part transfers. `None` launches every part at once.
    pub max_concurrency: Option<usize>,

    /// Timeout for each coordination call (initiate, targets, complete, abort)
    pub request_timeout: Duration,

    /// Timeout for each part transfer
    pub transfer_timeout: Duration,

    /// Ask the backend to abort the upload when a part fails
    pub abort_on_failure: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_part_size: MIN_PART_SIZE,
            max_parts: 10_000,
            max_concurrency: Some(8),
            request_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(300),
            abort_on_failure: false,
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `DOG_UPLOAD__*` environment variables
    pub fn from_env() -> UploadResult<Self> {
        let mut config = Self::default();

        if let Some(v) = env_u64("CHUNK_SIZE")? {
            config.chunk_size = v;
        }
        if let Some(v) = env_u64("MIN_PART_SIZE")? {
            config.min_part_size = v;
        }
        if let Some(v) = env_u64("MAX_PARTS")? {
            config.max_parts = u32::try_from(v)
                .map_err(|_| {
                    UploadError::invalid(format!("{}MAX_PARTS is out of range", ENV_PREFIX))
                })?;
        }
        if let Some(v) = env_u64("MAX_CONCURRENCY")? {
            // 0 means unbounded fan-out
            config.max_concurrency = if v == 0 { None } else { Some(v as usize) };
        }
        if let Some(v) = env_u64("REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("TRANSFER_TIMEOUT_SECS")? {
            config.transfer_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_var("ABORT_ON_FAILURE") {
            config.abort_on_failure = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Set chunk size
    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Set the backend minimum part size
    pub fn with_min_part_size(mut self, bytes: u64) -> Self {
        self.min_part_size = bytes;
        self
    }

    /// Set max parts
    pub fn with_max_parts(mut self, max: u32) -> Self {
        self.max_parts = max;
        self
    }

    /// Cap simultaneous part transfers
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    /// Launch every part at once
    pub fn unbounded_concurrency(mut self) -> Self {
        self.max_concurrency = None;
        self
    }

    /// Set coordination call timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set per-part transfer timeout
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Call the backend abort endpoint after a part failure
    pub fn abort_on_failure(mut self) -> Self {
        self.abort_on_failure = true;
        self
    }

    /// Check the settings are usable
    pub fn validate(&self) -> UploadResult<()> {
        if self.chunk_size == 0 {
            return Err(UploadError::invalid("Chunk size must be greater than zero"));
        }
        if self.chunk_size < self.min_part_size {
            return Err(UploadError::invalid(format!(
                "Chunk size {} is below the minimum part size {}",
                self.chunk_size, self.min_part_size
            )));
        }
        if self.max_parts == 0 {
            return Err(UploadError::invalid("Max parts must be greater than zero"));
        }
        if self.max_concurrency == Some(0) {
            return Err(UploadError::invalid("Max concurrency must be greater than zero"));
        }
        Ok(())
    }
}

pub(crate) fn env_var(key: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, key)).ok()
}

fn env_u64(key: &str) -> UploadResult<Option<u64>> {
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| {
                UploadError::invalid(format!(
                    "{}{} must be an integer, got {:?}",
                    ENV_PREFIX, key, raw
                ))
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = UploadConfig::default();
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.max_concurrency, Some(8));
        assert!(!config.abort_on_failure);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn chunk_size_below_backend_minimum_is_rejected() {
        let config = UploadConfig::new().with_chunk_size(1024);
        assert!(matches!(config.validate(), Err(UploadError::InvalidInput { .. })));

        let relaxed = UploadConfig::new().with_min_part_size(1).with_chunk_size(1024);
        assert!(relaxed.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = UploadConfig::new().with_max_concurrency(0);
        assert!(config.validate().is_err());
        assert!(UploadConfig::new().unbounded_concurrency().validate().is_ok());
    }
}
