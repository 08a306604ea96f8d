//! Splits a file into fixed-size parts.

use crate::{PartDescriptor, UploadError, UploadResult};

/// Deterministic chunk planning from file size
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkPlanner;

impl ChunkPlanner {
    /// Number of parts a file of `file_size` bytes splits into
    pub fn part_count(file_size: u64, chunk_size: u64) -> UploadResult<u64> {
        Self::check(file_size, chunk_size)?;
        Ok(file_size.div_ceil(chunk_size))
    }

    /// Plan the parts for a file.
    ///
    /// Every part is `chunk_size` bytes except the last, which holds the
    /// remainder. Empty files are rejected rather than planned as a single
    /// zero-byte part.
    pub fn plan(file_size: u64, chunk_size: u64) -> UploadResult<Vec<PartDescriptor>> {
        let count = Self::part_count(file_size, chunk_size)?;
        let count = u32::try_from(count).map_err(|_| {
            UploadError::invalid(format!("File splits into {} parts, too many to number", count))
        })?;

        let parts = (1..=count)
            .map(|part_number| {
                let start = u64::from(part_number - 1) * chunk_size;
                // start < file_size, so this never overflows
                let end = start + chunk_size.min(file_size - start);
                PartDescriptor {
                    part_number,
                    start,
                    end,
                    size: end - start,
                }
            })
            .collect();

        Ok(parts)
    }

    fn check(file_size: u64, chunk_size: u64) -> UploadResult<()> {
        if chunk_size == 0 {
            return Err(UploadError::invalid("Chunk size must be greater than zero"));
        }
        if file_size == 0 {
            return Err(UploadError::invalid("Cannot upload an empty file"));
        }
        Ok(())
    }
}
