//! Per-part and overall progress tracking.
//!
//! Part transfer tasks never touch the aggregator directly. They send
//! [`ProgressEvent`]s over a channel to the orchestrator, which owns the
//! single [`ProgressAggregator`] for the attempt and publishes
//! [`ProgressSnapshot`]s to observers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    AttemptId, PartDescriptor, PartProgressRecord, PartStatus, UploadError, UploadResult,
    UploadState,
};

/// Something that happened to one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    PartStarted { part_number: u32 },
    PartProgress { part_number: u32, percent: u8 },
    PartCompleted { part_number: u32 },
    PartFailed { part_number: u32, cause: String },
}

impl ProgressEvent {
    pub fn part_number(&self) -> u32 {
        match self {
            Self::PartStarted { part_number }
            | Self::PartProgress { part_number, .. }
            | Self::PartCompleted { part_number }
            | Self::PartFailed { part_number, .. } => *part_number,
        }
    }
}

/// Part counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartCounts {
    pub pending: usize,
    pub uploading: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Reducer over the progress records of one attempt
#[derive(Debug, Clone, Default)]
pub struct ProgressAggregator {
    parts: BTreeMap<u32, PartProgressRecord>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to one pending record per part
    pub fn initialize(&mut self, parts: &[PartDescriptor]) {
        self.parts = parts
            .iter()
            .map(|part| {
                (
                    part.part_number,
                    PartProgressRecord {
                        part_number: part.part_number,
                        status: PartStatus::Pending,
                        percent: 0,
                        size: part.size,
                    },
                )
            })
            .collect();
    }

    /// Apply an event, routing it to the matching transition
    pub fn apply(&mut self, event: &ProgressEvent) -> UploadResult<()> {
        match event {
            ProgressEvent::PartStarted { part_number } => self.on_part_started(*part_number),
            ProgressEvent::PartProgress { part_number, percent } => {
                self.on_part_progress(*part_number, *percent);
                Ok(())
            }
            ProgressEvent::PartCompleted { part_number } => self.on_part_completed(*part_number),
            ProgressEvent::PartFailed { part_number, .. } => self.on_part_failed(*part_number),
        }
    }

    /// pending -> uploading
    pub fn on_part_started(&mut self, part_number: u32) -> UploadResult<()> {
        let record = self.record_mut(part_number)?;
        if record.status != PartStatus::Pending {
            return Err(illegal(record, PartStatus::Uploading));
        }
        record.status = PartStatus::Uploading;
        record.percent = 0;
        Ok(())
    }

    /// Only honored while uploading; late or stale events are dropped.
    pub fn on_part_progress(&mut self, part_number: u32, percent: u8) {
        if let Some(record) = self.parts.get_mut(&part_number) {
            if record.status == PartStatus::Uploading {
                record.percent = record.percent.max(percent.min(100));
            }
        }
    }

    /// uploading -> completed
    pub fn on_part_completed(&mut self, part_number: u32) -> UploadResult<()> {
        let record = self.record_mut(part_number)?;
        if record.status != PartStatus::Uploading {
            return Err(illegal(record, PartStatus::Completed));
        }
        record.status = PartStatus::Completed;
        record.percent = 100;
        Ok(())
    }

    /// pending | uploading -> failed
    pub fn on_part_failed(&mut self, part_number: u32) -> UploadResult<()> {
        let record = self.record_mut(part_number)?;
        if !matches!(record.status, PartStatus::Pending | PartStatus::Uploading) {
            return Err(illegal(record, PartStatus::Failed));
        }
        record.status = PartStatus::Failed;
        Ok(())
    }

    /// Completed share of all parts, ignoring partial progress of in-flight parts
    pub fn overall_percent(&self) -> u8 {
        let total = self.parts.len() as u64;
        if total == 0 {
            return 0;
        }
        let completed = self.counts().completed as u64;
        // round half up
        ((200 * completed + total) / (2 * total)) as u8
    }

    pub fn counts(&self) -> PartCounts {
        let mut counts = PartCounts::default();
        for record in self.parts.values() {
            match record.status {
                PartStatus::Pending => counts.pending += 1,
                PartStatus::Uploading => counts.uploading += 1,
                PartStatus::Completed => counts.completed += 1,
                PartStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn get(&self, part_number: u32) -> Option<&PartProgressRecord> {
        self.parts.get(&part_number)
    }

    /// Records ordered by part number
    pub fn records(&self) -> Vec<PartProgressRecord> {
        self.parts.values().cloned().collect()
    }

    pub fn total_parts(&self) -> usize {
        self.parts.len()
    }

    fn record_mut(&mut self, part_number: u32) -> UploadResult<&mut PartProgressRecord> {
        self.parts
            .get_mut(&part_number)
            .ok_or_else(|| UploadError::invalid(format!("Unknown part {}", part_number)))
    }
}

fn illegal(record: &PartProgressRecord, to: PartStatus) -> UploadError {
    UploadError::IllegalTransition {
        part_number: record.part_number,
        from: record.status,
        to,
    }
}

/// Point-in-time view of an attempt, published to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub attempt_id: Option<AttemptId>,
    pub state: UploadState,
    pub parts: Vec<PartProgressRecord>,
    pub overall_percent: u8,
    pub counts: PartCounts,
}

impl ProgressSnapshot {
    /// Nothing in flight
    pub fn idle() -> Self {
        Self {
            attempt_id: None,
            state: UploadState::Idle,
            parts: Vec::new(),
            overall_percent: 0,
            counts: PartCounts::default(),
        }
    }

    pub fn capture(
        attempt_id: &AttemptId,
        state: UploadState,
        aggregator: &ProgressAggregator,
    ) -> Self {
        Self {
            attempt_id: Some(attempt_id.clone()),
            state,
            parts: aggregator.records(),
            overall_percent: aggregator.overall_percent(),
            counts: aggregator.counts(),
        }
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}
