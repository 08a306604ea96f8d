use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::{ProgressEvent, UploadResult};

/// Writes one part's bytes to its upload target and waits for the acknowledgement
#[async_trait]
pub trait PartTransport: Send + Sync {
    /// PUT `body` to `destination`.
    ///
    /// Returns the acknowledgement whatever its status; only failures to get
    /// an acknowledgement at all (connection, I/O) are errors. Implementations
    /// report bytes handed to the wire through `progress`.
    async fn put_part(
        &self,
        destination: &str,
        body: Bytes,
        progress: Arc<ProgressReporter>,
    ) -> UploadResult<PartAck>;
}

/// Acknowledgement of a part transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartAck {
    pub status: u16,
    /// Entity tag or equivalent, if the destination returned one
    pub token: Option<String>,
}

impl PartAck {
    pub fn new(status: u16, token: Option<String>) -> Self {
        Self { status, token }
    }

    /// 2xx acknowledgement carrying a token
    pub fn ok<S: Into<String>>(token: S) -> Self {
        Self::new(200, Some(token.into()))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Turns byte counts into monotonic per-part percentages.
///
/// Percentages stop at 99; 100 is only reached when the part completes. Once
/// closed, nothing more is reported.
#[derive(Debug)]
pub struct ProgressReporter {
    part_number: u32,
    total: u64,
    sent: AtomicU64,
    last_percent: AtomicU8,
    closed: AtomicBool,
    events: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    pub fn new(part_number: u32, total: u64, events: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            part_number,
            total,
            sent: AtomicU64::new(0),
            last_percent: AtomicU8::new(0),
            closed: AtomicBool::new(false),
            events: Some(events),
        }
    }

    /// Reporter that tracks progress without sending it anywhere
    pub fn detached(part_number: u32, total: u64) -> Self {
        Self {
            part_number,
            total,
            sent: AtomicU64::new(0),
            last_percent: AtomicU8::new(0),
            closed: AtomicBool::new(false),
            events: None,
        }
    }

    pub fn part_number(&self) -> u32 {
        self.part_number
    }

    /// Record `n` more bytes sent
    pub fn bytes_sent(&self, n: u64) {
        let sent = self.sent.fetch_add(n, Ordering::AcqRel) + n;
        let percent = if self.total == 0 {
            0
        } else {
            ((sent.min(self.total) * 200 + self.total) / (2 * self.total)) as u8
        };
        self.report_percent(percent);
    }

    /// Report a percentage directly
    pub fn report_percent(&self, percent: u8) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let percent = percent.min(99);
        let previous = self.last_percent.fetch_max(percent, Ordering::AcqRel);
        if percent > previous {
            if let Some(events) = &self.events {
                // receiver gone means the attempt was abandoned
                let _ = events.send(ProgressEvent::PartProgress {
                    part_number: self.part_number,
                    percent,
                });
            }
        }
    }

    /// Highest percentage reported so far
    pub fn percent(&self) -> u8 {
        self.last_percent.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
