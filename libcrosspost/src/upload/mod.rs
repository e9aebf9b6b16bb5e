//! Media upload state machines
//!
//! Every platform that processes media asynchronously follows the same shape:
//!
//! ```text
//! init -> transfer (single or chunked) -> finalize -> poll status -> ready | failed | timeout
//! ```
//!
//! [`UploadSession`] tracks where one upload is in that sequence and rejects
//! out-of-order steps. [`poll_until_ready`] drives the status phase with a
//! bounded number of checks; running out of checks is a retryable
//! `MediaTimeout`, never an endless loop.

use std::future::Future;
use std::ops::Range;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::error::{PlatformError, Result};

pub mod instagram;
pub mod linkedin;
pub mod twitter;
pub mod youtube;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Init,
    Transferring,
    Finalizing,
    Processing,
    Ready,
    Failed,
}

impl std::fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UploadPhase::Init => "init",
            UploadPhase::Transferring => "transferring",
            UploadPhase::Finalizing => "finalizing",
            UploadPhase::Processing => "processing",
            UploadPhase::Ready => "ready",
            UploadPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Transient state of one media upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub media_id: Option<String>,
    pub total_bytes: u64,
    pub bytes_sent: u64,
    /// Index the next chunk will be sent with
    pub segment_index: u32,
    phase: UploadPhase,
}

impl UploadSession {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            media_id: None,
            total_bytes,
            bytes_sent: 0,
            segment_index: 0,
            phase: UploadPhase::Init,
        }
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, UploadPhase::Ready | UploadPhase::Failed)
    }

    /// Init → Transferring, once the platform has assigned an id
    pub fn begin_transfer(&mut self, media_id: impl Into<String>) -> Result<()> {
        self.expect_phase(UploadPhase::Init, "begin transfer")?;
        self.media_id = Some(media_id.into());
        self.phase = UploadPhase::Transferring;
        Ok(())
    }

    /// Account for one successfully sent chunk
    pub fn record_chunk(&mut self, len: u64) -> Result<()> {
        self.expect_phase(UploadPhase::Transferring, "record chunk")?;
        if self.bytes_sent + len > self.total_bytes {
            return Err(PlatformError::InvalidState(format!(
                "chunk of {} bytes overruns upload of {} bytes ({} already sent)",
                len, self.total_bytes, self.bytes_sent
            ))
            .into());
        }
        self.bytes_sent += len;
        self.segment_index += 1;
        Ok(())
    }

    /// Transferring → Finalizing, only once every byte has been sent
    pub fn finalize(&mut self) -> Result<()> {
        self.expect_phase(UploadPhase::Transferring, "finalize")?;
        if self.bytes_sent != self.total_bytes {
            return Err(PlatformError::InvalidState(format!(
                "cannot finalize after {} of {} bytes",
                self.bytes_sent, self.total_bytes
            ))
            .into());
        }
        self.phase = UploadPhase::Finalizing;
        Ok(())
    }

    /// Finalizing → Processing
    pub fn start_processing(&mut self) -> Result<()> {
        self.expect_phase(UploadPhase::Finalizing, "start processing")?;
        self.phase = UploadPhase::Processing;
        Ok(())
    }

    /// Finalizing | Processing → Ready, yielding the media id
    pub fn complete(&mut self) -> Result<String> {
        if !matches!(self.phase, UploadPhase::Finalizing | UploadPhase::Processing) {
            return Err(self.illegal("complete"));
        }
        let media_id = self
            .media_id
            .clone()
            .ok_or_else(|| PlatformError::InvalidState("upload completed without a media id".to_string()))?;
        self.phase = UploadPhase::Ready;
        Ok(media_id)
    }

    pub fn fail(&mut self) {
        if !self.is_terminal() {
            self.phase = UploadPhase::Failed;
        }
    }

    fn expect_phase(&self, expected: UploadPhase, action: &str) -> Result<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(self.illegal(action))
        }
    }

    fn illegal(&self, action: &str) -> crate::error::CrosspostError {
        PlatformError::InvalidState(format!("cannot {} while upload is {}", action, self.phase)).into()
    }
}

/// Byte ranges of `chunk_size` covering `total` bytes
pub fn chunk_ranges(total: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..total)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(total))
        .collect()
}

/// Bounds for a status-polling loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between checks when the platform gives no hint
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
        }
    }
}

/// Result of one processing-status check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingStatus {
    /// Still working; optionally with a server-suggested wait
    Pending { check_after: Option<Duration> },
    Ready,
    Failed(String),
}

impl ProcessingStatus {
    pub fn pending() -> Self {
        ProcessingStatus::Pending { check_after: None }
    }
}

/// Call `check` until it reports ready, failed, or the attempt bound is hit
///
/// `label` names the media in errors and logs.
pub async fn poll_until_ready<F, Fut>(policy: &PollPolicy, label: &str, mut check: F) -> Result<()>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ProcessingStatus>>,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match check(attempt).await? {
            ProcessingStatus::Ready => {
                debug!("{} ready after {} status check(s)", label, attempt);
                return Ok(());
            }
            ProcessingStatus::Failed(reason) => {
                return Err(PlatformError::MediaUpload(format!(
                    "{} processing failed: {}",
                    label, reason
                ))
                .into());
            }
            ProcessingStatus::Pending { check_after } => {
                if attempt == max_attempts {
                    break;
                }
                let wait = check_after.unwrap_or(policy.interval);
                debug!(
                    "{} still processing (check {}/{}); next check in {}s",
                    label,
                    attempt,
                    max_attempts,
                    wait.as_secs()
                );
                sleep(wait).await;
            }
        }
    }

    Err(PlatformError::MediaTimeout(format!(
        "{} still processing after {} status checks",
        label, max_attempts
    ))
    .into())
}
