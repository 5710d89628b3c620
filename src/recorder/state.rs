//! Capture session state
//!
//! Session configuration, timings, stage tracking and the end-of-session
//! summary.

use crate::capture::traits::TransportMode;
use crate::encoder::DURATION_PADDING;
use crate::utils::{parse_timespan, CaptureError, CaptureResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use uuid::Uuid;

/// Lowest poll interval the monitor loop will honor
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stage of a capture session, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    PreflightAudio,
    PrepareTransport,
    Launch,
    Settle,
    InputSelect,
    Cue,
    Monitor,
    Teardown,
    Complete,
}

impl Default for SessionStage {
    fn default() -> Self {
        Self::PreflightAudio
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStage::PreflightAudio => "preflight-audio",
            SessionStage::PrepareTransport => "prepare-transport",
            SessionStage::Launch => "launch",
            SessionStage::Settle => "settle",
            SessionStage::InputSelect => "input-select",
            SessionStage::Cue => "cue",
            SessionStage::Monitor => "monitor",
            SessionStage::Teardown => "teardown",
            SessionStage::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// What to capture and where
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub video_device: String,
    /// ALSA device, e.g. `hw:2,0`
    pub audio_device: String,
    /// VBI device for the ancillary capture
    pub vbi_device: Option<String>,
    pub output: PathBuf,
    /// Capture card input line
    pub input_index: u32,
    /// Requested capture length
    pub timespan: Duration,
}

impl SessionConfig {
    /// Build a config from a human timespan such as `372m` or `1h30m`
    pub fn new(
        video_device: impl Into<String>,
        audio_device: impl Into<String>,
        output: impl Into<PathBuf>,
        timespan: &str,
    ) -> CaptureResult<Self> {
        let timespan = parse_timespan(timespan)
            .ok_or_else(|| CaptureError::InvalidTimespan(timespan.to_string()))?;
        Ok(Self {
            video_device: video_device.into(),
            audio_device: audio_device.into(),
            vbi_device: None,
            output: output.into(),
            input_index: crate::encoder::v4l2::DEFAULT_INPUT_INDEX,
            timespan,
        })
    }

    pub fn with_vbi_device(mut self, device: impl Into<String>) -> Self {
        self.vbi_device = Some(device.into());
        self
    }

    pub fn with_input_index(mut self, index: u32) -> Self {
        self.input_index = index;
        self
    }

    /// Wall-clock bound handed to the encoder
    pub fn encoder_bound(&self) -> Duration {
        self.timespan + DURATION_PADDING
    }
}

/// Fixed delays and the monitor poll rate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTimings {
    /// After launch, before switching inputs
    pub launch_settle: Duration,
    /// After the input switch, before cueing the deck
    pub input_settle: Duration,
    /// Between counter reset and playback
    pub counter_settle: Duration,
    pub poll_interval: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            launch_settle: Duration::from_secs(2),
            input_settle: Duration::from_millis(250),
            counter_settle: Duration::from_secs(1),
            poll_interval: MIN_POLL_INTERVAL,
        }
    }
}

impl SessionTimings {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll interval clamped to [`MIN_POLL_INTERVAL`]
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }
}

/// Why monitoring ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum StopReason {
    /// The encoder exited on its own (duration bound or failure)
    ProcessExited,
    /// The deck left forward playback
    TransportStopped(TransportMode),
    /// Operator interrupt
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::ProcessExited => write!(f, "encoder exited"),
            StopReason::TransportStopped(mode) => {
                write!(f, "transport stopped (mode = {}) at {}", mode.mode, mode.counter())
            }
            StopReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Progress notifications broadcast while a session runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Entered a new stage
    Stage(SessionStage),
    /// Transport sample taken while monitoring
    Position(TransportMode),
    /// Monitoring finished
    Stopped(StopReason),
}

/// Classified exit of one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitReport {
    /// Exit code; `None` when killed by a signal
    pub code: Option<i32>,
    pub clean: bool,
}

impl ExitReport {
    /// Encoder exit. ffmpeg exits 255 when interrupted but still finalizes
    /// the file, so 255 counts as clean alongside 0. Death by signal does
    /// not.
    pub fn primary(status: ExitStatus) -> Self {
        let code = status.code();
        Self {
            code,
            clean: matches!(code, Some(0) | Some(255)),
        }
    }

    /// Ancillary capture exit. Dying from the termination request we sent
    /// is a clean stop.
    pub fn ancillary(status: ExitStatus, terminate_requested: bool) -> Self {
        Self {
            code: status.code(),
            clean: status.success() || (terminate_requested && terminated_by_sigterm(status)),
        }
    }
}

#[cfg(unix)]
fn terminated_by_sigterm(status: ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(libc::SIGTERM)
}

#[cfg(not(unix))]
fn terminated_by_sigterm(_status: ExitStatus) -> bool {
    false
}

/// Result of the ancillary capture, which never decides session success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum AncillaryOutcome {
    /// No ancillary device configured
    NotConfigured,
    Exited(ExitReport),
    /// Could not be started or reaped
    Failed { message: String },
}

/// End-of-session summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub output_path: PathBuf,
    pub stop_reason: StopReason,
    pub primary: ExitReport,
    pub ancillary: AncillaryOutcome,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.primary.clean
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Turn a failed recording into [`CaptureError::Recording`]
    pub fn into_result(self) -> CaptureResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CaptureError::Recording {
                code: self.primary.code,
            })
        }
    }
}
