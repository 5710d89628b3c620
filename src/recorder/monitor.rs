//! Transport monitor loop
//!
//! Watches the deck while the encoder runs and decides when the capture is
//! over: the encoder exits, the deck leaves forward playback, or the
//! operator interrupts.

use super::process::ManagedProcess;
use super::state::{SessionEvent, StopReason, MIN_POLL_INTERVAL};
use crate::capture::traits::Transport;
use crate::utils::CaptureResult;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How often the tape position is written to the log
pub const POSITION_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub struct TransportMonitor {
    poll_interval: Duration,
    events: Option<broadcast::Sender<SessionEvent>>,
}

impl TransportMonitor {
    /// `poll_interval` below [`MIN_POLL_INTERVAL`] is raised to it
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run until a stop condition holds.
    ///
    /// Liveness is checked before every sample, so an encoder exit wins over
    /// a transport stop seen in the same iteration. On a transport stop or an
    /// interrupt the encoder is asked to terminate; the caller still owns
    /// waiting for it. A failed transport query also terminates the encoder
    /// and is returned as the error.
    pub async fn run(
        &self,
        transport: &mut dyn Transport,
        primary: &mut ManagedProcess,
        interrupt: &CancellationToken,
    ) -> CaptureResult<StopReason> {
        let mut last_logged: Option<Instant> = None;

        loop {
            if !primary.is_alive()? {
                tracing::debug!("{} is no longer running", primary.label());
                return Ok(StopReason::ProcessExited);
            }

            let sample = tokio::select! {
                biased;
                _ = interrupt.cancelled() => return self.interrupted(primary),
                sample = transport.query_mode(true) => sample,
            };

            let mode = match sample {
                Ok(mode) => mode,
                Err(e) => {
                    tracing::error!(
                        "Transport query failed: {}. Terminating {}.",
                        e,
                        primary.label()
                    );
                    if let Err(term) = primary.terminate() {
                        tracing::warn!("{}", term);
                    }
                    return Err(e.into());
                }
            };

            if !mode.mode.is_playing_forward() {
                // The deck often stops because the encoder already hit its bound
                if !primary.is_alive()? {
                    return Ok(StopReason::ProcessExited);
                }
                tracing::info!(
                    "Detected VCR is no longer playing (mode = {}). Terminating {}.",
                    mode.mode,
                    primary.label()
                );
                primary.terminate()?;
                return Ok(StopReason::TransportStopped(mode));
            }

            if last_logged.map_or(true, |at| at.elapsed() >= POSITION_LOG_INTERVAL) {
                tracing::info!("Position {}", mode.counter());
                last_logged = Some(Instant::now());
            }
            if let Some(events) = &self.events {
                let _ = events.send(SessionEvent::Position(mode));
            }

            tokio::select! {
                biased;
                _ = interrupt.cancelled() => return self.interrupted(primary),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    fn interrupted(&self, primary: &mut ManagedProcess) -> CaptureResult<StopReason> {
        tracing::info!("Received interrupt. Terminating {}.", primary.label());
        primary.terminate()?;
        Ok(StopReason::Interrupted)
    }
}
