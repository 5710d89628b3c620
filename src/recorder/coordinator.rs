//! Capture session controller
//!
//! Runs one capture from pre-flight to teardown: checks the audio device,
//! readies the deck, launches the encoder (and VBI capture), switches the
//! capture card input, cues playback, monitors the deck and finally reaps
//! every process it started.

use super::monitor::TransportMonitor;
use super::process::{ProcessError, ProcessSupervisor};
use super::state::{
    AncillaryOutcome, ExitReport, SessionConfig, SessionEvent, SessionOutcome, SessionStage,
    SessionTimings, StopReason,
};
use crate::capture::audio::audio_device_is_available;
use crate::capture::traits::Transport;
use crate::encoder::{encoder_spec, input_select_spec, sidecar_path, vbi_spec, EncoderOptions};
use crate::utils::{CaptureError, CaptureResult};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Drives a single capture session
pub struct CaptureSession {
    id: Uuid,
    config: SessionConfig,
    timings: SessionTimings,
    encoder: EncoderOptions,

    /// Deck handle, held for the whole session
    transport: Box<dyn Transport>,

    supervisor: ProcessSupervisor,

    /// Set when the ancillary capture could not be started
    ancillary_failure: Option<String>,

    stage: Arc<RwLock<SessionStage>>,

    /// Operator interrupt. Aborts the session before monitoring, stops it
    /// cleanly once monitoring has begun.
    interrupt: CancellationToken,

    event_tx: broadcast::Sender<SessionEvent>,
}

impl CaptureSession {
    pub fn new(config: SessionConfig, transport: Box<dyn Transport>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            id: Uuid::new_v4(),
            config,
            timings: SessionTimings::default(),
            encoder: EncoderOptions::default(),
            transport,
            supervisor: ProcessSupervisor::new(),
            ancillary_failure: None,
            stage: Arc::new(RwLock::new(SessionStage::default())),
            interrupt: CancellationToken::new(),
            event_tx,
        }
    }

    pub fn with_timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_encoder_options(mut self, encoder: EncoderOptions) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> SessionStage {
        *self.stage.read()
    }

    /// Token that stops the capture when cancelled
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Run the session.
    ///
    /// Errors and interrupts before monitoring abort the session, tearing
    /// down anything already launched. Once monitoring starts the session
    /// always completes teardown; a failed recording is reported in the
    /// outcome rather than as an error.
    pub async fn run(&mut self) -> CaptureResult<SessionOutcome> {
        let span = tracing::info_span!(
            "capture",
            session = %self.id,
            output = %self.config.output.display()
        );
        self.run_stages().instrument(span).await
    }

    async fn run_stages(&mut self) -> CaptureResult<SessionOutcome> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let interrupt = self.interrupt.clone();

        self.enter(SessionStage::PreflightAudio);
        self.check_interrupt().await?;
        self.preflight_audio().await?;

        self.enter(SessionStage::PrepareTransport);
        self.check_interrupt().await?;
        // A rewind can take minutes
        tokio::select! {
            biased;
            _ = interrupt.cancelled() => {}
            result = self.prepare_transport() => result?,
        }
        self.check_interrupt().await?;

        self.enter(SessionStage::Launch);
        self.launch()?;

        self.enter(SessionStage::Settle);
        self.pause(self.timings.launch_settle).await;
        self.check_interrupt().await?;

        self.enter(SessionStage::InputSelect);
        if let Err(e) = self.select_input().await {
            tracing::error!("{}", e);
            self.supervisor.shutdown_all().await;
            return Err(e);
        }
        self.pause(self.timings.input_settle).await;
        self.check_interrupt().await?;

        self.enter(SessionStage::Cue);
        if let Err(e) = self.cue().await {
            tracing::error!("Cue failed: {}", e);
            self.supervisor.shutdown_all().await;
            return Err(e);
        }

        self.enter(SessionStage::Monitor);
        let stopped = self.monitor().await;

        self.enter(SessionStage::Teardown);
        let (primary, ancillary) = self.teardown().await;
        let stop_reason = stopped?;

        self.enter(SessionStage::Complete);
        tracing::info!("Capture finished: {}", stop_reason);
        let _ = self.event_tx.send(SessionEvent::Stopped(stop_reason.clone()));

        Ok(SessionOutcome {
            session_id: self.id,
            output_path: self.config.output.clone(),
            stop_reason,
            primary,
            ancillary,
            started_at,
            elapsed_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    fn enter(&self, stage: SessionStage) {
        tracing::debug!("Stage: {}", stage);
        *self.stage.write() = stage;
        let _ = self.event_tx.send(SessionEvent::Stage(stage));
    }

    /// Abort with [`CaptureError::Interrupted`] if the operator interrupted
    /// before monitoring, stopping whatever was launched
    async fn check_interrupt(&mut self) -> CaptureResult<()> {
        if !self.interrupt.is_cancelled() {
            return Ok(());
        }
        tracing::warn!("Interrupted during {}", self.stage());
        self.supervisor.shutdown_all().await;
        Err(CaptureError::Interrupted)
    }

    /// Settle delay that ends early on interrupt
    async fn pause(&self, interval: Duration) {
        tracing::debug!("Sleeping for {:?}", interval);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.interrupt.cancelled() => {}
        }
    }

    async fn preflight_audio(&self) -> CaptureResult<()> {
        let available = audio_device_is_available(&self.encoder, &self.config.audio_device)
            .await
            .map_err(|source| CaptureError::Spawn {
                label: "audio probe".to_string(),
                source,
            })?;
        if !available {
            return Err(CaptureError::AudioDeviceBusy(self.config.audio_device.clone()));
        }
        Ok(())
    }

    async fn prepare_transport(&mut self) -> CaptureResult<()> {
        tracing::debug!("Turning VCR on ({})", self.transport.id());
        self.transport.power_on().await?;

        let mode = self.transport.query_mode(false).await?;
        if !mode.tape_inserted {
            tracing::error!("No tape inserted");
            return Err(CaptureError::NoTape);
        }

        tracing::debug!("Rewinding tape");
        let mode = self.transport.rewind_and_wait().await?;
        tracing::debug!("Rewound to {}", mode.counter());
        Ok(())
    }

    fn launch(&mut self) -> CaptureResult<()> {
        let bound = self.config.encoder_bound();
        tracing::debug!("Will record for {} seconds", bound.as_secs());

        let spec = encoder_spec(
            &self.encoder,
            &self.config.video_device,
            &self.config.audio_device,
            bound,
            &self.config.output,
        );
        self.supervisor
            .launch_primary(&spec)
            .map_err(|source| CaptureError::Spawn {
                label: spec.label.clone(),
                source,
            })?;

        let Some(vbi_device) = self.config.vbi_device.clone() else {
            tracing::debug!("VBI device not specified");
            return Ok(());
        };

        let vbi_output = sidecar_path(&self.config.output, "vbi");
        match std::fs::remove_file(&vbi_output) {
            Ok(()) => tracing::debug!("Removed stale {}", vbi_output.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove {}: {}", vbi_output.display(), e),
        }

        tracing::debug!(
            "Starting zvbi2raw with device {} and outputting to {}",
            vbi_device,
            vbi_output.display()
        );
        let spec = vbi_spec(&self.encoder, &vbi_device, &self.config.output);
        if let Err(e) = self.supervisor.launch_ancillary(&spec) {
            tracing::warn!("VBI capture not started: {}", e);
            self.ancillary_failure = Some(e.to_string());
        }
        Ok(())
    }

    async fn select_input(&self) -> CaptureResult<()> {
        tracing::debug!(
            "Setting device {} input to {}",
            self.config.video_device,
            self.config.input_index
        );
        let spec = input_select_spec(
            &self.encoder,
            &self.config.video_device,
            self.config.input_index,
        );
        let status = ProcessSupervisor::run(&spec)
            .await
            .map_err(|source| CaptureError::Spawn {
                label: spec.label.clone(),
                source,
            })?;
        tracing::debug!("v4l2-ctl exited with {}", status);
        if !status.success() {
            return Err(CaptureError::InputSwitch {
                code: status.code(),
            });
        }
        Ok(())
    }

    async fn cue(&mut self) -> CaptureResult<()> {
        tracing::debug!("Resetting VCR counter");
        self.transport.reset_counter().await?;
        sleep(self.timings.counter_settle).await;
        tracing::debug!("Starting VCR playback");
        self.transport.begin_playback().await?;
        Ok(())
    }

    async fn monitor(&mut self) -> CaptureResult<StopReason> {
        let primary = self
            .supervisor
            .primary_mut()
            .ok_or_else(|| ProcessError::NotLaunched("primary".to_string()))?;
        TransportMonitor::new(self.timings.effective_poll_interval())
            .with_events(self.event_tx.clone())
            .run(self.transport.as_mut(), primary, &self.interrupt)
            .await
    }

    /// Await the encoder, then stop the VBI capture. Never bails early.
    async fn teardown(&mut self) -> (ExitReport, AncillaryOutcome) {
        let primary = match self.supervisor.primary_mut() {
            Some(process) => match process.wait().await {
                Ok(status) => ExitReport::primary(status),
                Err(e) => {
                    tracing::error!("{}", e);
                    ExitReport {
                        code: None,
                        clean: false,
                    }
                }
            },
            None => ExitReport {
                code: None,
                clean: false,
            },
        };
        if primary.clean {
            tracing::debug!("ffmpeg exited with code {:?}", primary.code);
        } else {
            tracing::warn!("ffmpeg did not exit cleanly (code {:?})", primary.code);
        }

        let ancillary = match self.supervisor.ancillary_mut() {
            Some(process) => {
                tracing::debug!("Terminating {}", process.label());
                if let Err(e) = process.terminate() {
                    tracing::warn!("{}", e);
                }
                match process.wait().await {
                    Ok(status) => {
                        let report = ExitReport::ancillary(status, process.terminate_requested());
                        tracing::debug!("{} exited with {}. Ignoring.", process.label(), status);
                        AncillaryOutcome::Exited(report)
                    }
                    Err(e) => {
                        tracing::warn!("{}", e);
                        AncillaryOutcome::Failed {
                            message: e.to_string(),
                        }
                    }
                }
            }
            None => match self.ancillary_failure.take() {
                Some(message) => AncillaryOutcome::Failed { message },
                None => AncillaryOutcome::NotConfigured,
            },
        };

        (primary, ancillary)
    }
}

async fn sleep(interval: Duration) {
    tracing::debug!("Sleeping for {:?}", interval);
    tokio::time::sleep(interval).await;
}
