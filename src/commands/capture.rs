//! The `capture` command
//!
//! Wraps a [`CaptureSession`] with the host-side chores: finding and
//! releasing the PipeWire audio node, opening the deck, restoring the node
//! afterwards and rewinding the tape.

use crate::capture::audio::{discover_node, set_profile, AudioTools};
use crate::capture::jlip::{JlipConfig, JlipTransport};
use crate::capture::traits::Transport;
use crate::encoder::EncoderOptions;
use crate::recorder::{CaptureSession, SessionConfig, SessionOutcome, SessionTimings};
use crate::utils::CaptureResult;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything the operator asked for
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Serial port of the deck
    pub serial: String,
    pub jlip_id: u8,
    pub audio_device: String,
    /// PipeWire name to match instead of the udev product name
    pub audio_device_name: Option<String>,
    pub video_device: String,
    pub vbi_device: Option<String>,
    pub input_index: u32,
    pub timespan: String,
    pub poll_interval: Duration,
    /// Rewind the tape once the session is over
    pub rewind_after: bool,
    pub output: PathBuf,
}

impl CaptureRequest {
    /// Validate into a session config. Fails on an unparseable timespan.
    pub fn session_config(&self) -> CaptureResult<SessionConfig> {
        let mut config = SessionConfig::new(
            self.video_device.clone(),
            self.audio_device.clone(),
            self.output.clone(),
            &self.timespan,
        )?
        .with_input_index(self.input_index);
        if let Some(vbi) = &self.vbi_device {
            config = config.with_vbi_device(vbi.clone());
        }
        Ok(config)
    }
}

/// External tool locations
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    pub audio: AudioTools,
    pub encoder: EncoderOptions,
}

/// Capture a tape from a JLIP deck
pub async fn capture(
    request: &CaptureRequest,
    interrupt: CancellationToken,
) -> CaptureResult<SessionOutcome> {
    let config = request.session_config()?;
    let transport = JlipTransport::open(
        &request.serial,
        JlipConfig {
            jlip_id: request.jlip_id,
            ..JlipConfig::default()
        },
    )?;
    capture_with(
        request,
        config,
        Box::new(transport),
        &Toolchain::default(),
        interrupt,
    )
    .await
}

/// Capture with an already opened deck.
///
/// The audio node is switched back on whatever the session's result.
pub async fn capture_with(
    request: &CaptureRequest,
    config: SessionConfig,
    transport: Box<dyn Transport>,
    tools: &Toolchain,
    interrupt: CancellationToken,
) -> CaptureResult<SessionOutcome> {
    let node = discover_node(
        &tools.audio,
        &request.audio_device,
        request.audio_device_name.as_deref(),
    )
    .await?;
    set_profile(&tools.audio, &node, false).await?;

    let mut session = CaptureSession::new(config, transport)
        .with_encoder_options(tools.encoder.clone())
        .with_timings(SessionTimings::default().with_poll_interval(request.poll_interval))
        .with_interrupt(interrupt);
    let result = session.run().await;

    if let Err(e) = set_profile(&tools.audio, &node, true).await {
        tracing::warn!("Could not restore Pipewire device \"{}\": {}", node.name, e);
    }

    if request.rewind_after && result.is_ok() {
        tracing::debug!("Rewinding tape");
        if let Err(e) = session.transport_mut().rewind_and_wait().await {
            tracing::warn!("Rewind failed: {}", e);
        }
    }

    result
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::capture::fake::FakeTransport;
    use crate::capture::traits::VtrMode;
    use crate::utils::CaptureError;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    const WPCTL_STATUS: &str = " │      52. USB Live2                           [alsa]";

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn request(dir: &Path, timespan: &str) -> CaptureRequest {
        CaptureRequest {
            serial: "/dev/ttyUSB0".to_string(),
            jlip_id: 1,
            audio_device: "hw:2,0".to_string(),
            audio_device_name: Some("USB Live2".to_string()),
            video_device: "/dev/video0".to_string(),
            vbi_device: None,
            input_index: 2,
            timespan: timespan.to_string(),
            poll_interval: Duration::from_millis(100),
            rewind_after: true,
            output: dir.join("tape.mkv"),
        }
    }

    fn toolchain(dir: &Path) -> Toolchain {
        let d = dir.display();
        let wpctl = format!(
            "if [ \"$1\" = status ]; then echo '{}'; else echo \"$@\" >> {}/wpctl.log; fi",
            WPCTL_STATUS, d
        );
        Toolchain {
            audio: AudioTools {
                udevadm: dir.join("missing-udevadm"),
                wpctl: script(dir, "wpctl", &wpctl),
            },
            encoder: EncoderOptions {
                // Busy on every probe
                ffmpeg: script(dir, "ffmpeg", "echo 'Device or resource busy' >&2; exit 1"),
                ..EncoderOptions::default()
            },
        }
    }

    #[test]
    fn test_invalid_timespan_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = request(dir.path(), "later").session_config().unwrap_err();
        assert!(matches!(err, CaptureError::InvalidTimespan(_)));
    }

    #[test]
    fn test_session_config_carries_options() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path(), "1h30m");
        req.vbi_device = Some("/dev/vbi0".to_string());
        req.input_index = 0;
        let config = req.session_config().unwrap();
        assert_eq!(config.timespan, Duration::from_secs(5400));
        assert_eq!(config.vbi_device.as_deref(), Some("/dev/vbi0"));
        assert_eq!(config.input_index, 0);
    }

    #[tokio::test]
    async fn test_profile_restored_after_abort() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), "10m");
        let transport = FakeTransport::new([VtrMode::PlayForward]);

        let err = capture_with(
            &req,
            req.session_config().unwrap(),
            Box::new(transport.clone()),
            &toolchain(dir.path()),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CaptureError::AudioDeviceBusy(_)));
        let calls = std::fs::read_to_string(dir.path().join("wpctl.log")).unwrap();
        assert_eq!(calls, "set-profile 52 0\nset-profile 52 1\n");
        // Aborted sessions leave the tape where it is
        assert!(transport.state.lock().calls.is_empty());
    }
}
