//! Audio capture device discovery and pre-flight
//!
//! The ALSA capture device is usually also claimed by PipeWire. Before a
//! session the matching PipeWire node is switched to its "off" profile so
//! the encoder can open the device directly, and switched back afterwards.

use crate::encoder::{probe_spec, EncoderOptions};
use crate::recorder::process::{ProcessError, ProcessSpec, ProcessSupervisor};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Marker the probe capture prints when another client holds the device
pub const BUSY_MARKER: &str = "Device or resource busy";

/// Pause after a profile switch before the device is used
pub const PROFILE_SETTLE: Duration = Duration::from_millis(100);

static ALSA_HW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^hw:(\d+),(\d+)$").expect("valid ALSA pattern"));

static TRAILING_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)$").expect("valid digits pattern"));

/// Audio discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Invalid ALSA device string: {0}")]
    InvalidAlsaDevice(String),

    #[error("No product name reported for {0}")]
    ProductNotFound(String),

    #[error("Unable to find audio node ID for \"{0}\"")]
    NodeNotFound(String),

    #[error("{tool} exited with {status}")]
    CommandFailed { tool: String, status: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Helper tool locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTools {
    pub udevadm: PathBuf,
    pub wpctl: PathBuf,
}

impl Default for AudioTools {
    fn default() -> Self {
        Self {
            udevadm: PathBuf::from("udevadm"),
            wpctl: PathBuf::from("wpctl"),
        }
    }
}

/// A PipeWire node matched to an ALSA capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioNode {
    pub name: String,
    pub id: String,
}

/// Split `hw:C,D` into card and device numbers
pub fn parse_alsa_hw(device: &str) -> Result<(u32, u32), DiscoveryError> {
    let invalid = || DiscoveryError::InvalidAlsaDevice(device.to_string());
    let caps = ALSA_HW.captures(device).ok_or_else(invalid)?;
    let card = caps[1].parse().map_err(|_| invalid())?;
    let dev = caps[2].parse().map_err(|_| invalid())?;
    Ok((card, dev))
}

/// Pull the product name out of `udevadm info --attribute-walk` output
pub fn product_from_udevadm(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find(|line| line.contains("ATTRS{product}=="))
        .and_then(|line| line.split('"').nth(1))
        .map(str::to_string)
}

/// Find the node id on the first `wpctl status` line mentioning `name`.
///
/// Lines look like ` │  *   48. USB Capture  [vol: 1.00]`; the id is the
/// run of digits immediately before the first dot.
pub fn node_id_from_wpctl(stdout: &str, name: &str) -> Option<String> {
    stdout
        .lines()
        .find(|line| line.contains(name))
        .and_then(|line| line.split('.').next())
        .and_then(|prefix| TRAILING_DIGITS.captures(prefix))
        .map(|caps| caps[1].to_string())
}

async fn capture_stdout(spec: ProcessSpec) -> Result<String, DiscoveryError> {
    let tool = spec.program.to_string_lossy().to_string();
    let output = ProcessSupervisor::output(&spec).await?;
    if !output.status.success() {
        return Err(DiscoveryError::CommandFailed {
            tool,
            status: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Resolve the PipeWire node for an ALSA device.
///
/// `name_override` skips the udev product lookup and matches the
/// `wpctl status` listing against the given name instead.
pub async fn discover_node(
    tools: &AudioTools,
    device: &str,
    name_override: Option<&str>,
) -> Result<AudioNode, DiscoveryError> {
    tracing::debug!("Getting node ID for \"{}\"", device);
    let (card, dev) = parse_alsa_hw(device)?;
    tracing::debug!("card = {}, device = {}", card, dev);

    let name = match name_override {
        Some(name) => name.to_string(),
        None => {
            let spec = ProcessSpec::new("udevadm", &tools.udevadm).args([
                "info".to_string(),
                "--attribute-walk".to_string(),
                format!("/dev/snd/pcmC{}D{}c", card, dev),
            ]);
            let stdout = capture_stdout(spec).await?;
            product_from_udevadm(&stdout)
                .ok_or_else(|| DiscoveryError::ProductNotFound(device.to_string()))?
        }
    };

    let stdout = capture_stdout(ProcessSpec::new("wpctl", &tools.wpctl).arg("status")).await?;
    match node_id_from_wpctl(&stdout, &name) {
        Some(id) => {
            tracing::debug!("Got node ID {}", id);
            Ok(AudioNode { name, id })
        }
        None => Err(DiscoveryError::NodeNotFound(name)),
    }
}

/// Switch a node's profile off (`0`) or back on (`1`), then settle
pub async fn set_profile(
    tools: &AudioTools,
    node: &AudioNode,
    on: bool,
) -> Result<(), DiscoveryError> {
    tracing::debug!(
        "Setting Pipewire device \"{}\" to {}",
        node.name,
        if on { "On" } else { "Off" }
    );
    let spec = ProcessSpec::new("wpctl", &tools.wpctl).args([
        "set-profile",
        node.id.as_str(),
        if on { "1" } else { "0" },
    ]);
    let status = ProcessSupervisor::run(&spec).await?;
    if !status.success() {
        return Err(DiscoveryError::CommandFailed {
            tool: "wpctl".to_string(),
            status: status.to_string(),
        });
    }
    tracing::debug!("Sleeping for {:?}", PROFILE_SETTLE);
    tokio::time::sleep(PROFILE_SETTLE).await;
    Ok(())
}

/// Probe the capture device with a throwaway encoder run.
///
/// The device counts as available unless the probe's diagnostic output
/// reports it busy.
pub async fn audio_device_is_available(
    options: &EncoderOptions,
    device: &str,
) -> Result<bool, ProcessError> {
    tracing::debug!("Checking if {} can be used", device);
    let output = ProcessSupervisor::output(&probe_spec(options, device)).await?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(!stderr.contains(BUSY_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UDEVADM: &str = r#"
  looking at device '/devices/pci0000:00/0000:00:14.0/usb1/1-2/1-2:1.1/sound/card2/pcmC2D0c':
    KERNEL=="pcmC2D0c"
    SUBSYSTEM=="sound"

  looking at parent device '/devices/pci0000:00/0000:00:14.0/usb1/1-2':
    ATTRS{manufacturer}=="Hauppauge"
    ATTRS{product}=="USB Live2"
"#;

    const WPCTL: &str = "Audio
 ├─ Devices:
 │      41. Built-in Audio                      [alsa]
 │      52. USB Live2                           [alsa]
 │
 ├─ Sinks:
 │  *   47. Built-in Audio Analog Stereo        [vol: 0.40]
";

    #[test]
    fn test_parse_alsa_hw() {
        assert_eq!(parse_alsa_hw("hw:2,0").unwrap(), (2, 0));
        assert!(matches!(
            parse_alsa_hw("default"),
            Err(DiscoveryError::InvalidAlsaDevice(_))
        ));
        assert!(parse_alsa_hw("hw:2").is_err());
    }

    #[test]
    fn test_product_from_udevadm() {
        assert_eq!(product_from_udevadm(UDEVADM).as_deref(), Some("USB Live2"));
        assert_eq!(product_from_udevadm("KERNEL==\"pcmC0D0c\""), None);
    }

    #[test]
    fn test_node_id_from_wpctl() {
        assert_eq!(node_id_from_wpctl(WPCTL, "USB Live2").as_deref(), Some("52"));
        assert_eq!(node_id_from_wpctl(WPCTL, "Elgato"), None);
    }

    #[cfg(unix)]
    mod tools {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_busy_probe() {
            let dir = tempfile::tempdir().unwrap();
            let busy = script(
                dir.path(),
                "ffmpeg-busy",
                "echo '[alsa] cannot open audio device hw:2,0 (Device or resource busy)' >&2; exit 1",
            );
            let idle = script(
                dir.path(),
                "ffmpeg-idle",
                "echo 'Output file is required' >&2; exit 1",
            );

            let with = |ffmpeg: PathBuf| EncoderOptions {
                ffmpeg,
                ..EncoderOptions::default()
            };
            assert!(!audio_device_is_available(&with(busy), "hw:2,0").await.unwrap());
            assert!(audio_device_is_available(&with(idle), "hw:2,0").await.unwrap());
        }

        #[tokio::test]
        async fn test_discover_node_and_profile() {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("wpctl.log");
            let udevadm = script(
                dir.path(),
                "udevadm",
                &format!("[ \"$3\" = /dev/snd/pcmC2D0c ] || exit 2\ncat <<'EOF'\n{}\nEOF", UDEVADM),
            );
            let wpctl = script(
                dir.path(),
                "wpctl",
                &format!(
                    "if [ \"$1\" = status ]; then\ncat <<'EOF'\n{}\nEOF\nelse\necho \"$@\" >> {}\nfi",
                    WPCTL,
                    log.display()
                ),
            );
            let tools = AudioTools {
                udevadm,
                wpctl,
            };

            let node = discover_node(&tools, "hw:2,0", None).await.unwrap();
            assert_eq!(
                node,
                AudioNode {
                    name: "USB Live2".to_string(),
                    id: "52".to_string()
                }
            );

            set_profile(&tools, &node, false).await.unwrap();
            set_profile(&tools, &node, true).await.unwrap();
            let calls = std::fs::read_to_string(&log).unwrap();
            assert_eq!(calls, "set-profile 52 0\nset-profile 52 1\n");
        }

        #[tokio::test]
        async fn test_name_override_skips_udev() {
            let dir = tempfile::tempdir().unwrap();
            let wpctl = script(
                dir.path(),
                "wpctl",
                &format!("cat <<'EOF'\n{}\nEOF", WPCTL),
            );
            let tools = AudioTools {
                udevadm: dir.path().join("missing-udevadm"),
                wpctl,
            };
            let node = discover_node(&tools, "hw:2,0", Some("Built-in Audio"))
                .await
                .unwrap();
            assert_eq!(node.id, "41");

            let err = discover_node(&tools, "hw:2,0", Some("Elgato")).await.unwrap_err();
            assert!(matches!(err, DiscoveryError::NodeNotFound(_)));
        }
    }
}
