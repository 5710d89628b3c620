//! Encoder configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Packets buffered per input before the demuxer blocks
pub const THREAD_QUEUE_SIZE: u32 = 2048;

/// Added to the requested timespan to form the encoder's own bound, so the
/// transport normally ends the capture rather than the timer
pub const DURATION_PADDING: Duration = Duration::from_secs(15);

/// Tool locations and codec parameters for a capture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderOptions {
    pub ffmpeg: PathBuf,
    pub v4l2_ctl: PathBuf,
    pub zvbi2raw: PathBuf,
    pub thread_queue_size: u32,
    /// ffmpeg console log level
    pub loglevel: String,
    pub audio_codec: String,
    pub audio_channels: u8,
    pub video_codec: String,
    pub x265_params: String,
    pub preset: String,
    pub aspect: String,
    /// Level written to the `FFREPORT` log file
    pub report_level: u8,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            v4l2_ctl: PathBuf::from("v4l2-ctl"),
            zvbi2raw: PathBuf::from("zvbi2raw"),
            thread_queue_size: THREAD_QUEUE_SIZE,
            loglevel: "warning".to_string(),
            audio_codec: "flac".to_string(),
            audio_channels: 2,
            video_codec: "libx265".to_string(),
            x265_params: "lossless=1".to_string(),
            preset: "superfast".to_string(),
            aspect: "4/3".to_string(),
            report_level: 40,
        }
    }
}

/// Sidecar file next to the output, named by replacing its extension
pub fn sidecar_path(output: &Path, extension: &str) -> PathBuf {
    output.with_extension(extension)
}

/// Seconds as ffmpeg expects them for `-t`
pub fn format_seconds(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.3}", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_path_replaces_extension() {
        assert_eq!(
            sidecar_path(Path::new("/tapes/wedding.mkv"), "log"),
            PathBuf::from("/tapes/wedding.log")
        );
        assert_eq!(
            sidecar_path(Path::new("tapes.d/wedding"), "vbi"),
            PathBuf::from("tapes.d/wedding.vbi")
        );
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(Duration::from_secs(22335)), "22335");
        assert_eq!(format_seconds(Duration::from_millis(1500)), "1.500");
    }
}
