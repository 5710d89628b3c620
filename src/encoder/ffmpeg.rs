//! FFmpeg invocations for capture
//!
//! The primary encoder records the V4L2 video and ALSA audio inputs into a
//! lossless HEVC + FLAC file. The same binary is used for the audio busy
//! probe during pre-flight.

use crate::encoder::types::{format_seconds, sidecar_path, EncoderOptions};
use crate::recorder::process::{ProcessSpec, StdioMode};
use std::path::Path;
use std::time::Duration;

/// Primary encoder process.
///
/// `bound` is passed as `-t`, so the encoder stops on its own even if
/// nothing else ends the capture. The encoder report goes to the `.log`
/// sidecar via `FFREPORT`. Stdin is piped so ffmpeg never reads the
/// terminal.
pub fn encoder_spec(
    options: &EncoderOptions,
    video_device: &str,
    audio_device: &str,
    bound: Duration,
    output: &Path,
) -> ProcessSpec {
    let queue = options.thread_queue_size.to_string();
    let report = format!(
        "file={}:level={}",
        sidecar_path(output, "log").display(),
        options.report_level
    );

    ProcessSpec::new("ffmpeg", &options.ffmpeg)
        .args(["-hide_banner", "-loglevel", options.loglevel.as_str(), "-y"])
        .args(["-thread_queue_size", queue.as_str(), "-f", "v4l2", "-i", video_device])
        .args(["-thread_queue_size", queue.as_str(), "-f", "alsa", "-i", audio_device])
        .args(["-c:a", options.audio_codec.as_str()])
        .args(["-ac".to_string(), options.audio_channels.to_string()])
        .args(["-c:v", options.video_codec.as_str()])
        .args(["-x265-params", options.x265_params.as_str()])
        .args(["-preset", options.preset.as_str()])
        // Interlaced source: keep fields, top field first
        .args(["-flags", "+ilme+ildct", "-top", "1"])
        .args(["-aspect", options.aspect.as_str()])
        .args(["-t".to_string(), format_seconds(bound)])
        .arg(output.to_string_lossy())
        .env("FFREPORT", report)
        .stdio(StdioMode::Piped, StdioMode::Inherit, StdioMode::Inherit)
        .output_path(output)
}

/// Throwaway capture used to check whether the audio device is claimed
pub fn probe_spec(options: &EncoderOptions, audio_device: &str) -> ProcessSpec {
    ProcessSpec::new("audio probe", &options.ffmpeg)
        .args(["-hide_banner", "-f", "alsa", "-i", audio_device])
        .stdio(StdioMode::Null, StdioMode::Piped, StdioMode::Piped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_args() {
        let spec = encoder_spec(
            &EncoderOptions::default(),
            "/dev/video0",
            "hw:2,0",
            Duration::from_secs(372 * 60 + 15),
            Path::new("/tapes/wedding.mkv"),
        );
        assert_eq!(
            spec.command_line(),
            "ffmpeg -hide_banner -loglevel warning -y \
             -thread_queue_size 2048 -f v4l2 -i /dev/video0 \
             -thread_queue_size 2048 -f alsa -i hw:2,0 \
             -c:a flac -ac 2 -c:v libx265 -x265-params lossless=1 -preset superfast \
             -flags +ilme+ildct -top 1 -aspect 4/3 -t 22335 /tapes/wedding.mkv"
        );
        assert_eq!(
            spec.env.get("FFREPORT").map(String::as_str),
            Some("file=/tapes/wedding.log:level=40")
        );
        assert_eq!(spec.stdin, StdioMode::Piped);
        assert_eq!(spec.output_path.as_deref(), Some(Path::new("/tapes/wedding.mkv")));
    }

    #[test]
    fn test_custom_tool_path() {
        let options = EncoderOptions {
            ffmpeg: "/opt/ffmpeg/bin/ffmpeg".into(),
            thread_queue_size: 512,
            ..EncoderOptions::default()
        };
        let spec = encoder_spec(&options, "v", "a", Duration::from_secs(60), Path::new("out.mkv"));
        assert_eq!(spec.program, Path::new("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(spec.args.iter().filter(|a| *a == "512").count(), 2);
    }

    #[test]
    fn test_probe_args() {
        let spec = probe_spec(&EncoderOptions::default(), "hw:2,0");
        assert_eq!(spec.command_line(), "ffmpeg -hide_banner -f alsa -i hw:2,0");
    }
}
