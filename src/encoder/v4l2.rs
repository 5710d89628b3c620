//! Capture card input selection

use crate::encoder::types::EncoderOptions;
use crate::recorder::process::{ProcessSpec, StdioMode};

/// Default input line (composite on most USB capture sticks)
pub const DEFAULT_INPUT_INDEX: u32 = 2;

pub fn input_select_spec(
    options: &EncoderOptions,
    video_device: &str,
    input_index: u32,
) -> ProcessSpec {
    ProcessSpec::new("v4l2-ctl", &options.v4l2_ctl)
        .args(["-d".to_string(), video_device.to_string()])
        .args(["-i".to_string(), input_index.to_string()])
        .stdio(StdioMode::Piped, StdioMode::Piped, StdioMode::Piped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_select_args() {
        let spec =
            input_select_spec(&EncoderOptions::default(), "/dev/video0", DEFAULT_INPUT_INDEX);
        assert_eq!(spec.command_line(), "v4l2-ctl -d /dev/video0 -i 2");
    }
}
