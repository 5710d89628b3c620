//! Encoder and capture tool invocation
//!
//! Builds the process specs for the primary encoder, the VBI ancillary
//! capture and the capture card input switch.

pub mod ffmpeg;
pub mod types;
pub mod v4l2;
pub mod vbi;

pub use ffmpeg::{encoder_spec, probe_spec};
pub use types::{sidecar_path, EncoderOptions, DURATION_PADDING, THREAD_QUEUE_SIZE};
pub use v4l2::input_select_spec;
pub use vbi::vbi_spec;
