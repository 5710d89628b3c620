//! Shared utilities

pub mod duration;
pub mod error;

pub use duration::{parse_timespan, DEFAULT_TIMESPAN};
pub use error::{CaptureError, CaptureResult, ErrorResponse};
