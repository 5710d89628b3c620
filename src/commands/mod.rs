//! Command handlers
//!
//! Glue between the command line and the capture engine.

pub mod capture;

pub use capture::{capture, CaptureRequest, Toolchain};
