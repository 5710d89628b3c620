//! Capture hardware
//!
//! The tape transport capability, its JLIP serial implementation, and the
//! audio device helpers used during pre-flight.

pub mod audio;
pub mod jlip;
pub mod traits;

#[cfg(test)]
pub(crate) mod fake;

pub use audio::{AudioNode, AudioTools, DiscoveryError};
pub use jlip::{JlipConfig, JlipTransport};
pub use traits::{Transport, TransportError, TransportMode, VtrMode};
