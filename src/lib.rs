//! tape-capture - lossless VCR tape capture.
//!
//! Captures a VCR's video and audio through a V4L2/ALSA capture card into a
//! lossless file, steering a JLIP-controlled deck and stopping when the
//! tape stops playing.

pub mod capture;
pub mod commands;
pub mod encoder;
pub mod recorder;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(debug: bool) {
    let default = if debug {
        "tape_capture=debug"
    } else {
        "tape_capture=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
