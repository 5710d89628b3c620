//! Transport capability
//!
//! The tape deck as the capture engine sees it: a handful of commands and a
//! mode query. Concrete decks implement [`Transport`]; the session controller
//! and monitor loop only ever talk to this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// NTSC counter framerate
pub const NTSC_FRAMERATE: u8 = 30;

/// PAL counter framerate
pub const PAL_FRAMERATE: u8 = 25;

/// Transport (deck) mode as reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VtrMode {
    Eject,
    Stop,
    FastForward,
    Rewind,
    PlayBackward,
    PlayForward,
    Pause,
    RecordPause,
    Record,
    NoMode,
    /// A mode nibble the deck reported that has no known meaning
    Unknown(u8),
}

impl VtrMode {
    /// Decode the low nibble of a JLIP VTR mode status byte
    pub fn from_nibble(value: u8) -> Self {
        match value & 0x0F {
            0b0000 => VtrMode::Eject,
            0b0001 => VtrMode::Stop,
            0b0010 => VtrMode::FastForward,
            0b0011 => VtrMode::Rewind,
            0b0101 => VtrMode::PlayBackward,
            0b0110 => VtrMode::PlayForward,
            0b0111 => VtrMode::Pause,
            0b1101 => VtrMode::RecordPause,
            0b1110 => VtrMode::Record,
            0b1111 => VtrMode::NoMode,
            other => VtrMode::Unknown(other),
        }
    }

    pub fn is_playing_forward(&self) -> bool {
        matches!(self, VtrMode::PlayForward)
    }
}

impl fmt::Display for VtrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VtrMode::Eject => write!(f, "EJECT"),
            VtrMode::Stop => write!(f, "STOP"),
            VtrMode::FastForward => write!(f, "FF"),
            VtrMode::Rewind => write!(f, "REW"),
            VtrMode::PlayBackward => write!(f, "PLAY_BWD"),
            VtrMode::PlayForward => write!(f, "PLAY_FWD"),
            VtrMode::Pause => write!(f, "PAUSE"),
            VtrMode::RecordPause => write!(f, "REC_PAUSE"),
            VtrMode::Record => write!(f, "REC"),
            VtrMode::NoMode => write!(f, "NO_MODE"),
            VtrMode::Unknown(n) => write!(f, "UNKNOWN({:#06b})", n),
        }
    }
}

/// One sample of the deck's transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportMode {
    pub mode: VtrMode,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub frame: u8,
    /// Counter framerate (25 or 30)
    pub framerate: u8,
    pub tape_inserted: bool,
    pub recordable: bool,
    pub drop_frame: bool,
}

impl TransportMode {
    /// Tape counter as `HH:MM:SS.mmmm`, the frame converted to milliseconds
    pub fn counter(&self) -> String {
        let framerate = if self.framerate == 0 {
            NTSC_FRAMERATE
        } else {
            self.framerate
        };
        let millis = (f64::from(self.frame) / f64::from(framerate)) * 1000.0;
        format!(
            "{:02}:{:02}:{:02}.{:04.0}",
            self.hour, self.minute, self.second, millis
        )
    }
}

/// Transport communication errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Short response: expected {expected} bytes, received {received}")]
    ShortResponse { expected: usize, received: usize },

    #[error("Checksum did not match. Expected {expected} but received {received}")]
    Checksum { expected: u8, received: u8 },

    #[error("Command rejected with status {0}")]
    Rejected(u8),

    #[error("Too many command arguments: {0}")]
    TooManyArguments(usize),

    #[error("Transport task failed: {0}")]
    Task(String),
}

/// Hardware operations the capture engine needs from a tape deck.
///
/// Callers hold the transport mutably, so a deck is never polled and
/// commanded from two places at once.
#[async_trait]
pub trait Transport: Send {
    /// Human-readable identifier for logs
    fn id(&self) -> &str;

    /// Power the deck on
    async fn power_on(&mut self) -> Result<(), TransportError>;

    /// Stop, rewind, and return once the deck has left rewind
    async fn rewind_and_wait(&mut self) -> Result<TransportMode, TransportError>;

    /// Reset the tape counter to zero
    async fn reset_counter(&mut self) -> Result<(), TransportError>;

    /// Start forward playback
    async fn begin_playback(&mut self) -> Result<(), TransportError>;

    /// Sample the current transport mode. `fast` selects the higher
    /// polling rate budget used while monitoring.
    async fn query_mode(&mut self, fast: bool) -> Result<TransportMode, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(frame: u8, framerate: u8) -> TransportMode {
        TransportMode {
            mode: VtrMode::PlayForward,
            hour: 1,
            minute: 2,
            second: 3,
            frame,
            framerate,
            tape_inserted: true,
            recordable: true,
            drop_frame: false,
        }
    }

    #[test]
    fn test_mode_nibbles() {
        assert_eq!(VtrMode::from_nibble(0b0110), VtrMode::PlayForward);
        assert_eq!(VtrMode::from_nibble(0b0101), VtrMode::PlayBackward);
        assert_eq!(VtrMode::from_nibble(0b0001), VtrMode::Stop);
        assert_eq!(VtrMode::from_nibble(0b0011), VtrMode::Rewind);
        // High bits carry tape flags and are ignored
        assert_eq!(VtrMode::from_nibble(0b0011_0110), VtrMode::PlayForward);
        assert_eq!(VtrMode::from_nibble(0b1000), VtrMode::Unknown(0b1000));
    }

    #[test]
    fn test_only_play_forward_counts_as_playing() {
        assert!(VtrMode::PlayForward.is_playing_forward());
        assert!(!VtrMode::PlayBackward.is_playing_forward());
        assert!(!VtrMode::Pause.is_playing_forward());
    }

    #[test]
    fn test_counter_formatting() {
        assert_eq!(sample(15, 30).counter(), "01:02:03.0500");
        assert_eq!(sample(0, 25).counter(), "01:02:03.0000");
    }

    #[test]
    fn test_counter_tolerates_zero_framerate() {
        assert_eq!(sample(3, 0).counter(), "01:02:03.0100");
    }
}
