//! JLIP serial transport
//!
//! Drives JVC HR-series decks over the Joint Level Interface Protocol.
//! Frames are 11 bytes: `FF FF <id> <7 argument bytes> <checksum>`, and every
//! command is answered with an 11-byte frame of the same shape.
//!
//! Serial I/O is blocking, so each round-trip runs on tokio's blocking pool
//! while the calling task suspends.

use crate::capture::traits::{
    Transport, TransportError, TransportMode, VtrMode, NTSC_FRAMERATE, PAL_FRAMERATE,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Length of every command and response frame
pub const FRAME_LEN: usize = 11;

/// Argument bytes carried by a frame
const ARG_LEN: usize = 7;

const CMD_TURN_ON: &[u8] = &[0x3E, 0x40, 0x70];
const CMD_STOP: &[u8] = &[0x08, 0x44, 0x60];
const CMD_REWIND: &[u8] = &[0x08, 0x44, 0x65];
const CMD_PLAY: &[u8] = &[0x08, 0x43, 0x75];
const CMD_RESET_COUNTER: &[u8] = &[0x48, 0x4D, 0x20];
const CMD_VTR_MODE: &[u8] = &[0x08, 0x4E, 0x20];

/// Command status reported in the low three bits of response byte 3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    NotImplemented,
    Accepted,
    AcceptedNotComplete,
    NotPossible,
    Other(u8),
}

impl CommandStatus {
    pub fn from_byte(byte: u8) -> Self {
        match byte & 0b111 {
            1 => CommandStatus::NotImplemented,
            3 => CommandStatus::Accepted,
            4 => CommandStatus::AcceptedNotComplete,
            5 => CommandStatus::NotPossible,
            other => CommandStatus::Other(other),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandStatus::Accepted | CommandStatus::AcceptedNotComplete)
    }
}

/// JLIP checksum over the first ten bytes of a frame
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes
        .iter()
        .take(FRAME_LEN - 1)
        .fold(0x80u8, |acc, b| acc.wrapping_sub(b & 0x7F));
    sum & 0x7F
}

/// Build a command frame for `jlip_id`, padding `args` with zeros
pub fn build_frame(jlip_id: u8, args: &[u8]) -> Result<[u8; FRAME_LEN], TransportError> {
    if args.len() > ARG_LEN {
        return Err(TransportError::TooManyArguments(args.len()));
    }
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = 0xFF;
    frame[1] = 0xFF;
    frame[2] = jlip_id;
    frame[3..3 + args.len()].copy_from_slice(args);
    frame[FRAME_LEN - 1] = checksum(&frame);
    Ok(frame)
}

/// Decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub raw: [u8; FRAME_LEN],
    pub status: CommandStatus,
}

impl CommandResponse {
    /// Validate the checksum of a raw response
    pub fn from_bytes(raw: [u8; FRAME_LEN]) -> Result<Self, TransportError> {
        let expected = checksum(&raw);
        let received = raw[FRAME_LEN - 1];
        if expected != received {
            return Err(TransportError::Checksum { expected, received });
        }
        Ok(Self {
            raw,
            status: CommandStatus::from_byte(raw[3]),
        })
    }

    /// Interpret the payload as a VTR mode report
    pub fn vtr_mode(&self) -> TransportMode {
        let flags = self.raw[4];
        let format = self.raw[5];
        TransportMode {
            mode: VtrMode::from_nibble(flags),
            hour: self.raw[6],
            minute: self.raw[7],
            second: self.raw[8],
            frame: self.raw[9],
            framerate: if (format >> 2) & 1 == 1 {
                PAL_FRAMERATE
            } else {
                NTSC_FRAMERATE
            },
            tape_inserted: (flags >> 4) & 1 == 0,
            recordable: (flags >> 5) & 1 == 0,
            drop_frame: format & 1 == 1,
        }
    }
}

/// Byte stream the transport talks over. Satisfied by serial ports.
pub trait SerialIo: Read + Write + Send {}

impl<T: Read + Write + Send> SerialIo for T {}

/// Tunables for a JLIP connection
#[derive(Debug, Clone)]
pub struct JlipConfig {
    pub jlip_id: u8,
    /// Treat rejected command statuses as errors
    pub raise_on_error_response: bool,
    /// Pause between writing a command and reading its response
    pub response_delay: Duration,
    /// Minimum spacing of regular commands
    pub command_interval: Duration,
    /// Minimum spacing of fast polls
    pub fast_interval: Duration,
    /// Pause between stopping and starting a rewind
    pub rewind_settle: Duration,
    /// Polling interval while waiting for the deck to finish rewinding
    pub rewind_poll_interval: Duration,
}

impl Default for JlipConfig {
    fn default() -> Self {
        Self {
            jlip_id: 1,
            raise_on_error_response: true,
            response_delay: Duration::from_millis(100),
            // 2 commands/s, 10 polls/s
            command_interval: Duration::from_millis(500),
            fast_interval: Duration::from_millis(100),
            rewind_settle: Duration::from_secs(1),
            rewind_poll_interval: Duration::from_secs(1),
        }
    }
}

struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    async fn acquire(&mut self) {
        if let Some(last) = self.last {
            tokio::time::sleep_until(last + self.interval).await;
        }
        self.last = Some(Instant::now());
    }
}

/// JLIP deck on a serial line
pub struct JlipTransport {
    id: String,
    port: Arc<Mutex<Box<dyn SerialIo>>>,
    config: JlipConfig,
    limiter: RateLimiter,
    fast_limiter: RateLimiter,
}

impl JlipTransport {
    /// Open the serial device: odd parity, RTS/CTS, 2 s timeout
    pub fn open(serial_path: &str, config: JlipConfig) -> Result<Self, TransportError> {
        let port = serialport::new(serial_path, 9600)
            .parity(serialport::Parity::Odd)
            .flow_control(serialport::FlowControl::Hardware)
            .timeout(Duration::from_secs(2))
            .open()
            .map_err(|e| TransportError::Serial(format!("{}: {}", serial_path, e)))?;

        tracing::debug!("Opened JLIP device {} (id {})", serial_path, config.jlip_id);
        Ok(Self::with_port(serial_path.to_string(), Box::new(port), config))
    }

    /// Wrap an already-open byte stream
    pub fn with_port(id: String, port: Box<dyn SerialIo>, config: JlipConfig) -> Self {
        let limiter = RateLimiter::new(config.command_interval);
        let fast_limiter = RateLimiter::new(config.fast_interval);
        Self {
            id,
            port: Arc::new(Mutex::new(port)),
            config,
            limiter,
            fast_limiter,
        }
    }

    /// Send one command and read its response, respecting the rate limits
    pub async fn send_command(
        &mut self,
        args: &[u8],
        fast: bool,
    ) -> Result<CommandResponse, TransportError> {
        if fast {
            self.fast_limiter.acquire().await;
        } else {
            self.limiter.acquire().await;
        }

        let frame = build_frame(self.config.jlip_id, args)?;
        let port = Arc::clone(&self.port);
        let delay = self.config.response_delay;

        let raw = tokio::task::spawn_blocking(move || exchange(&port, &frame, delay))
            .await
            .map_err(|e| TransportError::Task(e.to_string()))??;

        let response = CommandResponse::from_bytes(raw)?;
        if self.config.raise_on_error_response && !response.status.is_accepted() {
            return Err(TransportError::Rejected(raw[3] & 0b111));
        }
        Ok(response)
    }

    pub async fn stop(&mut self) -> Result<CommandResponse, TransportError> {
        self.send_command(CMD_STOP, false).await
    }

    pub async fn rewind(&mut self) -> Result<CommandResponse, TransportError> {
        self.send_command(CMD_REWIND, false).await
    }
}

fn exchange(
    port: &Mutex<Box<dyn SerialIo>>,
    frame: &[u8; FRAME_LEN],
    delay: Duration,
) -> Result<[u8; FRAME_LEN], TransportError> {
    let mut port = port.lock();
    port.write_all(frame)?;
    port.flush()?;
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }

    let mut buf = [0u8; FRAME_LEN];
    let mut filled = 0;
    while filled < FRAME_LEN {
        match port.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if filled < FRAME_LEN {
        return Err(TransportError::ShortResponse {
            expected: FRAME_LEN,
            received: filled,
        });
    }
    Ok(buf)
}

#[async_trait]
impl Transport for JlipTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn power_on(&mut self) -> Result<(), TransportError> {
        self.send_command(CMD_TURN_ON, false).await.map(|_| ())
    }

    async fn rewind_and_wait(&mut self) -> Result<TransportMode, TransportError> {
        self.stop().await?;
        tokio::time::sleep(self.config.rewind_settle).await;
        self.rewind().await?;
        loop {
            let mode = self.query_mode(false).await?;
            if mode.mode != VtrMode::Rewind {
                return Ok(mode);
            }
            tokio::time::sleep(self.config.rewind_poll_interval).await;
        }
    }

    async fn reset_counter(&mut self) -> Result<(), TransportError> {
        self.send_command(CMD_RESET_COUNTER, false).await.map(|_| ())
    }

    async fn begin_playback(&mut self) -> Result<(), TransportError> {
        self.send_command(CMD_PLAY, false).await.map(|_| ())
    }

    async fn query_mode(&mut self, fast: bool) -> Result<TransportMode, TransportError> {
        Ok(self.send_command(CMD_VTR_MODE, fast).await?.vtr_mode())
    }
}
