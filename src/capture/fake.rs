//! Scripted in-memory transport for tests

use super::traits::{Transport, TransportError, TransportMode, VtrMode, NTSC_FRAMERATE};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    /// Modes returned by successive queries; the last one repeats
    pub modes: VecDeque<VtrMode>,
    pub last_mode: Option<VtrMode>,
    pub tape_inserted: bool,
    /// Fail the query with this index (0-based, counting every query)
    pub fail_query_at: Option<usize>,
    pub queries: usize,
    pub calls: Vec<&'static str>,
}

impl FakeState {
    pub fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeTransport {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new<I: IntoIterator<Item = VtrMode>>(modes: I) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                modes: modes.into_iter().collect(),
                tape_inserted: true,
                ..FakeState::default()
            })),
        }
    }

    pub fn without_tape(self) -> Self {
        self.state.lock().tape_inserted = false;
        self
    }

    pub fn failing_query_at(self, index: usize) -> Self {
        self.state.lock().fail_query_at = Some(index);
        self
    }

    fn sample(state: &mut FakeState) -> TransportMode {
        let mode = match state.modes.pop_front() {
            Some(mode) => {
                state.last_mode = Some(mode);
                mode
            }
            None => state.last_mode.unwrap_or(VtrMode::Stop),
        };
        let elapsed = state.queries as u32;
        TransportMode {
            mode,
            hour: 0,
            minute: (elapsed / 60) as u8,
            second: (elapsed % 60) as u8,
            frame: 0,
            framerate: NTSC_FRAMERATE,
            tape_inserted: state.tape_inserted,
            recordable: true,
            drop_frame: false,
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn id(&self) -> &str {
        "fake"
    }

    async fn power_on(&mut self) -> Result<(), TransportError> {
        self.state.lock().calls.push("power_on");
        Ok(())
    }

    async fn rewind_and_wait(&mut self) -> Result<TransportMode, TransportError> {
        let mut state = self.state.lock();
        state.calls.push("rewind_and_wait");
        Ok(Self::idle(&state))
    }

    async fn reset_counter(&mut self) -> Result<(), TransportError> {
        self.state.lock().calls.push("reset_counter");
        Ok(())
    }

    async fn begin_playback(&mut self) -> Result<(), TransportError> {
        self.state.lock().calls.push("begin_playback");
        Ok(())
    }

    /// Slow queries are the pre-flight checks and leave the script alone;
    /// fast queries come from the monitor loop and advance it.
    async fn query_mode(&mut self, fast: bool) -> Result<TransportMode, TransportError> {
        let mut state = self.state.lock();
        if !fast {
            state.calls.push("check_mode");
            return Ok(Self::idle(&state));
        }
        state.calls.push("query_mode");
        let index = state.queries;
        state.queries += 1;
        if state.fail_query_at == Some(index) {
            return Err(TransportError::Serial("port disconnected".to_string()));
        }
        Ok(Self::sample(&mut state))
    }
}

impl FakeTransport {
    fn idle(state: &FakeState) -> TransportMode {
        TransportMode {
            mode: VtrMode::Stop,
            hour: 0,
            minute: 0,
            second: 0,
            frame: 0,
            framerate: NTSC_FRAMERATE,
            tape_inserted: state.tape_inserted,
            recordable: true,
            drop_frame: false,
        }
    }
}
