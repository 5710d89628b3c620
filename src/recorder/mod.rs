//! Capture engine
//!
//! - [`process`]: launching, watching and reaping the external tools
//! - [`monitor`]: the transport polling loop that decides when to stop
//! - [`coordinator`]: the session controller tying the stages together

pub mod coordinator;
pub mod monitor;
pub mod process;
pub mod state;

pub use coordinator::CaptureSession;
pub use monitor::TransportMonitor;
pub use process::{ManagedProcess, ProcessError, ProcessSpec, ProcessSupervisor};
pub use state::{
    AncillaryOutcome, ExitReport, SessionConfig, SessionEvent, SessionOutcome, SessionStage,
    SessionTimings, StopReason,
};
