//! Process supervision
//!
//! Launches the external capture tools, tracks their liveness and exit
//! status, and tears them down. Every external command the engine runs goes
//! through here so that spawning, logging and reaping behave the same way.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};
use thiserror::Error;
use tokio::process::{Child, Command};

/// How a standard stream of a spawned process is wired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioMode {
    Null,
    Piped,
    Inherit,
}

impl StdioMode {
    fn to_stdio(self) -> Stdio {
        match self {
            StdioMode::Null => Stdio::null(),
            StdioMode::Piped => Stdio::piped(),
            StdioMode::Inherit => Stdio::inherit(),
        }
    }
}

/// Everything needed to start one external process
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Short name used in logs and errors
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Environment overrides layered on top of the inherited environment
    pub env: BTreeMap<String, String>,
    pub stdin: StdioMode,
    pub stdout: StdioMode,
    pub stderr: StdioMode,
    /// File the process is expected to produce, if any
    pub output_path: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            stdin: StdioMode::Null,
            stdout: StdioMode::Inherit,
            stderr: StdioMode::Inherit,
            output_path: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdio(mut self, stdin: StdioMode, stdout: StdioMode, stderr: StdioMode) -> Self {
        self.stdin = stdin;
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Shell-quoted command line, for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.args.iter().cloned())
            .map(|a| shell_quote(&a))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(self.stdin.to_stdio())
            .stdout(self.stdout.to_stdio())
            .stderr(self.stderr.to_stdio());
        cmd
    }
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r#"'"'"'"#))
    }
}

/// Process supervision errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {label}: {source}")]
    Wait {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal {label}: {source}")]
    Signal {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("a {0} process is already running in this session")]
    AlreadyLaunched(String),

    #[error("no {0} process has been launched")]
    NotLaunched(String),
}

/// One spawned external process
pub struct ManagedProcess {
    label: String,
    pid: Option<u32>,
    child: Child,
    status: Option<ExitStatus>,
    terminate_requested: bool,
    output_path: Option<PathBuf>,
    os_wait_calls: u32,
}

impl ManagedProcess {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Exit status, once observed
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate_requested
    }

    /// Number of times the OS wait primitive has been consulted
    pub fn os_wait_calls(&self) -> u32 {
        self.os_wait_calls
    }

    /// Non-blocking liveness check. Reaps and caches the status on exit.
    pub fn is_alive(&mut self) -> Result<bool, ProcessError> {
        if self.status.is_some() {
            return Ok(false);
        }
        self.os_wait_calls += 1;
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status);
                Ok(false)
            }
            Ok(None) => Ok(true),
            Err(source) => Err(ProcessError::Wait {
                label: self.label.clone(),
                source,
            }),
        }
    }

    /// Request a graceful stop.
    ///
    /// A no-op once the process has exited or a request was already sent.
    pub fn terminate(&mut self) -> Result<(), ProcessError> {
        if self.terminate_requested || !self.is_alive()? {
            return Ok(());
        }
        tracing::debug!("Terminating {} (PID {:?})", self.label, self.pid);
        self.send_terminate().map_err(|source| ProcessError::Signal {
            label: self.label.clone(),
            source,
        })?;
        self.terminate_requested = true;
        Ok(())
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) -> std::io::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let pid = libc::pid_t::try_from(pid)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        // SAFETY: kill(2) has no memory-safety preconditions. The child has
        // not been reaped (no cached status), so the pid still belongs to it.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }

    /// Wait for the process to exit.
    ///
    /// Returns the cached status without another OS wait once the exit has
    /// been observed.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        self.os_wait_calls += 1;
        let status = self.child.wait().await.map_err(|source| ProcessError::Wait {
            label: self.label.clone(),
            source,
        })?;
        self.record_exit(status);
        Ok(status)
    }

    fn record_exit(&mut self, status: ExitStatus) {
        tracing::debug!("{} exited with {}", self.label, status);
        self.status = Some(status);
    }
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("label", &self.label)
            .field("pid", &self.pid)
            .field("status", &self.status)
            .field("terminate_requested", &self.terminate_requested)
            .finish()
    }
}

/// Owns the session's capture processes: at most one primary encoder and
/// at most one ancillary capture.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    primary: Option<ManagedProcess>,
    ancillary: Option<ManagedProcess>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a process. Does not suspend.
    pub fn launch(spec: &ProcessSpec) -> Result<ManagedProcess, ProcessError> {
        tracing::debug!("Executing: {}", spec.command_line());
        let child = spec.command().spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.to_string_lossy().to_string(),
            source,
        })?;
        let pid = child.id();
        tracing::debug!("{} PID: {:?}", spec.label, pid);
        Ok(ManagedProcess {
            label: spec.label.clone(),
            pid,
            child,
            status: None,
            terminate_requested: false,
            output_path: spec.output_path.clone(),
            os_wait_calls: 0,
        })
    }

    /// Run a helper command to completion
    pub async fn run(spec: &ProcessSpec) -> Result<ExitStatus, ProcessError> {
        let mut process = Self::launch(spec)?;
        process.wait().await
    }

    /// Run a helper command to completion, capturing stdout and stderr
    pub async fn output(spec: &ProcessSpec) -> Result<Output, ProcessError> {
        tracing::debug!("Executing: {}", spec.command_line());
        let mut cmd = spec.command();
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.output().await.map_err(|source| ProcessError::Spawn {
            program: spec.program.to_string_lossy().to_string(),
            source,
        })
    }

    pub fn launch_primary(
        &mut self,
        spec: &ProcessSpec,
    ) -> Result<&mut ManagedProcess, ProcessError> {
        if self.primary.is_some() {
            return Err(ProcessError::AlreadyLaunched("primary".to_string()));
        }
        Ok(self.primary.insert(Self::launch(spec)?))
    }

    pub fn launch_ancillary(
        &mut self,
        spec: &ProcessSpec,
    ) -> Result<&mut ManagedProcess, ProcessError> {
        if self.ancillary.is_some() {
            return Err(ProcessError::AlreadyLaunched("ancillary".to_string()));
        }
        Ok(self.ancillary.insert(Self::launch(spec)?))
    }

    pub fn primary(&self) -> Option<&ManagedProcess> {
        self.primary.as_ref()
    }

    pub fn primary_mut(&mut self) -> Option<&mut ManagedProcess> {
        self.primary.as_mut()
    }

    pub fn ancillary(&self) -> Option<&ManagedProcess> {
        self.ancillary.as_ref()
    }

    pub fn ancillary_mut(&mut self) -> Option<&mut ManagedProcess> {
        self.ancillary.as_mut()
    }

    /// Terminate and reap everything, primary first. Used on abort paths;
    /// errors are logged so that every process still gets reaped.
    pub async fn shutdown_all(&mut self) {
        for process in [self.primary.as_mut(), self.ancillary.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = process.terminate() {
                tracing::warn!("{}", e);
            }
            match process.wait().await {
                Ok(status) => tracing::debug!("{} stopped with {}", process.label(), status),
                Err(e) => tracing::warn!("{}", e),
            }
        }
    }
}
