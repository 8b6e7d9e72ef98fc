//! Subprocess execution with timeout and process group handling

use std::{
    ffi::OsStr,
    io,
    time::{Duration, Instant},
};

use nix::{
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use subprocess::{ExitStatus, Popen, PopenConfig, PopenError, Redirection};

/// Default timeout for a simple command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between SIGTERM and SIGKILL when terminating a process group
const TERMINATE_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Errors raised when executing a command
#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    /// Command line has no program
    #[error("Empty command")]
    EmptyCommand,
    /// Program could not be started
    #[error("Failed to start {program:?}: {source}")]
    Spawn {
        /// Program name or path
        program: String,
        /// Underlying error
        source: PopenError,
    },
    /// Process group did not exit in time, and was killed
    #[error("Command {program:?} timed out after {timeout:?}")]
    Timeout {
        /// Program name or path
        program: String,
        /// Timeout that expired
        timeout: Duration,
    },
    /// Long running process exited before we killed it
    #[error("Process {program:?} exited abnormally with status {status:?}")]
    ExitedAbnormally {
        /// Program name or path
        program: String,
        /// Exit status
        status: ExitStatus,
    },
    /// Failed to signal process group
    #[error("Failed to send {signal} to process group {pgid}: {source}")]
    Signal {
        /// Process group id
        pgid: i32,
        /// Signal we tried to send
        signal: Signal,
        /// Underlying error
        source: nix::Error,
    },
    /// Waiting for the process failed
    #[error("Failed to wait for process: {0}")]
    Wait(#[from] PopenError),
    /// Stdin/stdout/stderr failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Options for a single command execution
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Text fed to the command stdin, stdin is closed immediately if `None`
    pub input: Option<String>,
    /// Maximum run time for the whole process group
    pub timeout: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            input: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ExecOptions {
    /// Options with given timeout and no input
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
    /// Exit status
    pub status: ExitStatus,
}

impl Output {
    fn new(capture: (Option<Vec<u8>>, Option<Vec<u8>>), status: ExitStatus) -> Self {
        let decode = |b: Option<Vec<u8>>| String::from_utf8_lossy(&b.unwrap_or_default()).into_owned();
        Self {
            stdout: decode(capture.0),
            stderr: decode(capture.1),
            status,
        }
    }

    /// Exit code, `None` if the process was killed by a signal
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self.status {
            ExitStatus::Exited(code) => i32::try_from(code).ok(),
            _ => None,
        }
    }

    /// Signal that killed the process, if any
    #[must_use]
    pub fn signal(&self) -> Option<i32> {
        match self.status {
            ExitStatus::Signaled(signal) => Some(i32::from(signal)),
            _ => None,
        }
    }
}

fn program_name<S: AsRef<OsStr>>(command: &[S]) -> Result<String, ExecError> {
    let first = command.first().ok_or(ExecError::EmptyCommand)?;
    Ok(first.as_ref().to_string_lossy().into_owned())
}

/// Start command as the leader of a new process group, with all standard streams piped
fn spawn_group<S: AsRef<OsStr>>(command: &[S]) -> Result<(String, Popen, i32), ExecError> {
    let program = program_name(command)?;
    let popen = Popen::create(
        command,
        PopenConfig {
            stdin: Redirection::Pipe,
            stdout: Redirection::Pipe,
            stderr: Redirection::Pipe,
            setpgid: true,
            ..PopenConfig::default()
        },
    )
    .map_err(|source| ExecError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pgid = popen
        .pid()
        .and_then(|p| i32::try_from(p).ok())
        .ok_or_else(|| io::Error::other(format!("No pid for {program:?}")))?;
    log::debug!("Started {program:?} as process group {pgid}");
    Ok((program, popen, pgid))
}

fn signal_group(pgid: i32, signal: Signal) -> Result<(), ExecError> {
    match killpg(Pid::from_raw(pgid), signal) {
        // Group is already gone
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(source) => Err(ExecError::Signal {
            pgid,
            signal,
            source,
        }),
    }
}

/// Terminate the whole process group led by popen, and reap the leader
fn terminate_group(popen: &mut Popen, pgid: i32) -> Result<ExitStatus, ExecError> {
    log::debug!("Sending SIGTERM to process group {pgid}");
    signal_group(pgid, Signal::SIGTERM)?;
    if let Some(status) = popen.wait_timeout(TERMINATE_GRACE_PERIOD)? {
        // Leader is gone, make sure nothing it spawned survives
        signal_group(pgid, Signal::SIGKILL)?;
        return Ok(status);
    }
    log::debug!("Process group {pgid} still alive, sending SIGKILL");
    signal_group(pgid, Signal::SIGKILL)?;
    Ok(popen.wait()?)
}

/// Terminate group after a timeout, and build the error to report
fn timeout_error(popen: &mut Popen, pgid: i32, program: String, timeout: Duration) -> ExecError {
    log::warn!("{program:?} timed out after {timeout:?}, killing it");
    match terminate_group(popen, pgid) {
        Ok(_) => ExecError::Timeout { program, timeout },
        Err(e) => e,
    }
}

/// Run a command in a new process group, feeding it input and capturing its output.
///
/// The timeout covers the whole group: output is read until every process holding the output
/// pipes is gone, and the leader is reaped. If this does not happen before the timeout, the whole
/// group is terminated and [`ExecError::Timeout`] is returned. Processes of the group still alive
/// after a normal exit are killed.
pub fn exec<S: AsRef<OsStr>>(command: &[S], opts: &ExecOptions) -> Result<Output, ExecError> {
    log::debug!(
        "Running {:?} with timeout {:?}",
        command
            .iter()
            .map(|a| a.as_ref().to_string_lossy())
            .collect::<Vec<_>>(),
        opts.timeout
    );
    let (program, mut popen, pgid) = spawn_group(command)?;
    let deadline = Instant::now() + opts.timeout;
    let input = opts.input.clone().unwrap_or_default().into_bytes();
    let capture = match popen
        .communicate_start(Some(input))
        .limit_time(opts.timeout)
        .read()
    {
        Ok(capture) => capture,
        Err(e) if e.error.kind() == io::ErrorKind::TimedOut => {
            return Err(timeout_error(&mut popen, pgid, program, opts.timeout));
        }
        Err(e) if e.error.kind() == io::ErrorKind::BrokenPipe => {
            log::debug!("{program:?} closed its stdin before reading all input");
            e.capture
        }
        Err(e) => {
            let _ = terminate_group(&mut popen, pgid);
            return Err(e.error.into());
        }
    };

    // Output pipes are closed, but the leader may still be running
    let Some(status) = popen.wait_timeout(deadline.saturating_duration_since(Instant::now()))?
    else {
        return Err(timeout_error(&mut popen, pgid, program, opts.timeout));
    };
    // Children that closed their output are not waited for
    signal_group(pgid, Signal::SIGKILL)?;
    log::debug!("{program:?} exited with {status:?}");

    Ok(Output::new(capture, status))
}

/// A non terminating process (typically a server) that runs while a test interacts with it
#[derive(Debug)]
pub struct OngoingProcess {
    program: String,
    pgid: i32,
    popen: Option<Popen>,
}

impl OngoingProcess {
    /// Start process in a new process group, with piped stdin/stdout/stderr
    pub fn spawn<S: AsRef<OsStr>>(command: &[S]) -> Result<Self, ExecError> {
        let (program, popen, pgid) = spawn_group(command)?;
        Ok(Self {
            program,
            pgid,
            popen: Some(popen),
        })
    }

    /// OS process id, `None` once reaped
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.popen.as_ref().and_then(Popen::pid)
    }

    /// Kill the process group and collect the leader output.
    ///
    /// If `check_killed` is set, fail if the process was not killed by us, which
    /// means it exited (or crashed) before the end of the test.
    pub fn finish(mut self, check_killed: bool) -> Result<Output, ExecError> {
        let Some(mut popen) = self.popen.take() else {
            return Err(ExecError::Io(io::Error::other("Process already finished")));
        };
        signal_group(self.pgid, Signal::SIGKILL)?;
        let capture = popen
            .communicate_start(Some(Vec::new()))
            .limit_time(TERMINATE_GRACE_PERIOD)
            .read()
            .unwrap_or_else(|e| {
                log::warn!("Failed to read output of {:?}: {}", self.program, e.error);
                e.capture
            });
        let output = Output::new(capture, popen.wait()?);
        if check_killed && output.signal() != Some(Signal::SIGKILL as i32) {
            return Err(ExecError::ExitedAbnormally {
                program: self.program.clone(),
                status: output.status,
            });
        }
        Ok(output)
    }
}

impl Drop for OngoingProcess {
    fn drop(&mut self) {
        if let Some(mut popen) = self.popen.take() {
            let _ = signal_group(self.pgid, Signal::SIGKILL);
            let _ = popen.wait();
        }
    }
}
