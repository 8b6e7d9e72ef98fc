//! Ltrace log parsing and querying

use std::{
    collections::HashMap,
    ffi::OsStr,
    fs, io,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    exec::ExecError,
    ltrace::{Call, CallKind, CallRecord, Classifier, DEFAULT_CLASSIFIER, TraceOptions},
};

/// Leading pid of a line
#[expect(clippy::unwrap_used)]
static FIRST_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([0-9]+)\s*.").unwrap());

/// Event name of a process exit
const EXITED_EVENT: &str = "exited";

/// Calls of each process, in log order
pub type ProcessLog = HashMap<String, Vec<Call>>;

/// Errors that make a trace unusable
#[derive(thiserror::Error, Debug)]
pub enum TraceError {
    /// Ltrace could not be run
    #[error("Failed to run ltrace: {0}")]
    Exec(#[from] ExecError),
    /// Ltrace log could not be read
    #[error("Failed to read ltrace log {path:?}: {source}")]
    ReadLog {
        /// Log path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// Log of a previous run could not be removed
    #[error("Failed to remove previous ltrace log {path:?}: {source}")]
    RemoveLog {
        /// Log path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// Ltrace wrote nothing
    #[error("Empty ltrace log")]
    EmptyLog,
    /// First line does not start with a pid, so ltrace itself is not working
    #[error("First line of ltrace log does not start with a pid: {line:?}")]
    FirstLineNotPid {
        /// Offending line
        line: String,
    },
}

/// Parsed result of a ltrace run
#[derive(Debug, Clone)]
pub struct Trace {
    raw: String,
    first_pid: String,
    records: Vec<CallRecord>,
    process_log: ProcessLog,
}

/// Decode bytes as UTF-8, dropping invalid sequences
fn decode_lossy(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|c| c.valid()).collect()
}

impl Trace {
    /// Run command under ltrace and parse its log.
    ///
    /// If the command does not finish before the timeout, it is killed and the partial log is parsed.
    /// A log left at the same path by a previous run is removed first, so that it is never parsed
    /// if ltrace fails before writing its own.
    pub fn run<S: AsRef<OsStr>>(command: &[S], opts: &TraceOptions) -> Result<Self, TraceError> {
        match fs::remove_file(&opts.log_path) {
            Ok(()) => log::debug!("Removed previous log {:?}", opts.log_path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(TraceError::RemoveLog {
                    path: opts.log_path.clone(),
                    source,
                });
            }
        }
        opts.run(command)?;
        Self::from_log_file(&opts.log_path)
    }

    /// Parse an existing ltrace log file
    pub fn from_log_file(path: &Path) -> Result<Self, TraceError> {
        let bytes = fs::read(path).map_err(|source| TraceError::ReadLog {
            path: path.to_owned(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    /// Parse raw ltrace output, bytes that are not valid UTF-8 are dropped
    pub fn from_bytes(raw: &[u8]) -> Result<Self, TraceError> {
        Self::parse_with(decode_lossy(raw), &DEFAULT_CLASSIFIER)
    }

    /// Parse decoded ltrace output with a custom classifier
    pub fn parse_with(raw: String, classifier: &Classifier) -> Result<Self, TraceError> {
        let first_line = raw.lines().next().ok_or(TraceError::EmptyLog)?;
        let first_pid = FIRST_LINE_REGEX
            .captures(first_line)
            .and_then(|c| c.get(1))
            .ok_or_else(|| TraceError::FirstLineNotPid {
                line: first_line.to_owned(),
            })?
            .as_str()
            .to_owned();

        let mut records = Vec::new();
        let mut process_log = ProcessLog::new();
        for line in raw.lines() {
            let Some(record) = classifier.classify(line).into_record() else {
                log::trace!("Ignored line: {line:?}");
                continue;
            };
            process_log
                .entry(record.pid.clone())
                .or_default()
                .push(record.call.clone());
            records.push(record);
        }
        log::debug!(
            "Parsed {} calls from {} processes, first pid {first_pid}",
            records.len(),
            process_log.len()
        );

        Ok(Self {
            raw,
            first_pid,
            records,
            process_log,
        })
    }

    /// Full decoded ltrace output
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Pid of the first traced process
    #[must_use]
    pub fn first_pid(&self) -> &str {
        &self.first_pid
    }

    /// All records, in log order
    #[must_use]
    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }

    /// Calls grouped by pid
    #[must_use]
    pub fn process_log(&self) -> &ProcessLog {
        &self.process_log
    }

    /// Pids seen in the log, in numerical order
    #[must_use]
    pub fn pids(&self) -> Vec<&str> {
        let mut pids: Vec<&str> = self.process_log.keys().map(String::as_str).collect();
        pids.sort_unstable_by_key(|p| (p.len(), *p));
        pids
    }

    /// Exit status of a process, `None` if the pid is unknown or if it did not exit normally
    #[must_use]
    pub fn status(&self, pid: &str) -> Option<i32> {
        let detail = self
            .process_log
            .get(pid)?
            .iter()
            .find(|c| c.kind() == CallKind::Special && c.name() == EXITED_EVENT)?
            .args();
        let status = detail.split_whitespace().next_back()?;
        match status.parse() {
            Ok(s) => Some(s),
            Err(e) => {
                log::warn!("Unable to parse exit status from {detail:?}: {e}");
                None
            }
        }
    }

    /// Calls of a process, in log order.
    ///
    /// If `matching` is not empty, only return calls with this exact name.
    /// An unknown pid yields no calls.
    #[must_use]
    pub fn lines_for_pid(&self, pid: &str, matching: &str) -> Vec<&Call> {
        self.process_log
            .get(pid)
            .map(|calls| {
                calls
                    .iter()
                    .filter(|c| matching.is_empty() || c.name() == matching)
                    .collect()
            })
            .unwrap_or_default()
    }
}
