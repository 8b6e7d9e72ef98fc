//! Ltrace invocation code

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::exec::{self, ExecError, ExecOptions};

/// Ltrace binary name
pub const LTRACE_BIN: &str = "ltrace";

/// Log file ltrace writes to, relative to the current directory
pub const DEFAULT_LOG_FILE: &str = "ltrace_log.txt";

/// Symbol always traced when restricting calls, so that the trace starts with the program's pid
const ENTRY_SYMBOL: &str = "__libc_start_main";

/// How to run ltrace
#[derive(Debug, Clone)]
pub struct TraceOptions {
    /// Tracer binary
    pub tracer: PathBuf,
    /// Ltrace output log path
    pub log_path: PathBuf,
    /// Flags added after the default ones
    pub extra_flags: Vec<String>,
    /// If not empty, only trace these calls
    pub call_types: Vec<String>,
    /// Maximum trace duration, after which the traced program is killed
    pub timeout: Duration,
    /// Traced program stdin
    pub input: Option<String>,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            tracer: PathBuf::from(LTRACE_BIN),
            log_path: PathBuf::from(DEFAULT_LOG_FILE),
            extra_flags: Vec::new(),
            call_types: Vec::new(),
            timeout: exec::DEFAULT_TIMEOUT,
            input: None,
        }
    }
}

impl TraceOptions {
    /// Default options, with a log path unique to this invocation in `dir`, so that several traces
    /// can run in parallel
    #[must_use]
    pub fn with_unique_log(dir: &Path) -> Self {
        let log_path = dir.join(format!("ltrace_log.{:016x}.txt", rand::random::<u64>()));
        Self {
            log_path,
            ..Self::default()
        }
    }

    /// Ltrace arguments, without the traced command
    #[must_use]
    pub fn ltrace_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-f", "-n", "2", "-o"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(self.log_path.clone().into_os_string());
        args.extend(self.extra_flags.iter().map(OsString::from));
        if !self.call_types.is_empty() {
            args.push("-e".into());
            args.push(
                itertools::chain([ENTRY_SYMBOL], self.call_types.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join("+")
                    .into(),
            );
        }
        args
    }

    /// Run command under ltrace, and wait for it to finish.
    ///
    /// Timeout is not an error: the program is killed, and the log written so far is kept.
    pub(crate) fn run<S: AsRef<OsStr>>(&self, command: &[S]) -> Result<(), ExecError> {
        let mut cmd: Vec<OsString> = vec![self.tracer.clone().into_os_string()];
        cmd.extend(self.ltrace_args());
        cmd.extend(command.iter().map(|a| a.as_ref().to_owned()));

        let opts = ExecOptions {
            input: self.input.clone(),
            timeout: self.timeout,
        };
        match exec::exec(&cmd, &opts) {
            Ok(output) => {
                log::debug!("Tracer exited with {:?}", output.status);
                if !output.stderr.is_empty() {
                    log::debug!("Tracer stderr: {:?}", output.stderr);
                }
                Ok(())
            }
            Err(ExecError::Timeout { timeout, .. }) => {
                log::info!("Trace timed out after {timeout:?}, using partial log");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_args() {
        assert_eq!(
            TraceOptions::default().ltrace_args(),
            ["-f", "-n", "2", "-o", "ltrace_log.txt"]
        );
    }

    #[test]
    fn call_types_args() {
        let opts = TraceOptions {
            extra_flags: vec!["-S".to_owned()],
            call_types: vec!["malloc".to_owned(), "free".to_owned()],
            ..TraceOptions::default()
        };
        assert_eq!(
            opts.ltrace_args(),
            [
                "-f",
                "-n",
                "2",
                "-o",
                "ltrace_log.txt",
                "-S",
                "-e",
                "__libc_start_main+malloc+free"
            ]
        );
    }

    #[test]
    fn unique_log() {
        let dir = Path::new("/tmp");
        let a = TraceOptions::with_unique_log(dir);
        let b = TraceOptions::with_unique_log(dir);
        assert!(a.log_path.starts_with(dir));
        assert_ne!(a.log_path, b.log_path);
    }

    #[test]
    fn missing_tracer() {
        let opts = TraceOptions {
            tracer: PathBuf::from("/nonexistent/ltrace"),
            ..TraceOptions::default()
        };
        assert!(matches!(opts.run(&["true"]), Err(ExecError::Spawn { .. })));
    }
}
