//! Expected program output checks

use std::{fmt, time::Duration};

use crate::{
    exec::{ExecError, ExecOptions, Output},
    executable::Executable,
};

/// Default timeout of a single expectation run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// How expected output is compared to actual output
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MatchMode {
    /// Output must be equal
    #[default]
    Exact,
    /// Expected output (right trimmed) must be found in output
    Substring,
}

/// Output stream, or exit status
#[derive(Debug, Clone, Copy, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
    /// Exit status
    Status,
}

/// Why a run does not meet its expectation
#[derive(thiserror::Error, Debug)]
pub enum ExpectError {
    /// Program could not run to completion
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// Program ran, but not as expected
    #[error("Unexpected {stream} ({mode}): expected {expected:?}, got {actual:?}")]
    Mismatch {
        /// Mismatching stream
        stream: Stream,
        /// Comparison mode
        mode: MatchMode,
        /// Expected value
        expected: String,
        /// Actual value
        actual: String,
    },
}

/// Arguments, input, and expected stdout/stderr/exit status of a program run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputExpectation {
    /// Command line arguments
    pub args: Vec<String>,
    /// Stdin content
    pub input: Option<String>,
    /// Expected stdout, not checked if `None`
    pub stdout: Option<String>,
    /// Expected stderr, not checked if `None`
    pub stderr: Option<String>,
    /// Expected exit code, not checked if `None`
    pub status: Option<i32>,
    /// Timeout, reaching it fails the expectation
    pub timeout: Duration,
    /// Ignore trailing whitespace (exact mode only)
    pub rstrip: bool,
    /// Also accept expected stderr found in stdout (exact mode only)
    pub stderr_relax: bool,
    /// Comparison mode
    pub mode: MatchMode,
    /// Human readable description
    pub doc: String,
}

impl Default for OutputExpectation {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            input: None,
            stdout: Some(String::new()),
            stderr: Some(String::new()),
            status: Some(0),
            timeout: DEFAULT_TIMEOUT,
            rstrip: false,
            stderr_relax: false,
            mode: MatchMode::Exact,
            doc: String::new(),
        }
    }
}

impl OutputExpectation {
    /// Expect given stdout, empty stderr and successful exit for arguments
    #[must_use]
    pub fn new<S: Into<String>>(args: Vec<String>, stdout: S) -> Self {
        Self {
            args,
            stdout: Some(stdout.into()),
            ..Self::default()
        }
    }

    /// Set stdin content
    #[must_use]
    pub fn input<S: Into<String>>(mut self, input: S) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Set expected stderr, `None` to not check it
    #[must_use]
    pub fn stderr(mut self, stderr: Option<String>) -> Self {
        self.stderr = stderr;
        self
    }

    /// Set expected exit code, `None` to not check it
    #[must_use]
    pub fn status(mut self, status: Option<i32>) -> Self {
        self.status = status;
        self
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ignore trailing whitespace
    #[must_use]
    pub fn rstrip(mut self) -> Self {
        self.rstrip = true;
        self
    }

    /// Accept expected stderr in stdout
    #[must_use]
    pub fn stderr_relax(mut self) -> Self {
        self.stderr_relax = true;
        self
    }

    /// Set comparison mode
    #[must_use]
    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set description
    #[must_use]
    pub fn doc<S: Into<String>>(mut self, doc: S) -> Self {
        self.doc = doc.into();
        self
    }

    /// Run program and check its output
    pub fn check(&self, exe: &Executable) -> Result<Output, ExpectError> {
        let opts = ExecOptions {
            input: self.input.clone(),
            timeout: self.timeout,
        };
        let output = exe.run(&self.args, &opts)?;
        self.verify(&output)?;
        Ok(output)
    }

    /// Check output of a program that already ran
    pub fn verify(&self, output: &Output) -> Result<(), ExpectError> {
        match self.mode {
            MatchMode::Exact => self.verify_exact(output)?,
            MatchMode::Substring => self.verify_substring(output)?,
        }
        if let Some(expected) = self.status {
            if output.code() != Some(expected) {
                return Err(self.mismatch(
                    Stream::Status,
                    expected,
                    format!("{:?}", output.status),
                ));
            }
        }
        Ok(())
    }

    fn verify_exact(&self, output: &Output) -> Result<(), ExpectError> {
        let strip = |s: &str| -> String {
            if self.rstrip {
                s.trim_end().to_owned()
            } else {
                s.to_owned()
            }
        };
        let (stdout, stderr) = (strip(&output.stdout), strip(&output.stderr));

        if let Some(expected) = self.stderr.as_deref().map(strip) {
            let relaxed = self.stderr_relax && stdout.contains(&expected);
            if !relaxed && stderr != expected {
                return Err(self.mismatch(Stream::Stderr, expected, stderr));
            }
        }
        if let Some(expected) = self.stdout.as_deref().map(strip) {
            if stdout != expected {
                return Err(self.mismatch(Stream::Stdout, expected, stdout));
            }
        }
        Ok(())
    }

    fn verify_substring(&self, output: &Output) -> Result<(), ExpectError> {
        for (stream, expected, actual) in [
            (Stream::Stderr, &self.stderr, &output.stderr),
            (Stream::Stdout, &self.stdout, &output.stdout),
        ] {
            if let Some(expected) = expected.as_deref().map(str::trim_end) {
                if !actual.contains(expected) {
                    return Err(self.mismatch(stream, expected, actual));
                }
            }
        }
        Ok(())
    }

    fn mismatch<E: fmt::Display, A: fmt::Display>(
        &self,
        stream: Stream,
        expected: E,
        actual: A,
    ) -> ExpectError {
        ExpectError::Mismatch {
            stream,
            mode: self.mode,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sh() -> Executable {
        Executable::new("sh")
    }

    fn script(s: &str) -> Vec<String> {
        vec!["-c".to_owned(), s.to_owned()]
    }

    #[test]
    fn exact_ok() {
        let output = OutputExpectation::new(script("echo hello"), "hello\n")
            .check(&sh())
            .unwrap();
        assert_eq!(output.stdout, "hello\n");
    }

    #[test]
    fn exact_stdout_mismatch() {
        let err = OutputExpectation::new(script("echo hello"), "hello")
            .check(&sh())
            .unwrap_err();
        assert!(
            matches!(err, ExpectError::Mismatch { stream: Stream::Stdout, ref actual, .. } if actual == "hello\n"),
            "{err:?}"
        );
    }

    #[test]
    fn rstrip() {
        OutputExpectation::new(script("echo 'hello  '; echo err >&2"), "hello\n\n")
            .stderr(Some("err".to_owned()))
            .rstrip()
            .check(&sh())
            .unwrap();
    }

    #[test]
    fn input_and_status() {
        OutputExpectation::new(script("cat; exit 4"), "some input")
            .input("some input")
            .status(Some(4))
            .check(&sh())
            .unwrap();

        let err = OutputExpectation::new(script("exit 4"), "")
            .check(&sh())
            .unwrap_err();
        assert!(
            matches!(err, ExpectError::Mismatch { stream: Stream::Status, .. }),
            "{err:?}"
        );
    }

    #[test]
    fn unchecked_streams() {
        let exp = OutputExpectation {
            args: script("echo out; echo err >&2; exit 1"),
            stdout: None,
            stderr: None,
            status: None,
            ..OutputExpectation::default()
        };
        exp.check(&sh()).unwrap();
    }

    #[test]
    fn stderr_relax() {
        let exp = OutputExpectation::new(script("echo 'usage: prog'"), "usage: prog\n")
            .stderr(Some("usage".to_owned()));
        assert!(exp.check(&sh()).is_err());
        exp.stderr_relax().check(&sh()).unwrap();
    }

    #[test]
    fn substring() {
        OutputExpectation::new(script("echo 'a b c'; echo 'warning: x' >&2"), "b c\n")
            .stderr(Some("warning".to_owned()))
            .mode(MatchMode::Substring)
            .check(&sh())
            .unwrap();

        let err = OutputExpectation::new(script("echo 'a b c'"), "d")
            .mode(MatchMode::Substring)
            .check(&sh())
            .unwrap_err();
        assert!(
            matches!(err, ExpectError::Mismatch { stream: Stream::Stdout, mode: MatchMode::Substring, .. }),
            "{err:?}"
        );
    }

    #[test]
    fn timeout() {
        let err = OutputExpectation::new(script("sleep 10"), "")
            .timeout(Duration::from_millis(100))
            .check(&sh())
            .unwrap_err();
        assert!(matches!(err, ExpectError::Exec(ExecError::Timeout { .. })), "{err:?}");
    }
}
