//! Ltrace related code

use std::{fmt, io::BufRead as _, process::Command};

mod classify;
mod run;
mod trace;

pub use classify::{
    Classification, Classifier, ClassifierError, DEFAULT_CLASSIFIER, DEFAULT_PATTERNS,
};
pub use run::{DEFAULT_LOG_FILE, LTRACE_BIN, TraceOptions};
pub use trace::{ProcessLog, Trace, TraceError};

/// Kind of ltrace output line, which determines what fields of the call are meaningful
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallKind {
    /// Continuation of a call previously reported as unfinished
    Resumed,
    /// Call interrupted by output from another process
    Unfinished,
    /// Call that never returns (exit, exec...)
    NoReturn,
    /// Signal delivery or process exit
    Special,
    /// Complete call with its return value
    FunctionCall,
}

/// A library call, or special event, as reported by ltrace
#[derive(Debug, Clone, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Call {
    /// Second half of a call, previously reported as unfinished
    Resumed {
        /// Function name
        name: String,
        /// Remaining raw argument text
        args: String,
        /// Return value
        ret_val: String,
    },
    /// First half of a call, without return value
    Unfinished {
        /// Function name
        name: String,
        /// Raw argument text
        args: String,
    },
    /// Call that does not return
    NoReturn {
        /// Function name
        name: String,
        /// Raw argument text
        args: String,
    },
    /// Event like '--- SIGPIPE (Broken pipe) ---' or '+++ exited (status 1) +++'
    Special {
        /// Event name ("SIGPIPE", "exited"...)
        event: String,
        /// Text inside the parenthesis ("Broken pipe", "status 1"...)
        detail: String,
    },
    /// Complete call
    #[serde(rename = "function_call")]
    Function {
        /// Function name
        name: String,
        /// Raw argument text
        args: String,
        /// Return value
        ret_val: String,
    },
}

impl Call {
    /// Build a call from the regex captured fields, returns `None` if a mandatory field is missing
    pub(crate) fn from_fields(
        kind: CallKind,
        name: String,
        args: String,
        ret_val: Option<String>,
    ) -> Option<Self> {
        Some(match kind {
            CallKind::Resumed => Self::Resumed {
                name,
                args,
                ret_val: ret_val?,
            },
            CallKind::Unfinished => Self::Unfinished { name, args },
            CallKind::NoReturn => Self::NoReturn { name, args },
            CallKind::Special => Self::Special {
                event: name,
                detail: args,
            },
            CallKind::FunctionCall => Self::Function {
                name,
                args,
                ret_val: ret_val?,
            },
        })
    }

    /// Kind of line this call was parsed from
    #[must_use]
    pub fn kind(&self) -> CallKind {
        match self {
            Self::Resumed { .. } => CallKind::Resumed,
            Self::Unfinished { .. } => CallKind::Unfinished,
            Self::NoReturn { .. } => CallKind::NoReturn,
            Self::Special { .. } => CallKind::Special,
            Self::Function { .. } => CallKind::FunctionCall,
        }
    }

    /// Function name, or event name for special lines
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Resumed { name, .. }
            | Self::Unfinished { name, .. }
            | Self::NoReturn { name, .. }
            | Self::Function { name, .. } => name,
            Self::Special { event, .. } => event,
        }
    }

    /// Raw argument text, or event detail for special lines
    #[must_use]
    pub fn args(&self) -> &str {
        match self {
            Self::Resumed { args, .. }
            | Self::Unfinished { args, .. }
            | Self::NoReturn { args, .. }
            | Self::Function { args, .. } => args,
            Self::Special { detail, .. } => detail,
        }
    }

    /// Return value, if the line has one
    #[must_use]
    pub fn ret_val(&self) -> Option<&str> {
        match self {
            Self::Resumed { ret_val, .. } | Self::Function { ret_val, .. } => Some(ret_val),
            Self::Unfinished { .. } | Self::NoReturn { .. } | Self::Special { .. } => None,
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Resumed {
                name,
                args,
                ret_val,
            } => write!(f, "<... {name} resumed>{args}= {ret_val}"),
            Self::Unfinished { name, args } => write!(f, "{name}({args} <unfinished ...>"),
            Self::NoReturn { name, args } => write!(f, "{name}({args} <no return ...>"),
            Self::Special { event, detail } => write!(f, "{event} ({detail})"),
            Self::Function {
                name,
                args,
                ret_val,
            } => write!(f, "{name}({args}) = {ret_val}"),
        }
    }
}

/// A classified ltrace line
#[derive(Debug, Clone, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallRecord {
    /// Id of the process that made the call, never empty
    pub pid: String,
    /// The call itself
    #[serde(flatten)]
    pub call: Call,
}

/// Version of the ltrace binary
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct LtraceVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Patch version
    pub patch: u16,
}

impl LtraceVersion {
    /// Build version from its components
    #[must_use]
    pub fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Get version of the locally installed ltrace
    pub fn local_system() -> anyhow::Result<Self> {
        let output = Command::new(LTRACE_BIN).arg("--version").output()?;
        if !output.status.success() {
            anyhow::bail!("ltrace invocation failed with code {:?}", output.status);
        }
        let version_line = output
            .stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Unable to get ltrace version"))??;
        Self::parse_version_line(&version_line)
    }

    fn parse_version_line(line: &str) -> anyhow::Result<Self> {
        // 'ltrace version 0.7.3.'
        let version = line
            .rsplit_once(' ')
            .ok_or_else(|| anyhow::anyhow!("Unable to parse ltrace version from {line:?}"))?
            .1
            .trim_end_matches('.');
        let mut tokens = version.split('.').map(str::parse::<u16>);
        let major = tokens
            .next()
            .ok_or_else(|| anyhow::anyhow!("Missing major version in {line:?}"))??;
        let minor = tokens.next().transpose()?.unwrap_or(0);
        let patch = tokens.next().transpose()?.unwrap_or(0);
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for LtraceVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
