//! Command line interface

use std::{num::NonZeroU64, path::PathBuf, time::Duration};

use clap::Parser;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct Args {
    #[command(subcommand)]
    pub action: Action,
}

/// Timeout in seconds
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeout(pub Duration);

impl std::str::FromStr for Timeout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<NonZeroU64>()
            .map(|secs| Self(Duration::from_secs(secs.get())))
            .map_err(|e| format!("Invalid timeout {s:?}: {e}"))
    }
}

/// How to print the trace
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum TraceFormat {
    /// One line per call, grouped by process
    #[default]
    Text,
    /// JSON array of records, in log order
    Json,
}

/// Test input and expected output directories
#[derive(Debug, clap::Args)]
pub(crate) struct TestDirs {
    /// Directory containing input files
    #[arg(short, long)]
    pub input_dir: PathBuf,
    /// Directory containing expected stdout/stderr files
    #[arg(short, long)]
    pub out_dir: PathBuf,
    /// Extension of input files
    #[arg(long, default_value = "txt")]
    pub input_extension: String,
}

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Action {
    /// Run a program under ltrace, and print its calls per process
    Trace {
        /// The command line to trace
        #[arg(num_args = 1.., required = true)]
        command: Vec<String>,
        /// Only trace these calls
        #[arg(short = 'e', long = "call")]
        call_types: Vec<String>,
        /// Extra ltrace flag (may be repeated)
        #[arg(long = "ltrace-flag", allow_hyphen_values = true)]
        extra_flags: Vec<String>,
        /// Kill traced program after this many seconds
        #[arg(short, long, default_value = "10")]
        timeout: Timeout,
        /// Ltrace log path
        #[arg(short, long, default_value = None, conflicts_with = "unique_log")]
        log_path: Option<PathBuf>,
        /// Write log to a file with a unique name in this directory
        #[arg(long, default_value = None)]
        unique_log: Option<PathBuf>,
        /// Tracer binary
        #[arg(long, default_value = ltrace_harness::ltrace::LTRACE_BIN)]
        tracer: PathBuf,
        /// Only print calls of this process
        #[arg(short, long, default_value = None)]
        pid: Option<String>,
        /// Only print calls with this exact name
        #[arg(short, long = "match", default_value = None, requires = "pid")]
        matching: Option<String>,
        /// Output format
        #[arg(short, long, default_value_t, value_enum)]
        format: TraceFormat,
    },
    /// Run a program and print its output
    Run {
        /// The command line to run
        #[arg(num_args = 1.., required = true)]
        command: Vec<String>,
        /// Feed this file to program stdin
        #[arg(short, long, default_value = None)]
        input: Option<PathBuf>,
        /// Kill program after this many seconds
        #[arg(short, long, default_value = "10")]
        timeout: Timeout,
    },
    /// Run a reference solution on input files to generate expected outputs
    Generate {
        /// Reference solution
        #[arg(short, long)]
        executable: PathBuf,
        #[command(flatten)]
        dirs: TestDirs,
        /// Program arguments, as a single shell quoted string
        #[arg(short, long, default_value = "")]
        args: String,
    },
    /// Check a program against expected outputs generated previously
    Check {
        /// Program to check
        #[arg(short, long)]
        executable: PathBuf,
        #[command(flatten)]
        dirs: TestDirs,
        /// Program arguments, as a single shell quoted string
        #[arg(short, long, default_value = "")]
        args: String,
        /// Kill program after this many seconds
        #[arg(short, long, default_value = "2")]
        timeout: Timeout,
    },
    /// Remove generated expected outputs
    Clean {
        #[command(flatten)]
        dirs: TestDirs,
    },
    /// Generate man pages
    #[cfg(feature = "generate-extra")]
    GenManPages {
        /// Target directory (must exist)
        dir: PathBuf,
    },
    /// Generate shell completion
    #[cfg(feature = "generate-extra")]
    #[group(required = true, multiple = true)]
    GenShellComplete {
        /// Shell to generate for, leave empty for all
        #[arg(short = 's', long, default_value = None)]
        shell: Option<clap_complete::Shell>,
        /// Target directory, leave empty to write to standard output
        dir: Option<PathBuf>,
    },
}
