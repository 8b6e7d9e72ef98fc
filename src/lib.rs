//! Grading harness for compiled programs
//!
//! Run a program and check its output, or run it under ltrace and query the library calls
//! each of its processes made.
//!
//! ```no_run
//! use ltrace_harness::{executable::Executable, ltrace::TraceOptions};
//!
//! let exe = Executable::new("./hello");
//! let opts = TraceOptions {
//!     call_types: vec!["fork".to_owned()],
//!     ..TraceOptions::default()
//! };
//! let trace = exe.trace(&["arg"], &opts)?;
//! assert_eq!(trace.lines_for_pid(trace.first_pid(), "fork").len(), 1);
//! assert_eq!(trace.status(trace.first_pid()), Some(0));
//! # Ok::<(), ltrace_harness::ltrace::TraceError>(())
//! ```

pub mod exec;
pub mod executable;
pub mod expect;
pub mod generate;
pub mod ltrace;
