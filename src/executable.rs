//! Program under test

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

use crate::{
    exec::{self, ExecError, ExecOptions, Output},
    ltrace::{Trace, TraceError, TraceOptions},
};

/// A compiled program to run or trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    path: PathBuf,
}

impl Executable {
    /// Program at given path
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Program built in the current directory from a source file, named after the file stem
    /// (`src/hello.c` gives `./hello`)
    #[must_use]
    pub fn from_source(source: &Path) -> Option<Self> {
        let stem = source.file_stem()?;
        Some(Self::new(Path::new(".").join(stem)))
    }

    /// Program path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn command<S: AsRef<OsStr>>(&self, args: &[S]) -> Vec<OsString> {
        let mut cmd = vec![self.path.clone().into_os_string()];
        cmd.extend(args.iter().map(|a| a.as_ref().to_owned()));
        cmd
    }

    /// Run with arguments, a timeout is an error
    pub fn run<S: AsRef<OsStr>>(&self, args: &[S], opts: &ExecOptions) -> Result<Output, ExecError> {
        exec::exec(&self.command(args), opts)
    }

    /// Run with arguments under ltrace
    pub fn trace<S: AsRef<OsStr>>(&self, args: &[S], opts: &TraceOptions) -> Result<Trace, TraceError> {
        Trace::run(&self.command(args), opts)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn from_source() {
        assert_eq!(
            Executable::from_source(Path::new("lab1/hello.c")).unwrap().path(),
            Path::new("./hello")
        );
        assert_eq!(
            Executable::from_source(Path::new("main")).unwrap().path(),
            Path::new("./main")
        );
        assert!(Executable::from_source(Path::new("")).is_none());
    }

    #[test]
    fn run() {
        let exe = Executable::new("sh");
        let output = exe
            .run(&["-c", "echo \"$0 $1\"", "a", "b"], &ExecOptions::default())
            .unwrap();
        assert_eq!(output.stdout, "a b\n");
    }
}
