//! Expected output generation from a reference solution

use std::{
    ffi::OsStr,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    exec::{ExecError, ExecOptions},
    executable::Executable,
    expect::OutputExpectation,
};

/// Default timeout for each reference solution run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Test generation errors
#[derive(thiserror::Error, Debug)]
pub enum GenerateError {
    /// Filesystem error on a path
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// Path the error occured on
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// Reference solution failed (other than timeout)
    #[error("Failed to run reference solution on {input:?}: {source}")]
    Exec {
        /// Input file
        input: PathBuf,
        /// Underlying error
        source: ExecError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> GenerateError + '_ {
    move |source| GenerateError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Generates expected stdout/stderr files by running a reference executable on input files,
/// then turns them into [`OutputExpectation`]s
#[derive(Debug, Clone)]
pub struct TestGenerator {
    /// Directory containing input files
    pub input_dir: PathBuf,
    /// Directory receiving generated stdout/stderr files
    pub out_dir: PathBuf,
    /// Reference solution
    pub executable: Executable,
    /// Extension of input files
    pub input_extension: String,
    /// Extension of generated stdout files
    pub output_extension: String,
    /// Extension of generated stderr files
    pub error_extension: String,
    /// Timeout for each reference run
    pub timeout: Duration,
}

impl TestGenerator {
    /// Generator with default extensions and timeout
    pub fn new<I: Into<PathBuf>, O: Into<PathBuf>>(
        input_dir: I,
        out_dir: O,
        executable: Executable,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            out_dir: out_dir.into(),
            executable,
            input_extension: "txt".to_owned(),
            output_extension: "stdout".to_owned(),
            error_extension: "stderr".to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Input files, sorted by name
    pub fn inputs(&self) -> Result<Vec<PathBuf>, GenerateError> {
        let mut inputs = Vec::new();
        for entry in fs::read_dir(&self.input_dir).map_err(io_err(&self.input_dir))? {
            let path = entry.map_err(io_err(&self.input_dir))?.path();
            if path.is_file()
                && path
                    .extension()
                    .is_some_and(|e| e == OsStr::new(&self.input_extension))
            {
                inputs.push(path);
            }
        }
        inputs.sort_unstable();
        Ok(inputs)
    }

    fn output_paths(&self, input: &Path) -> (String, PathBuf, PathBuf) {
        let name = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stdout = self
            .out_dir
            .join(format!("{name}.{}", self.output_extension));
        let stderr = self
            .out_dir
            .join(format!("{name}.{}", self.error_extension));
        (name, stdout, stderr)
    }

    /// Run reference solution on each input, writing its stdout and stderr.
    ///
    /// Inputs on which the solution times out are skipped. Returns the number of generated cases.
    pub fn build_outputs(&self, args: &[String]) -> Result<usize, GenerateError> {
        fs::create_dir_all(&self.out_dir).map_err(io_err(&self.out_dir))?;
        let mut count = 0;
        for input in self.inputs()? {
            let (_, stdout_path, stderr_path) = self.output_paths(&input);
            let opts = ExecOptions {
                input: Some(fs::read_to_string(&input).map_err(io_err(&input))?),
                timeout: self.timeout,
            };
            log::info!("Running reference solution on {input:?}");
            let output = match self.executable.run(args, &opts) {
                Ok(output) => output,
                Err(ExecError::Timeout { .. }) => {
                    log::warn!("Reference solution timed out on {input:?}, skipping");
                    continue;
                }
                Err(source) => return Err(GenerateError::Exec { input, source }),
            };
            fs::write(&stdout_path, &output.stdout).map_err(io_err(&stdout_path))?;
            fs::write(&stderr_path, &output.stderr).map_err(io_err(&stderr_path))?;
            count += 1;
        }
        Ok(count)
    }

    /// Remove generated files
    pub fn clean(&self) -> Result<(), GenerateError> {
        for input in self.inputs()? {
            let (_, stdout_path, stderr_path) = self.output_paths(&input);
            for path in [stdout_path, stderr_path] {
                match fs::remove_file(&path) {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        log::debug!("{path:?} does not exist");
                    }
                    r => r.map_err(io_err(&path))?,
                }
            }
        }
        Ok(())
    }

    /// Build an expectation for each input that has generated outputs, named `test_<input stem>`
    pub fn test_cases(&self, args: &[String]) -> Result<Vec<(String, OutputExpectation)>, GenerateError> {
        let mut cases = Vec::new();
        for input in self.inputs()? {
            let (name, stdout_path, stderr_path) = self.output_paths(&input);
            if !stdout_path.is_file() {
                log::warn!("No generated output for {input:?}, skipping");
                continue;
            }
            let stdin = fs::read_to_string(&input).map_err(io_err(&input))?;
            let stdout = fs::read_to_string(&stdout_path).map_err(io_err(&stdout_path))?;
            let stderr = fs::read_to_string(&stderr_path).map_err(io_err(&stderr_path))?;
            let expectation = OutputExpectation::new(args.to_vec(), stdout)
                .stderr(Some(stderr))
                .input(stdin)
                .doc(format!("Output of input file {}", input.display()));
            cases.push((format!("test_{name}"), expectation));
        }
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn setup() -> (tempfile::TempDir, TestGenerator) {
        let dir = tempfile::tempdir().unwrap();
        let input_dir = dir.path().join("in");
        fs::create_dir(&input_dir).unwrap();
        fs::write(input_dir.join("b.txt"), "second\n").unwrap();
        fs::write(input_dir.join("a.txt"), "first\n").unwrap();
        fs::write(input_dir.join("notes.md"), "ignored\n").unwrap();
        let gen_ = TestGenerator::new(input_dir, dir.path().join("out"), Executable::new("sh"));
        (dir, gen_)
    }

    fn script(s: &str) -> Vec<String> {
        vec!["-c".to_owned(), s.to_owned()]
    }

    #[test]
    fn inputs_sorted_and_filtered() {
        let (_dir, gen_) = setup();
        let names: Vec<_> = gen_
            .inputs()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
    }

    #[test]
    fn build_and_check() {
        let (_dir, gen_) = setup();
        let args = script("tr a-z A-Z; echo done >&2");
        assert_eq!(gen_.build_outputs(&args).unwrap(), 2);
        assert_eq!(
            fs::read_to_string(gen_.out_dir.join("a.stdout")).unwrap(),
            "FIRST\n"
        );
        assert_eq!(
            fs::read_to_string(gen_.out_dir.join("b.stderr")).unwrap(),
            "done\n"
        );

        let cases = gen_.test_cases(&args).unwrap();
        assert_eq!(
            cases.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            ["test_a", "test_b"]
        );
        for (_, case) in &cases {
            case.check(&gen_.executable).unwrap();
        }

        // A different program does not pass
        let other = script("cat; echo done >&2");
        let cases = gen_.test_cases(&other).unwrap();
        assert!(cases.iter().all(|(_, c)| c.check(&gen_.executable).is_err()));

        gen_.clean().unwrap();
        assert!(!gen_.out_dir.join("a.stdout").exists());
        assert!(gen_.test_cases(&args).unwrap().is_empty());
        // Cleaning twice is fine
        gen_.clean().unwrap();
    }

    #[test]
    fn timeout_skipped() {
        let (_dir, mut gen_) = setup();
        gen_.timeout = Duration::from_millis(100);
        let args = script("read l; [ \"$l\" = first ] && sleep 10; echo \"$l\"");
        assert_eq!(gen_.build_outputs(&args).unwrap(), 1);
        assert!(!gen_.out_dir.join("a.stdout").exists());
        assert!(gen_.out_dir.join("b.stdout").exists());
    }

    #[test]
    fn missing_input_dir() {
        let gen_ = TestGenerator::new("/nonexistent/in", "/nonexistent/out", Executable::new("sh"));
        assert!(matches!(gen_.inputs(), Err(GenerateError::Io { .. })));
    }
}
