//! Ltrace grading harness

use std::{
    fs,
    io::{self, Write as _},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::Context as _;
use clap::Parser as _;
use itertools::Itertools as _;
use ltrace_harness::{
    exec::{self, ExecOptions, Output},
    executable::Executable,
    generate::TestGenerator,
    ltrace::{CallRecord, LTRACE_BIN, LtraceVersion, Trace, TraceOptions},
};

mod cl;

fn split_args(args: &str) -> anyhow::Result<Vec<String>> {
    shlex::split(args).ok_or_else(|| anyhow::anyhow!("Unable to parse arguments {args:?}"))
}

fn test_generator(executable: PathBuf, dirs: cl::TestDirs) -> TestGenerator {
    let mut generator = TestGenerator::new(dirs.input_dir, dirs.out_dir, Executable::new(executable));
    generator.input_extension = dirs.input_extension;
    generator
}

/// Exit code mirroring the one of a finished program, shell style for signals
fn exit_code(output: &Output) -> ExitCode {
    let code = output
        .code()
        .or_else(|| output.signal().map(|s| 128 + s))
        .unwrap_or(1);
    ExitCode::from(u8::try_from(code & 0xff).unwrap_or(1))
}

fn write_trace_text(
    out: &mut impl io::Write,
    trace: &Trace,
    pids: &[&str],
    matching: &str,
) -> io::Result<()> {
    for pid in pids {
        match trace.status(pid) {
            Some(status) => writeln!(out, "== {pid} (exit status {status})")?,
            None => writeln!(out, "== {pid}")?,
        }
        for call in trace.lines_for_pid(pid, matching) {
            writeln!(out, "  {:<13} {call}", call.kind().to_string())?;
        }
    }
    Ok(())
}

#[expect(clippy::too_many_lines)]
fn main() -> anyhow::Result<ExitCode> {
    // Init logger
    simple_logger::SimpleLogger::new()
        .with_level(if cfg!(debug_assertions) {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .env()
        .init()
        .context("Failed to setup logger")?;

    // Parse cl args
    let args = cl::Args::parse();

    // Handle CL args
    match args.action {
        cl::Action::Trace {
            command,
            call_types,
            extra_flags,
            timeout,
            log_path,
            unique_log,
            tracer,
            pid,
            matching,
            format,
        } => {
            if tracer.as_os_str() == LTRACE_BIN {
                match LtraceVersion::local_system() {
                    Ok(version) => log::info!("Detected ltrace version {version}"),
                    Err(err) => log::warn!("Failed to get ltrace version: {err:#}"),
                }
            }

            let mut opts = unique_log
                .map(|dir| TraceOptions::with_unique_log(&dir))
                .unwrap_or_default();
            if let Some(log_path) = log_path {
                opts.log_path = log_path;
            }
            opts.tracer = tracer;
            opts.call_types = call_types;
            opts.extra_flags = extra_flags;
            opts.timeout = timeout.0;
            log::info!("Writing ltrace log to {:?}", opts.log_path);

            let trace = Trace::run(&command, &opts).context("Failed to trace command")?;
            let pids = match pid.as_deref() {
                Some(pid) => vec![pid],
                None => trace.pids(),
            };
            let matching = matching.as_deref().unwrap_or_default();

            let mut stdout = io::stdout().lock();
            match format {
                cl::TraceFormat::Text => write_trace_text(&mut stdout, &trace, &pids, matching)
                    .context("Failed to write trace")?,
                cl::TraceFormat::Json => {
                    let records = trace
                        .records()
                        .iter()
                        .filter(|r| pids.contains(&r.pid.as_str()))
                        .filter(|r| matching.is_empty() || r.call.name() == matching)
                        .collect::<Vec<&CallRecord>>();
                    serde_json::to_writer_pretty(&mut stdout, &records)
                        .context("Failed to serialize trace")?;
                    writeln!(stdout)?;
                }
            }
        }
        cl::Action::Run {
            command,
            input,
            timeout,
        } => {
            let input = input
                .map(|p| fs::read_to_string(&p).with_context(|| format!("Failed to read {p:?}")))
                .transpose()?;
            let output = exec::exec(
                &command,
                &ExecOptions {
                    input,
                    timeout: timeout.0,
                },
            )
            .context("Failed to run command")?;
            io::stdout().write_all(output.stdout.as_bytes())?;
            io::stderr().write_all(output.stderr.as_bytes())?;
            log::info!("Command exited with {:?}", output.status);
            return Ok(exit_code(&output));
        }
        cl::Action::Generate {
            executable,
            dirs,
            args,
        } => {
            let args = split_args(&args)?;
            let generator = test_generator(executable, dirs);
            let count = generator
                .build_outputs(&args)
                .context("Failed to generate expected outputs")?;
            log::info!("Generated {count} test cases into {:?}", generator.out_dir);
        }
        cl::Action::Check {
            executable,
            dirs,
            args,
            timeout,
        } => {
            let args = split_args(&args)?;
            let generator = test_generator(executable, dirs);
            let cases = generator
                .test_cases(&args)
                .context("Failed to load test cases")?;
            anyhow::ensure!(!cases.is_empty(), "No test cases found");

            let (passed, failed): (Vec<_>, Vec<_>) = cases
                .into_iter()
                .map(|(name, case)| {
                    let res = case.clone().timeout(timeout.0).check(&generator.executable);
                    (name, case.doc, res)
                })
                .partition(|(_, _, res)| res.is_ok());
            for (name, _, _) in &passed {
                println!("PASS {name}");
            }
            for (name, doc, res) in &failed {
                if let Err(err) = res {
                    println!("FAIL {name}: {err}");
                    if !doc.is_empty() {
                        println!("  {doc}");
                    }
                }
            }
            println!(
                "{} passed, {} failed{}",
                passed.len(),
                failed.len(),
                if failed.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", failed.iter().map(|(n, _, _)| n).join(", "))
                }
            );
            if !failed.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
        cl::Action::Clean { dirs } => {
            // Executable is not needed to locate generated files
            let generator = test_generator(PathBuf::new(), dirs);
            generator
                .clean()
                .context("Failed to remove generated outputs")?;
        }
        #[cfg(feature = "generate-extra")]
        cl::Action::GenManPages { dir } => {
            use clap::CommandFactory as _;

            // Use the binary name instead of the default of the package name
            let cmd = cl::Args::command().name(env!("CARGO_BIN_NAME"));
            clap_mangen::generate_to(cmd, &dir)?;
        }
        #[cfg(feature = "generate-extra")]
        cl::Action::GenShellComplete { shell, dir } => {
            use clap::{CommandFactory as _, ValueEnum as _};
            use clap_complete::{Shell, generate, generate_to};

            // Use the binary name instead of the default of the package name
            let name = env!("CARGO_BIN_NAME");
            let mut cmd = cl::Args::command().name(name);

            if let Some(shell) = shell {
                if let Some(dir) = dir {
                    generate_to(shell, &mut cmd, name, dir)?;
                } else {
                    generate(shell, &mut cmd, name, &mut io::stdout());
                }
            } else if let Some(dir) = dir {
                let shells = Shell::value_variants();
                for shell_i in shells {
                    generate_to(*shell_i, &mut cmd, name, &dir)?;
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
