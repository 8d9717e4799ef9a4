//! execpipe CLI entry point.
//!
//! Usage:
//!   execpipe [OPTIONS] [--] PROGRAM [ARGS...] ['|' PROGRAM [ARGS...]]...

mod args;

use std::env;
use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use execpipe_kernel::{
    DebugLevel, ExecPipe, ExecStage, PipeConfig, PipeFunction, PipeSink, StageWriter,
    signal_name,
};
use execpipe_types::{RunResult, StageStatus};
use sha2::{Digest, Sha256};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::args::{Command, InputArg, Options};

fn main() -> ExitCode {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("execpipe: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let argv: Vec<String> = env::args().skip(1).collect();

    match args::parse(&argv)? {
        Command::Help => {
            print_help();
            Ok(ExitCode::SUCCESS)
        }
        Command::Version => {
            println!("execpipe {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(opts) => run_pipeline(opts),
    }
}

fn print_help() {
    println!(
        r#"execpipe v{}

Run a chain of programs as one pipeline, without a shell.

Usage:
  execpipe [OPTIONS] [--] PROGRAM [ARGS...] ['|' PROGRAM [ARGS...]]...

Options:
  -i, --input <file>       Read pipeline input from a file (/dev/stdin works)
  -s, --string <text>      Use <text> as pipeline input
  -o, --output <file>      Write pipeline output to a file instead of stdout
  -e, --env <KEY=VALUE>    Run stages with exactly these variables (repeatable)
      --no-path            Do not look up bare program names in PATH
      --digest             Print the SHA-256 of the first stage's output
      --config <file>      Load tuning from <file>
      --json               Print the run result as JSON on stderr
  -v, --verbose            More debug output (repeatable: -vv, -vvv, -vvvv)
  -h, --help               Show this help
  -V, --version            Show version

Without -i or -s, the first program reads /dev/null.
The exit status is 0 only if every program exited with status 0.

Examples:
  execpipe -s test123 -- cat '|' md5sum
  execpipe -i notes.txt sort '|' uniq -c '|' sort -rn
  execpipe --digest -o backup.tar.gz tar cf - src '|' gzip -9
"#,
        env!("CARGO_PKG_VERSION")
    );
}

fn run_pipeline(opts: Options) -> Result<ExitCode> {
    let mut config = match &opts.config {
        Some(path) => PipeConfig::load_from(path)?,
        None => PipeConfig::load()?,
    };
    config.debug_level = config
        .debug_level
        .max(DebugLevel::from_verbosity(opts.verbosity));
    tracing::debug!(?config, "loaded pipe config");

    let mut digest = Sha256Tee::default();
    let mut stdout = StdoutSink(io::stdout());
    let stage_count = opts.stages.len();

    let result = {
        let mut pipe = ExecPipe::with_config(config);
        // The digest goes after the first stage, so hand the borrow out once.
        let mut digest_slot = opts.digest.then_some(&mut digest);
        pipe.set_debug_output(|line: &str| eprintln!("execpipe: {line}"));

        match &opts.input {
            InputArg::None => {}
            InputArg::File(path) => {
                pipe.set_input_file(path);
            }
            InputArg::String(text) => {
                pipe.set_input_string(text);
            }
        }

        for (i, words) in opts.stages.iter().enumerate() {
            let (program, rest) = words
                .split_first()
                .with_context(|| format!("stage {} is empty", i + 1))?;
            let mut stage = ExecStage::new(program)
                .args(rest)
                .search_path(opts.search_path);
            if !opts.env.is_empty() {
                stage = stage.env_replace(opts.env.iter().map(|(k, v)| (k, v)));
            }
            pipe.add_stage(stage);
            if let Some(tee) = digest_slot.take() {
                pipe.add_function(tee);
            }
        }

        // The last program writes straight to our stdout unless something
        // in-process sits at the end of the chain.
        match &opts.output {
            Some(path) => {
                pipe.set_output_file(path);
            }
            None if opts.digest && stage_count == 1 => {
                pipe.set_output_sink(&mut stdout);
            }
            None => {}
        }

        tracing::debug!(stages = stage_count, digest = opts.digest, "starting pipeline");
        pipe.run().context("pipeline failed")?.clone()
    };

    if let Some(hash) = &digest.hex {
        eprintln!("sha256 {hash}");
    }

    if opts.json {
        let json = serde_json::to_string_pretty(&result)?;
        eprintln!("{json}");
    } else {
        report_failures(&result);
    }

    if result.all_return_codes_zero() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// One stderr line per stage that did not exit with 0, plus link errors.
fn report_failures(result: &RunResult) {
    for (i, stage) in result.stages.iter().enumerate() {
        let name = stage.program.as_deref().unwrap_or("<function>");
        match stage.status {
            StageStatus::Signaled { signal } => eprintln!(
                "execpipe: stage {} ({name}): signal {signal} ({})",
                i + 1,
                signal_name(signal).unwrap_or("unknown")
            ),
            StageStatus::Exited { code } if code != 0 => {
                eprintln!("execpipe: stage {} ({name}): exit {code}", i + 1)
            }
            _ => {}
        }
    }
    for err in &result.link_errors {
        eprintln!("execpipe: link {}: {}", err.link, err.message);
    }
}

/// Pass-through filter that hashes everything it sees.
#[derive(Default)]
struct Sha256Tee {
    hasher: Sha256,
    hex: Option<String>,
}

impl PipeFunction for Sha256Tee {
    fn process(&mut self, data: &[u8], out: &mut StageWriter<'_>) {
        self.hasher.update(data);
        out.write(data);
    }

    fn eof(&mut self, _out: &mut StageWriter<'_>) {
        self.hex = Some(hex::encode(self.hasher.finalize_reset()));
    }
}

struct StdoutSink(io::Stdout);

impl PipeSink for StdoutSink {
    fn process(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.lock().write_all(data)
    }

    fn eof(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
