//! ExecPipe, the pipeline builder and run facade.
//!
//! ```no_run
//! use execpipe_kernel::ExecPipe;
//!
//! let mut out = String::new();
//! let mut pipe = ExecPipe::new();
//! pipe.set_input_string("hello\n")
//!     .add_execp("cat", ["-n"])
//!     .set_output_string(&mut out);
//! pipe.run()?;
//! assert!(pipe.all_return_codes_zero());
//! # Ok::<(), execpipe_kernel::PipeError>(())
//! ```

use std::ffi::OsStr;
use std::path::PathBuf;

use execpipe_types::{RunResult, StageStatus};

use crate::adapters::{PipeFunction, PipeSink, PipeSource};
use crate::config::PipeConfig;
use crate::debug::{DebugLevel, DebugLog, debug_line};
use crate::driver::Driver;
use crate::error::{PipeError, PipeResult};
use crate::stage::{ExecStage, Input, Output, Stage, StageSet};

/// A chain of external programs and in-process functions, run once.
///
/// Borrowed inputs, outputs and callbacks must outlive the pipeline (`'a`).
/// Output written to a borrowed string or vector is readable once the
/// pipeline is dropped or consumed by [`ExecPipe::finish`].
pub struct ExecPipe<'a> {
    set: StageSet<'a>,
    config: PipeConfig,
    log: DebugLog<'a>,
    ran: bool,
    result: Option<RunResult>,
}

impl Default for ExecPipe<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ExecPipe<'a> {
    /// Empty pipeline with default tuning.
    pub fn new() -> Self {
        Self::with_config(PipeConfig::default())
    }

    pub fn with_config(config: PipeConfig) -> Self {
        Self {
            set: StageSet::new(),
            log: DebugLog::new(config.debug_level),
            config,
            ran: false,
            result: None,
        }
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    /// Number of stages added so far.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    // ── Stages ──────────────────────────────────────────────────────────

    /// Append a program run by path; a bare name is not looked up in `PATH`.
    pub fn add_exec<I, S>(&mut self, program: impl AsRef<OsStr>, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.add_stage(ExecStage::new(program).args(args))
    }

    /// Append a program resolved through `PATH`.
    pub fn add_execp<I, S>(&mut self, program: impl AsRef<OsStr>, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.add_stage(ExecStage::path_search(program).args(args))
    }

    /// Append a program run with exactly the environment `env`.
    pub fn add_exece<I, S, E, K, V>(
        &mut self,
        program: impl AsRef<OsStr>,
        args: I,
        env: E,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
        E: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.add_stage(ExecStage::new(program).args(args).env_replace(env))
    }

    pub fn add_stage(&mut self, stage: ExecStage) -> &mut Self {
        self.set.push(Stage::Exec(stage));
        self
    }

    /// Append an in-process function stage.
    pub fn add_function(&mut self, function: impl PipeFunction + 'a) -> &mut Self {
        self.set.push(Stage::Function(Box::new(function)));
        self
    }

    // ── Input ───────────────────────────────────────────────────────────

    pub fn set_input_bytes(&mut self, input: &'a [u8]) -> &mut Self {
        self.set.input = Input::Bytes(input);
        self
    }

    pub fn set_input_string(&mut self, input: &'a str) -> &mut Self {
        self.set_input_bytes(input.as_bytes())
    }

    /// Read input from a file, opened when the pipeline runs.
    pub fn set_input_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.set.input = Input::File(path.into());
        self
    }

    pub fn set_input_source(&mut self, source: impl PipeSource + 'a) -> &mut Self {
        self.set.input = Input::Source(Box::new(source));
        self
    }

    // ── Output ──────────────────────────────────────────────────────────

    pub fn set_output_bytes(&mut self, output: &'a mut Vec<u8>) -> &mut Self {
        self.set.output = Output::Bytes(output);
        self
    }

    /// Append output to `output`, decoded lossily as UTF-8.
    pub fn set_output_string(&mut self, output: &'a mut String) -> &mut Self {
        self.set.output = Output::String(output);
        self
    }

    /// Write output to a file, created or truncated when the pipeline runs.
    pub fn set_output_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.set.output = Output::File(path.into());
        self
    }

    pub fn set_output_sink(&mut self, sink: impl PipeSink + 'a) -> &mut Self {
        self.set.output = Output::Sink(Box::new(sink));
        self
    }

    // ── Diagnostics ─────────────────────────────────────────────────────

    pub fn set_debug_level(&mut self, level: DebugLevel) -> &mut Self {
        self.log.set_level(level);
        self
    }

    /// Send debug lines to `output` instead of `tracing`.
    pub fn set_debug_output(&mut self, output: impl FnMut(&str) + 'a) -> &mut Self {
        self.log.set_output(output);
        self
    }

    // ── Execution ───────────────────────────────────────────────────────

    /// Run the pipeline to completion.
    ///
    /// Stage failures do not make this fail; inspect the returned
    /// [`RunResult`]. An `Err` means the engine itself could not complete
    /// the run. Either way, every child has been reaped when this returns.
    ///
    /// A borrowed output stays borrowed until the pipeline goes away, so read
    /// it after dropping `self` or after [`ExecPipe::finish`].
    #[tracing::instrument(level = "debug", skip_all, fields(stages = self.set.len()))]
    pub fn run(&mut self) -> PipeResult<&RunResult> {
        if self.ran {
            return Err(PipeError::AlreadyRun);
        }
        // Stages are consumed even by a run that fails.
        self.ran = true;
        let set = std::mem::take(&mut self.set);

        debug_line!(self.log, Info, "running pipeline of {} stages", set.len());
        let outcome = Driver::start(set, &self.config, &mut self.log)?.run()?;

        for (i, stage) in outcome.stages.iter().enumerate() {
            debug_line!(
                self.log,
                Debug,
                "stage {}: {} {}",
                i,
                stage.program.as_deref().unwrap_or("<function>"),
                stage.status
            );
        }
        let result = self.result.insert(RunResult {
            stages: outcome.stages,
            link_errors: outcome.link_errors,
        });
        Ok(result)
    }

    /// Consume the pipeline, releasing every borrow it holds.
    ///
    /// Returns the result of the completed run, `None` if it never ran or
    /// the run failed.
    pub fn finish(self) -> Option<RunResult> {
        self.result
    }

    /// Result of the completed run, `None` before `run()` or after a failed one.
    pub fn result(&self) -> Option<&RunResult> {
        self.result.as_ref()
    }

    /// True if the pipeline ran and every external stage exited with 0.
    pub fn all_return_codes_zero(&self) -> bool {
        self.result
            .as_ref()
            .is_some_and(RunResult::all_return_codes_zero)
    }

    /// Exit code of stage `index`; `None` if it was killed by a signal,
    /// is a function stage, or the pipeline has not run.
    pub fn get_return_code(&self, index: usize) -> Option<i32> {
        self.result.as_ref()?.return_code(index)
    }

    /// Signal that killed stage `index`, `None` if it exited normally.
    pub fn get_return_signal(&self, index: usize) -> Option<i32> {
        self.result.as_ref()?.return_signal(index)
    }

    /// Status of stage `index`.
    pub fn get_status(&self, index: usize) -> Option<StageStatus> {
        self.result.as_ref()?.status(index)
    }
}

impl std::fmt::Debug for ExecPipe<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecPipe")
            .field("stages", &self.set.stages)
            .field("config", &self.config)
            .field("log", &self.log)
            .field("result", &self.result)
            .finish()
    }
}
