//! Pipeline stages and the chain they form.
//!
//! A pipeline is a linear chain of nodes:
//!
//! ```text
//!   node:   input ── stage 0 ── stage 1 ── … ── stage n-1 ── output
//!   link:         0          1          2    n-1          n
//! ```
//!
//! Link `k` carries bytes from node `k` to node `k + 1`. The [`StageSet`]
//! decides for every link what feeds it and what drains it; the driver only
//! moves bytes.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use execpipe_types::StageResult;

use crate::adapters::{PipeFunction, PipeSink, PipeSource};

/// An external program stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecStage {
    program: OsString,
    args: Vec<OsString>,
    env: Option<Vec<(OsString, OsString)>>,
    search_path: bool,
}

impl ExecStage {
    /// Run `program` as given: a bare name is looked up in the current
    /// directory, not in `PATH`.
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            env: None,
            search_path: false,
        }
    }

    /// Run `program`, resolving a bare name through `PATH`.
    pub fn path_search(program: impl AsRef<OsStr>) -> Self {
        Self {
            search_path: true,
            ..Self::new(program)
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Replace the inherited environment with exactly these variables.
    pub fn env_replace<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.as_ref().to_os_string(), v.as_ref().to_os_string()))
                .collect(),
        );
        self
    }

    /// Toggle `PATH` resolution of a bare program name.
    pub fn search_path(mut self, enabled: bool) -> Self {
        self.search_path = enabled;
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Explicit environment, `None` when inherited.
    pub fn environment(&self) -> Option<&[(OsString, OsString)]> {
        self.env.as_deref()
    }

    pub fn searches_path(&self) -> bool {
        self.search_path
    }

    /// Program name for logs and results.
    pub fn display_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

/// One element of the chain.
pub enum Stage<'a> {
    Exec(ExecStage),
    Function(Box<dyn PipeFunction + 'a>),
}

impl Stage<'_> {
    /// Empty result slot for this stage.
    pub fn result_slot(&self) -> StageResult {
        match self {
            Stage::Exec(exec) => StageResult::external(exec.display_name()),
            Stage::Function(_) => StageResult::in_process(),
        }
    }
}

impl std::fmt::Debug for Stage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Exec(exec) => f.debug_tuple("Exec").field(exec).finish(),
            Stage::Function(_) => f.write_str("Function"),
        }
    }
}

/// Where the pipeline's bytes come from.
#[derive(Default)]
pub enum Input<'a> {
    /// Nothing: the first process reads `/dev/null`.
    #[default]
    None,
    Bytes(&'a [u8]),
    File(PathBuf),
    Source(Box<dyn PipeSource + 'a>),
}

/// Where the pipeline's bytes go.
#[derive(Default)]
pub enum Output<'a> {
    /// Nowhere: the last process inherits the caller's stdout, function
    /// output is discarded.
    #[default]
    None,
    Bytes(&'a mut Vec<u8>),
    String(&'a mut String),
    File(PathBuf),
    Sink(Box<dyn PipeSink + 'a>),
}

/// How the upstream end of a link is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// No link: nothing ever arrives.
    Nothing,
    /// The input bytes, preloaded into the buffer.
    Bytes,
    /// A readable descriptor: the input file.
    File,
    /// The pipeline's `PipeSource`.
    Source,
    /// Stdout of the process at this stage index.
    Process(usize),
    /// Output of the function at this stage index.
    Function(usize),
}

/// How the downstream end of a link is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// No link.
    Nothing,
    /// Stdin of the process at this stage index.
    Process(usize),
    /// The function at this stage index.
    Function(usize),
    /// The pipeline's output sink.
    Sink,
    /// Bytes are dropped.
    Discard,
}

/// The ordered stages plus the pipeline's external input and output.
#[derive(Default)]
pub struct StageSet<'a> {
    pub stages: Vec<Stage<'a>>,
    pub input: Input<'a>,
    pub output: Output<'a>,
}

impl<'a> StageSet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage<'a>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Number of links: one more than stages.
    pub fn link_count(&self) -> usize {
        self.stages.len() + 1
    }

    /// What feeds link `k`.
    pub fn feed(&self, k: usize) -> Feed {
        if k == 0 {
            return match self.input {
                Input::None => Feed::Nothing,
                Input::Bytes(_) => Feed::Bytes,
                Input::File(_) => Feed::File,
                Input::Source(_) => Feed::Source,
            };
        }
        match self.stages[k - 1] {
            Stage::Exec(_) => {
                // A last process with no output writes straight to our stdout.
                if k == self.stages.len() && matches!(self.output, Output::None) {
                    Feed::Nothing
                } else {
                    Feed::Process(k - 1)
                }
            }
            Stage::Function(_) => Feed::Function(k - 1),
        }
    }

    /// What drains link `k`.
    pub fn drain(&self, k: usize) -> Drain {
        if k == self.stages.len() {
            return match (&self.output, self.feed(k)) {
                (_, Feed::Nothing) => Drain::Nothing,
                (Output::None, _) => Drain::Discard,
                _ => Drain::Sink,
            };
        }
        match self.stages[k] {
            Stage::Exec(_) if self.feed(k) == Feed::Nothing => Drain::Nothing,
            Stage::Exec(_) => Drain::Process(k),
            Stage::Function(_) => Drain::Function(k),
        }
    }

    /// Empty result slots, one per stage.
    pub fn result_slots(&self) -> Vec<StageResult> {
        self.stages.iter().map(Stage::result_slot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StageWriter;

    struct Pass;

    impl PipeFunction for Pass {
        fn process(&mut self, data: &[u8], out: &mut StageWriter<'_>) {
            out.write(data);
        }
    }

    fn exec(name: &str) -> Stage<'static> {
        Stage::Exec(ExecStage::path_search(name))
    }

    #[test]
    fn lone_process_without_input_or_output_has_no_links() {
        let mut set = StageSet::new();
        set.push(exec("true"));

        assert_eq!(set.link_count(), 2);
        assert_eq!(set.feed(0), Feed::Nothing);
        assert_eq!(set.drain(0), Drain::Nothing);
        assert_eq!(set.feed(1), Feed::Nothing);
        assert_eq!(set.drain(1), Drain::Nothing);
    }

    #[test]
    fn string_through_two_processes() {
        let mut out = Vec::new();
        let mut set = StageSet::new();
        set.input = Input::Bytes(b"x");
        set.output = Output::Bytes(&mut out);
        set.push(exec("cat"));
        set.push(exec("md5sum"));

        assert_eq!(set.feed(0), Feed::Bytes);
        assert_eq!(set.drain(0), Drain::Process(0));
        assert_eq!(set.feed(1), Feed::Process(0));
        assert_eq!(set.drain(1), Drain::Process(1));
        assert_eq!(set.feed(2), Feed::Process(1));
        assert_eq!(set.drain(2), Drain::Sink);
    }

    #[test]
    fn trailing_function_without_output_discards() {
        let mut set = StageSet::new();
        set.push(exec("cat"));
        set.push(Stage::Function(Box::new(Pass)));

        assert_eq!(set.feed(0), Feed::Nothing);
        assert_eq!(set.drain(0), Drain::Nothing);
        assert_eq!(set.drain(1), Drain::Function(1));
        assert_eq!(set.feed(2), Feed::Function(1));
        assert_eq!(set.drain(2), Drain::Discard);
    }

    #[test]
    fn leading_function_without_input_still_gets_a_link() {
        let mut set = StageSet::new();
        set.push(Stage::Function(Box::new(Pass)));

        assert_eq!(set.feed(0), Feed::Nothing);
        assert_eq!(set.drain(0), Drain::Function(0));
        assert_eq!(
            set.result_slots(),
            vec![StageResult::in_process()]
        );
    }

    #[test]
    fn no_stages_connects_input_to_output() {
        let mut out = String::new();
        let mut set = StageSet::new();
        set.input = Input::Bytes(b"direct");
        set.output = Output::String(&mut out);

        assert_eq!(set.link_count(), 1);
        assert_eq!(set.feed(0), Feed::Bytes);
        assert_eq!(set.drain(0), Drain::Sink);
    }

    #[test]
    fn exec_builder() {
        let stage = ExecStage::new("/bin/sh")
            .args(["-c", "set"])
            .env_replace([("TEST", "123")]);
        assert_eq!(stage.program(), "/bin/sh");
        assert_eq!(stage.arguments().len(), 2);
        assert!(!stage.searches_path());
        assert_eq!(stage.environment().map(|e| e.len()), Some(1));
        assert_eq!(stage.display_name(), "/bin/sh");
    }
}
