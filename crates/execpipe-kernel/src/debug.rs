//! Per-pipeline debug trace.
//!
//! Each pipeline carries its own verbosity and line output, so pipelines in
//! the same process (tests, embedders) never share logging state. Without a
//! custom output, lines are forwarded to `tracing` under target `execpipe`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Verbosity of the pipeline debug trace. Higher levels include lower ones.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    /// No output.
    #[default]
    None,
    /// Spawn failures and link I/O errors.
    Error,
    /// Stage lifecycle: spawns, exits, end-of-stream.
    Info,
    /// Link state transitions and poll rounds.
    Debug,
    /// Every read and write.
    Trace,
}

impl DebugLevel {
    /// Parse a level name as used in config files and `-v` flags.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "off" => Some(DebugLevel::None),
            "error" => Some(DebugLevel::Error),
            "info" => Some(DebugLevel::Info),
            "debug" => Some(DebugLevel::Debug),
            "trace" => Some(DebugLevel::Trace),
            _ => None,
        }
    }

    /// Level `n` steps above `None`, saturating at `Trace`.
    pub fn from_verbosity(n: u8) -> Self {
        match n {
            0 => DebugLevel::None,
            1 => DebugLevel::Error,
            2 => DebugLevel::Info,
            3 => DebugLevel::Debug,
            _ => DebugLevel::Trace,
        }
    }
}

impl fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebugLevel::None => "none",
            DebugLevel::Error => "error",
            DebugLevel::Info => "info",
            DebugLevel::Debug => "debug",
            DebugLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Line-oriented debug output owned by one pipeline.
pub struct DebugLog<'a> {
    level: DebugLevel,
    output: Option<Box<dyn FnMut(&str) + 'a>>,
}

impl<'a> DebugLog<'a> {
    pub fn new(level: DebugLevel) -> Self {
        Self {
            level,
            output: None,
        }
    }

    pub fn level(&self) -> DebugLevel {
        self.level
    }

    pub fn set_level(&mut self, level: DebugLevel) {
        self.level = level;
    }

    /// Route lines to `output` instead of `tracing`.
    pub fn set_output(&mut self, output: impl FnMut(&str) + 'a) {
        self.output = Some(Box::new(output));
    }

    /// True if lines at `level` are emitted.
    pub fn enabled(&self, level: DebugLevel) -> bool {
        level != DebugLevel::None && level <= self.level
    }

    /// Emit one line at `level`. Formatting is skipped when disabled.
    pub fn line(&mut self, level: DebugLevel, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        match &mut self.output {
            Some(output) => output(&args.to_string()),
            None => match level {
                DebugLevel::Error => tracing::error!(target: "execpipe", "{}", args),
                DebugLevel::Info => tracing::info!(target: "execpipe", "{}", args),
                DebugLevel::Debug => tracing::debug!(target: "execpipe", "{}", args),
                DebugLevel::Trace => tracing::trace!(target: "execpipe", "{}", args),
                DebugLevel::None => {}
            },
        }
    }
}

impl fmt::Debug for DebugLog<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugLog")
            .field("level", &self.level)
            .field("custom_output", &self.output.is_some())
            .finish()
    }
}

/// Emit a formatted line on a [`DebugLog`] at the given level.
macro_rules! debug_line {
    ($log:expr, $level:ident, $($arg:tt)+) => {
        $log.line($crate::debug::DebugLevel::$level, format_args!($($arg)+))
    };
}
pub(crate) use debug_line;
