//! Spawning and reaping of external program stages.
//!
//! Children are spawned up front with piped stdio; the driver takes the
//! parent's ends and sets them non-blocking. Reaping happens only after the
//! I/O loop has drained every link, so a short-lived child that already
//! closed its stdout cannot race with bytes we still hold for it.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::os::fd::OwnedFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use execpipe_types::{SPAWN_FAILURE_CODE, StageStatus};
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::signal::Signal;

use crate::debug::{DebugLog, debug_line};
use crate::error::{PipeError, PipeResult};
use crate::stage::ExecStage;

/// How a child's stdin or stdout is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wiring {
    /// Connected to a link through a pipe.
    Piped,
    /// Stdin from `/dev/null`.
    Null,
    /// Shared with the controlling process.
    Inherit,
}

impl Wiring {
    fn stdio(self) -> Stdio {
        match self {
            Wiring::Piped => Stdio::piped(),
            Wiring::Null => Stdio::null(),
            Wiring::Inherit => Stdio::inherit(),
        }
    }
}

/// Parent-side pipe ends of a spawned child, already non-blocking.
#[derive(Debug, Default)]
pub struct Spawned {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
}

/// A running child and the stage it belongs to.
#[derive(Debug)]
struct Running {
    stage: usize,
    name: String,
    child: Child,
}

/// Tracks every child process of one pipeline run.
#[derive(Debug, Default)]
pub struct ProcessController {
    running: Vec<Running>,
}

impl ProcessController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of children not yet reaped.
    pub fn live(&self) -> usize {
        self.running.len()
    }

    /// Spawn the program of stage `index`.
    ///
    /// If the program cannot be started, returns `Ok(None)`; the stage then
    /// counts as exited with [`SPAWN_FAILURE_CODE`] and produces no output.
    /// Only failing to configure our own pipe ends is fatal.
    pub fn spawn(
        &mut self,
        index: usize,
        stage: &ExecStage,
        stdin: Wiring,
        stdout: Wiring,
        log: &mut DebugLog<'_>,
    ) -> PipeResult<Option<Spawned>> {
        let name = stage.display_name();

        let program = match resolve_program(stage) {
            Some(program) => program,
            None => {
                debug_line!(log, Error, "stage {}: {}: command not found", index, name);
                return Ok(None);
            }
        };

        let mut cmd = Command::new(&program);
        cmd.arg0(stage.program())
            .args(stage.arguments())
            .stdin(stdin.stdio())
            .stdout(stdout.stdio())
            .stderr(Stdio::inherit());
        if let Some(env) = stage.environment() {
            cmd.env_clear();
            cmd.envs(env.iter().map(|(k, v)| (k, v)));
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug_line!(log, Error, "stage {}: {}: {}", index, name, e);
                return Ok(None);
            }
        };

        let pid = child.id();
        tracing::debug!(stage = index, pid, program = %program.display(), "spawned");
        debug_line!(log, Info, "stage {}: spawned {} as pid {}", index, name, pid);

        let spawned = Spawned {
            stdin: child.stdin.take().map(OwnedFd::from).map(File::from),
            stdout: child.stdout.take().map(OwnedFd::from).map(File::from),
        };
        self.running.push(Running {
            stage: index,
            name,
            child,
        });

        for file in spawned.stdin.iter().chain(spawned.stdout.iter()) {
            set_nonblocking(file).map_err(|source| PipeError::Descriptor {
                stage: index,
                source,
            })?;
        }
        Ok(Some(spawned))
    }

    /// Block until every spawned child has exited.
    ///
    /// Call only once the I/O loop is done; a child still waiting on input
    /// we hold would never exit.
    pub fn wait_all(&mut self, log: &mut DebugLog<'_>) -> PipeResult<Vec<(usize, StageStatus)>> {
        let mut statuses = Vec::with_capacity(self.running.len());
        while let Some(running) = self.running.first_mut() {
            // On error the child stays registered and Drop retries.
            let status = running.child.wait().map_err(|source| PipeError::Wait {
                stage: running.stage,
                source,
            })?;
            let running = self.running.remove(0);
            let status = stage_status(status);
            match status {
                StageStatus::Signaled { signal } => debug_line!(
                    log,
                    Error,
                    "stage {}: {} killed by {}",
                    running.stage,
                    running.name,
                    signal_name(signal).unwrap_or("unknown signal")
                ),
                _ => debug_line!(log, Info, "stage {}: {} {}", running.stage, running.name, status),
            }
            statuses.push((running.stage, status));
        }
        Ok(statuses)
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        // Children are left only when a run aborted. Kill them so reaping
        // cannot hang on a child that never touches its pipes.
        for running in &mut self.running {
            if let Err(e) = running.child.kill() {
                tracing::debug!(stage = running.stage, error = %e, "kill failed");
            }
            if let Err(e) = running.child.wait() {
                tracing::warn!(stage = running.stage, error = %e, "failed to reap child");
            }
        }
    }
}

/// Translate an OS exit status into a stage status.
pub fn stage_status(status: ExitStatus) -> StageStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => StageStatus::Exited { code },
        (None, Some(signal)) => StageStatus::Signaled { signal },
        // Stopped/continued statuses never come out of wait() here.
        (None, None) => StageStatus::Exited {
            code: SPAWN_FAILURE_CODE,
        },
    }
}

/// Name of a signal number, e.g. `SIGSEGV` for 11.
pub fn signal_name(signal: i32) -> Option<&'static str> {
    Signal::try_from(signal).ok().map(Signal::as_str)
}

/// Path to execute for a stage, or `None` if PATH lookup finds nothing.
fn resolve_program(stage: &ExecStage) -> Option<PathBuf> {
    let program = Path::new(stage.program());
    if program.as_os_str().as_encoded_bytes().contains(&b'/') {
        return Some(program.to_path_buf());
    }
    if !stage.searches_path() {
        // Like execv(): a bare name is relative to the working directory.
        return Some(Path::new(".").join(program));
    }

    let path_var = stage
        .environment()
        .and_then(|env| env.iter().find(|(k, _)| k == "PATH").map(|(_, v)| v.clone()))
        .or_else(|| std::env::var_os("PATH"))
        .unwrap_or_else(|| OsString::from("/usr/bin:/bin"));
    resolve_in_path(program, &path_var)
}

/// Find an executable file named `name` in a colon-separated search path.
pub fn resolve_in_path(name: &Path, path_var: &OsStr) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    for dir in std::env::split_paths(path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(name);
        if let Ok(metadata) = candidate.metadata()
            && metadata.is_file()
            && metadata.permissions().mode() & 0o111 != 0
        {
            return Some(candidate);
        }
    }
    None
}

fn set_nonblocking(file: &File) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(file, FcntlArg::F_GETFL)?);
    fcntl(file, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugLevel;

    fn quiet() -> DebugLog<'static> {
        DebugLog::new(DebugLevel::None)
    }

    #[test]
    fn missing_program_is_not_an_error() {
        let mut pc = ProcessController::new();
        let stage = ExecStage::new("xyz-non-existing-program");
        let spawned = pc
            .spawn(0, &stage, Wiring::Null, Wiring::Inherit, &mut quiet())
            .unwrap();
        assert!(spawned.is_none());
        assert_eq!(pc.live(), 0);
    }

    #[test]
    fn missing_program_in_path() {
        let mut pc = ProcessController::new();
        let stage = ExecStage::path_search("xyz-non-existing-program");
        let spawned = pc
            .spawn(0, &stage, Wiring::Null, Wiring::Inherit, &mut quiet())
            .unwrap();
        assert!(spawned.is_none());
    }

    #[test]
    fn exit_code_and_signal_are_distinguished() {
        let mut pc = ProcessController::new();
        let mut log = quiet();
        let exits = ExecStage::new("/bin/sh").args(["-c", "exit 3"]);
        let crashes = ExecStage::new("/bin/sh").args(["-c", "kill -SEGV $$"]);
        pc.spawn(0, &exits, Wiring::Null, Wiring::Null, &mut log).unwrap();
        pc.spawn(1, &crashes, Wiring::Null, Wiring::Null, &mut log).unwrap();
        assert_eq!(pc.live(), 2);

        let statuses = pc.wait_all(&mut log).unwrap();
        assert_eq!(
            statuses,
            vec![
                (0, StageStatus::Exited { code: 3 }),
                (1, StageStatus::Signaled { signal: 11 }),
            ]
        );
        assert_eq!(pc.live(), 0);
    }

    #[test]
    fn piped_ends_are_returned() {
        let mut pc = ProcessController::new();
        let mut log = quiet();
        let stage = ExecStage::path_search("cat");
        let spawned = pc
            .spawn(0, &stage, Wiring::Piped, Wiring::Piped, &mut log)
            .unwrap()
            .unwrap();
        assert!(spawned.stdin.is_some());
        assert!(spawned.stdout.is_some());
        drop(spawned);
        let statuses = pc.wait_all(&mut log).unwrap();
        assert_eq!(statuses, vec![(0, StageStatus::Exited { code: 0 })]);
    }

    #[test]
    fn resolve_finds_sh() {
        let path = OsStr::new("/nonexistent:/bin:/usr/bin");
        let found = resolve_in_path(Path::new("sh"), path).unwrap();
        assert!(found.ends_with("sh"));
        assert!(resolve_in_path(Path::new("xyz-nope"), path).is_none());
    }

    #[test]
    fn signal_names() {
        assert_eq!(signal_name(11), Some("SIGSEGV"));
        assert_eq!(signal_name(9), Some("SIGKILL"));
        assert_eq!(signal_name(0), None);
    }
}
