//! The pipeline event loop.
//!
//! A single thread moves bytes between every link of the chain. The only
//! place it ever sleeps is `poll(2)`; every callback runs to completion
//! inside one iteration.
//!
//! ```text
//!   loop {
//!       pump callbacks ── sources fill, functions transform, sinks drain
//!       all links Closed? ── break
//!       poll(POLLIN on upstream fds, POLLOUT on downstream fds)
//!       read ready fds into link buffers, write buffers to ready fds
//!   }
//!   reap children
//! ```
//!
//! Link lifecycle:
//!
//! ```text
//!   Open ──(upstream EOF)──▶ UpstreamEof ──(buffer drained, downstream closed)──▶ Closed
//!     └──────────────(write error / sink error)──────────────────────────────────▶ Closed
//! ```

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;

use execpipe_types::{LinkError, SPAWN_FAILURE_CODE, StageResult, StageStatus};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::adapters::{
    BytesSink, FileSink, PipeFunction, PipeSink, PipeSource, StageWriter, StringSink,
};
use crate::buffer::RingBuffer;
use crate::config::PipeConfig;
use crate::debug::{DebugLog, debug_line};
use crate::error::{PipeError, PipeResult};
use crate::process::{ProcessController, Wiring};
use crate::stage::{Drain, Feed, Input, Output, Stage, StageSet};

/// State of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Upstream may still produce.
    Open,
    /// Upstream is done; buffered bytes still have to reach downstream.
    UpstreamEof,
    /// Nothing more flows through this link.
    Closed,
}

enum Upstream<'a> {
    None,
    Fd(File),
    Source(Box<dyn PipeSource + 'a>),
    /// The function stage before this link pushes into the buffer.
    Function,
}

enum Downstream<'a> {
    None,
    Fd(File),
    Function(Box<dyn PipeFunction + 'a>),
    Sink(Box<dyn PipeSink + 'a>),
    Discard,
}

struct Link<'a> {
    buffer: RingBuffer,
    state: LinkState,
    upstream: Upstream<'a>,
    downstream: Downstream<'a>,
}

impl Link<'_> {
    fn upstream_fd(&self) -> Option<&File> {
        match &self.upstream {
            Upstream::Fd(file) => Some(file),
            _ => None,
        }
    }

    fn downstream_fd(&self) -> Option<&File> {
        match &self.downstream {
            Downstream::Fd(file) => Some(file),
            _ => None,
        }
    }

    /// Upstream finished: keep the buffered bytes, stop expecting more.
    fn end_upstream(&mut self) {
        self.upstream = Upstream::None;
        if self.state == LinkState::Open {
            self.state = LinkState::UpstreamEof;
        }
    }

    /// Close both ends and drop whatever is buffered.
    fn close(&mut self) {
        self.state = LinkState::Closed;
        self.buffer.clear();
        self.upstream = Upstream::None;
        self.downstream = Downstream::None;
    }

    fn drained(&self) -> bool {
        self.state == LinkState::UpstreamEof && self.buffer.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Read,
    Write,
}

/// What the driver hands back once every link is closed.
#[derive(Debug)]
pub struct DriverOutcome {
    pub stages: Vec<StageResult>,
    pub link_errors: Vec<LinkError>,
}

/// Runs one pipeline: wiring, spawning, the I/O loop, and reaping.
pub struct Driver<'a, 'l> {
    // Declared before `processes` so pipe ends close before children are
    // reaped on an aborted run.
    links: Vec<Link<'a>>,
    processes: ProcessController,
    stages: Vec<StageResult>,
    link_errors: Vec<LinkError>,
    config: PipeConfig,
    log: &'l mut DebugLog<'a>,
    scratch: Vec<u8>,
}

impl<'a, 'l> Driver<'a, 'l> {
    /// Wire links for `set` and spawn every external stage.
    ///
    /// Input and output files are opened before any child exists, so a bad
    /// path fails the run without side effects.
    pub fn start(
        set: StageSet<'a>,
        config: &PipeConfig,
        log: &'l mut DebugLog<'a>,
    ) -> PipeResult<Self> {
        let n = set.len();
        let feeds: Vec<Feed> = (0..set.link_count()).map(|k| set.feed(k)).collect();
        let drains: Vec<Drain> = (0..set.link_count()).map(|k| set.drain(k)).collect();
        let mut stages = set.result_slots();
        let StageSet {
            stages: chain,
            input,
            output,
        } = set;

        let mut input_bytes: &[u8] = &[];
        let mut input_fd = None;
        let mut source = None;
        match input {
            Input::None => {}
            Input::Bytes(bytes) => input_bytes = bytes,
            Input::File(path) => {
                let file = File::open(&path).map_err(|source| PipeError::OpenInput {
                    path: path.clone(),
                    source,
                })?;
                input_fd = Some(file);
            }
            Input::Source(src) => source = Some(src),
        }

        let mut sink: Option<Box<dyn PipeSink + 'a>> = match output {
            Output::None => None,
            Output::Bytes(out) => Some(Box::new(BytesSink::new(out))),
            Output::String(out) => Some(Box::new(StringSink::new(out))),
            Output::File(path) => {
                let file = FileSink::create(&path).map_err(|source| PipeError::OpenOutput {
                    path: path.clone(),
                    source,
                })?;
                Some(Box::new(file))
            }
            Output::Sink(sink) => Some(sink),
        };

        let mut processes = ProcessController::new();
        let mut stdin_ends: Vec<Option<File>> = (0..n).map(|_| None).collect();
        let mut stdout_ends: Vec<Option<File>> = (0..n).map(|_| None).collect();
        let mut functions: Vec<Option<Box<dyn PipeFunction + 'a>>> = (0..n).map(|_| None).collect();

        for (i, stage) in chain.into_iter().enumerate() {
            match stage {
                Stage::Exec(exec) => {
                    let stdin = if drains[i] == Drain::Process(i) {
                        Wiring::Piped
                    } else {
                        Wiring::Null
                    };
                    let stdout = if feeds[i + 1] == Feed::Process(i) {
                        Wiring::Piped
                    } else {
                        Wiring::Inherit
                    };
                    match processes.spawn(i, &exec, stdin, stdout, log)? {
                        Some(spawned) => {
                            stdin_ends[i] = spawned.stdin;
                            stdout_ends[i] = spawned.stdout;
                        }
                        None => {
                            stages[i].status = StageStatus::Exited {
                                code: SPAWN_FAILURE_CODE,
                            }
                        }
                    }
                }
                Stage::Function(f) => functions[i] = Some(f),
            }
        }

        let mut links = Vec::with_capacity(feeds.len());
        for (k, (feed, drain)) in feeds.into_iter().zip(drains).enumerate() {
            let mut buffer = RingBuffer::with_capacity(config.buffer_capacity);
            let upstream = match feed {
                Feed::Nothing => Upstream::None,
                Feed::Bytes => {
                    buffer.append(input_bytes);
                    Upstream::None
                }
                Feed::File => input_fd.take().map_or(Upstream::None, Upstream::Fd),
                Feed::Source => source.take().map_or(Upstream::None, Upstream::Source),
                Feed::Process(i) => stdout_ends[i].take().map_or(Upstream::None, Upstream::Fd),
                Feed::Function(_) => Upstream::Function,
            };
            let downstream = match drain {
                Drain::Nothing => Downstream::None,
                Drain::Process(i) => stdin_ends[i].take().map_or(Downstream::None, Downstream::Fd),
                Drain::Function(i) => functions[i]
                    .take()
                    .map_or(Downstream::None, Downstream::Function),
                Drain::Sink => sink.take().map_or(Downstream::None, Downstream::Sink),
                Drain::Discard => Downstream::Discard,
            };

            let mut link = Link {
                buffer,
                state: LinkState::Open,
                upstream,
                downstream,
            };
            if matches!(link.downstream, Downstream::None) {
                // Nobody will ever read this link. Dropping the upstream end
                // gives a producing child EPIPE instead of a stall.
                link.close();
            } else if matches!(link.upstream, Upstream::None) {
                link.state = LinkState::UpstreamEof;
            }
            debug_line!(log, Debug, "link {}: {:?} -> {:?}, {:?}", k, feed, drain, link.state);
            links.push(link);
        }

        Ok(Self {
            links,
            processes,
            stages,
            link_errors: Vec::new(),
            config: config.clone(),
            log,
            scratch: vec![0; config.read_chunk_size.max(1)],
        })
    }

    /// Move bytes until every link is closed, then reap all children.
    pub fn run(mut self) -> PipeResult<DriverOutcome> {
        loop {
            let progressed = self.pump();

            if self.links.iter().all(|l| l.state == LinkState::Closed) {
                break;
            }

            let ready = {
                let mut interest = Vec::new();
                let mut fds = Vec::new();
                for (k, link) in self.links.iter().enumerate() {
                    if link.state == LinkState::Open
                        && link.buffer.len() < self.config.high_water
                        && let Some(file) = link.upstream_fd()
                    {
                        fds.push(PollFd::new(file.as_fd(), PollFlags::POLLIN));
                        interest.push((k, Side::Read));
                    }
                    if !link.buffer.is_empty()
                        && let Some(file) = link.downstream_fd()
                    {
                        fds.push(PollFd::new(file.as_fd(), PollFlags::POLLOUT));
                        interest.push((k, Side::Write));
                    }
                }

                if fds.is_empty() {
                    if progressed {
                        continue;
                    }
                    return Err(PipeError::Invariant(format!(
                        "{} links open but nothing to wait on",
                        self.open_links()
                    )));
                }

                let timeout = if progressed {
                    PollTimeout::ZERO
                } else {
                    PollTimeout::from(self.config.poll_timeout_ms)
                };
                match poll(&mut fds, timeout) {
                    Ok(0) => Vec::new(),
                    Ok(_) => fds
                        .iter()
                        .zip(interest)
                        .filter_map(|(fd, (k, side))| {
                            fd.revents()
                                .filter(|r| !r.is_empty())
                                .map(|r| (k, side, r))
                        })
                        .collect(),
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(PipeError::Poll(e)),
                }
            };

            if ready.is_empty() && !progressed {
                debug_line!(
                    self.log,
                    Debug,
                    "poll timeout: {} links open, {} children running",
                    self.open_links(),
                    self.processes.live()
                );
            }

            for (k, side, revents) in ready {
                if revents.contains(PollFlags::POLLNVAL) {
                    return Err(PipeError::Invariant(format!(
                        "link {k}: polled a closed descriptor"
                    )));
                }
                match side {
                    Side::Read => self.read_link(k),
                    Side::Write => self.write_link(k),
                }
            }
        }

        debug_line!(self.log, Info, "all links closed, reaping {} children", self.processes.live());
        for (stage, status) in self.processes.wait_all(self.log)? {
            self.stages[stage].status = status;
        }

        Ok(DriverOutcome {
            stages: std::mem::take(&mut self.stages),
            link_errors: std::mem::take(&mut self.link_errors),
        })
    }

    fn open_links(&self) -> usize {
        self.links
            .iter()
            .filter(|l| l.state != LinkState::Closed)
            .count()
    }

    /// Run every in-process endpoint once. Returns true if anything moved.
    fn pump(&mut self) -> bool {
        let mut progressed = false;
        for k in 0..self.links.len() {
            progressed |= self.pump_source(k);
            progressed |= self.pump_downstream(k);
        }
        progressed
    }

    fn pump_source(&mut self, k: usize) -> bool {
        let high_water = self.config.high_water;
        let link = &mut self.links[k];
        if link.state != LinkState::Open || link.buffer.len() >= high_water {
            return false;
        }
        let Upstream::Source(source) = &mut link.upstream else {
            return false;
        };

        let mut out = StageWriter::new(&mut link.buffer);
        let more = source.poll(&mut out);
        let written = out.written();
        debug_line!(self.log, Trace, "link {}: source produced {} bytes", k, written);
        if !more {
            link.end_upstream();
            debug_line!(self.log, Info, "link {}: source finished", k);
        }
        // A source that returned without data may still produce later.
        true
    }

    fn pump_downstream(&mut self, k: usize) -> bool {
        match self.links[k].downstream {
            Downstream::None => false,
            Downstream::Fd(_) => {
                if self.links[k].drained() {
                    self.links[k].close();
                    debug_line!(self.log, Debug, "link {}: drained, closed downstream input", k);
                    true
                } else {
                    false
                }
            }
            Downstream::Function(_) => self.pump_function(k),
            Downstream::Sink(_) => self.pump_sink(k),
            Downstream::Discard => {
                let link = &mut self.links[k];
                let moved = !link.buffer.is_empty();
                link.buffer.clear();
                if link.drained() {
                    link.close();
                    return true;
                }
                moved
            }
        }
    }

    /// Feed link `k` into the function that drains it; its output goes to
    /// link `k + 1`.
    fn pump_function(&mut self, k: usize) -> bool {
        let high_water = self.config.high_water;
        let (left, right) = self.links.split_at_mut(k + 1);
        let link = &mut left[k];
        let Some(out) = right.first_mut() else {
            return false;
        };
        let Downstream::Function(function) = &mut link.downstream else {
            return false;
        };

        let mut progressed = false;
        while !link.buffer.is_empty() && out.buffer.len() < high_water {
            let chunk = link.buffer.readable();
            let n = chunk.len();
            function.process(chunk, &mut StageWriter::new(&mut out.buffer));
            link.buffer.consume(n);
            if out.state == LinkState::Closed {
                out.buffer.clear();
            }
            progressed = true;
        }

        if link.state == LinkState::UpstreamEof && link.buffer.is_empty() {
            function.eof(&mut StageWriter::new(&mut out.buffer));
            if out.state == LinkState::Closed {
                out.buffer.clear();
            }
            out.end_upstream();
            link.close();
            debug_line!(self.log, Info, "stage {}: function reached end of input", k);
            progressed = true;
        }
        progressed
    }

    fn pump_sink(&mut self, k: usize) -> bool {
        let link = &mut self.links[k];
        let Downstream::Sink(sink) = &mut link.downstream else {
            return false;
        };

        let mut progressed = false;
        let mut failure = None;
        while !link.buffer.is_empty() {
            let chunk = link.buffer.readable();
            let n = chunk.len();
            if let Err(e) = sink.process(chunk) {
                failure = Some(e);
                break;
            }
            link.buffer.consume(n);
            progressed = true;
        }

        if failure.is_none() && link.state == LinkState::UpstreamEof && link.buffer.is_empty() {
            match sink.eof() {
                Ok(()) => {
                    link.close();
                    debug_line!(self.log, Debug, "link {}: sink reached end of output", k);
                }
                Err(e) => failure = Some(e),
            }
            progressed = true;
        }

        if let Some(e) = failure {
            self.fail_link(k, "sink", e);
            progressed = true;
        }
        progressed
    }

    fn read_link(&mut self, k: usize) {
        let link = &mut self.links[k];
        let Upstream::Fd(file) = &mut link.upstream else {
            return;
        };

        match file.read(&mut self.scratch) {
            Ok(0) => {
                link.end_upstream();
                debug_line!(self.log, Debug, "link {}: upstream end of stream", k);
            }
            Ok(n) => {
                link.buffer.append(&self.scratch[..n]);
                debug_line!(self.log, Trace, "link {}: read {} bytes", k, n);
            }
            Err(e) if is_transient(&e) => {}
            Err(e) => {
                // Keep what was buffered; the upstream is simply over.
                link.end_upstream();
                self.record_error(k, "read", &e);
            }
        }
    }

    fn write_link(&mut self, k: usize) {
        let link = &mut self.links[k];
        let Downstream::Fd(file) = &mut link.downstream else {
            return;
        };

        let chunk = link.buffer.readable();
        match file.write(chunk) {
            Ok(n) => {
                link.buffer.consume(n);
                debug_line!(self.log, Trace, "link {}: wrote {} bytes", k, n);
            }
            Err(e) if is_transient(&e) => {}
            Err(e) => self.fail_link(k, "write", e),
        }
    }

    /// Close link `k` early after an I/O error. Sibling links carry on.
    fn fail_link(&mut self, k: usize, what: &str, error: io::Error) {
        self.links[k].close();
        self.record_error(k, what, &error);
    }

    fn record_error(&mut self, k: usize, what: &str, error: &io::Error) {
        debug_line!(self.log, Error, "link {}: {} failed: {}", k, what, error);
        tracing::debug!(link = k, error = %error, "{what} failed");
        self.link_errors.push(LinkError {
            link: k,
            message: format!("{what}: {error}"),
        });
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugLevel;
    use crate::stage::ExecStage;

    struct Echo;

    impl PipeFunction for Echo {
        fn process(&mut self, data: &[u8], out: &mut StageWriter<'_>) {
            out.write(data);
        }
    }

    fn states(driver: &Driver<'_, '_>) -> Vec<LinkState> {
        driver.links.iter().map(|l| l.state).collect()
    }

    #[test]
    fn empty_input_starts_at_eof() {
        let mut out = Vec::new();
        let mut set = StageSet::new();
        set.input = Input::Bytes(b"");
        set.output = Output::Bytes(&mut out);
        set.push(Stage::Function(Box::new(Echo)));

        let mut log = DebugLog::new(DebugLevel::None);
        let driver = Driver::start(set, &PipeConfig::default(), &mut log).unwrap();
        assert_eq!(states(&driver), vec![LinkState::UpstreamEof, LinkState::Open]);

        let outcome = driver.run().unwrap();
        assert_eq!(outcome.stages, vec![StageResult::in_process()]);
        assert!(outcome.link_errors.is_empty());
        drop(log);
        assert!(out.is_empty());
    }

    #[test]
    fn failed_spawn_closes_its_input_and_ends_its_output() {
        let mut out = Vec::new();
        let mut set = StageSet::new();
        set.input = Input::Bytes(b"abc");
        set.output = Output::Bytes(&mut out);
        set.push(Stage::Exec(ExecStage::path_search("xyz-non-existing-program")));

        let mut log = DebugLog::new(DebugLevel::None);
        let driver = Driver::start(set, &PipeConfig::default(), &mut log).unwrap();
        assert_eq!(states(&driver), vec![LinkState::Closed, LinkState::UpstreamEof]);

        let outcome = driver.run().unwrap();
        assert_eq!(outcome.stages[0].status, StageStatus::Exited { code: 255 });
    }

    #[test]
    fn trailing_function_output_is_discarded() {
        let mut set = StageSet::new();
        set.input = Input::Bytes(b"dropped");
        set.push(Stage::Function(Box::new(Echo)));

        let mut lines = Vec::new();
        {
            let mut log = DebugLog::new(DebugLevel::Debug);
            log.set_output(|line: &str| lines.push(line.to_string()));
            let driver = Driver::start(set, &PipeConfig::default(), &mut log).unwrap();
            driver.run().unwrap();
        }
        assert!(lines.iter().any(|l| l.contains("Discard")), "{lines:?}");
    }
}
