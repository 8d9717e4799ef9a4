//! Callback stages: sources, functions and sinks.
//!
//! These let a caller put byte-level logic into the chain without forking a
//! process. All three run synchronously inside the driver loop and must not
//! block: a callback that sleeps stalls the whole pipeline.
//!
//! ```text
//!   PipeSource ──▶ [link] ──▶ cat ──▶ [link] ──▶ PipeFunction ──▶ [link] ──▶ PipeSink
//!     poll()                                      process()/eof()            process()/eof()
//! ```

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::buffer::RingBuffer;

/// Write handle into the buffer of the link downstream of a callback.
///
/// Appends never block and never fail; the link buffer grows as needed.
pub struct StageWriter<'b> {
    buffer: &'b mut RingBuffer,
    written: usize,
}

impl<'b> StageWriter<'b> {
    pub(crate) fn new(buffer: &'b mut RingBuffer) -> Self {
        Self { buffer, written: 0 }
    }

    /// Append bytes to the downstream link.
    pub fn write(&mut self, data: &[u8]) {
        self.buffer.append(data);
        self.written += data.len();
    }

    /// Bytes written through this handle so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl Write for StageWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        StageWriter::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Programmatic data source at the head of the pipeline.
pub trait PipeSource {
    /// Produce more data into `out`.
    ///
    /// Returns `false` once the source is exhausted; it is not polled again.
    /// The driver only polls while the first link is below its high-water
    /// mark, so a source may write as much as it likes per call.
    fn poll(&mut self, out: &mut StageWriter<'_>) -> bool;
}

/// In-process transform between two stages.
pub trait PipeFunction {
    /// Handle a chunk of input, writing any output to `out`.
    fn process(&mut self, data: &[u8], out: &mut StageWriter<'_>);

    /// Called exactly once after the last input chunk, for trailing output.
    fn eof(&mut self, _out: &mut StageWriter<'_>) {}
}

/// Programmatic data sink at the tail of the pipeline.
pub trait PipeSink {
    /// Consume a chunk of pipeline output.
    ///
    /// An error closes the output link; it is recorded in the run result.
    fn process(&mut self, data: &[u8]) -> io::Result<()>;

    /// Called exactly once after the last chunk.
    fn eof(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: PipeSource + ?Sized> PipeSource for &mut T {
    fn poll(&mut self, out: &mut StageWriter<'_>) -> bool {
        (**self).poll(out)
    }
}

impl<T: PipeSource + ?Sized> PipeSource for Box<T> {
    fn poll(&mut self, out: &mut StageWriter<'_>) -> bool {
        (**self).poll(out)
    }
}

impl<T: PipeFunction + ?Sized> PipeFunction for &mut T {
    fn process(&mut self, data: &[u8], out: &mut StageWriter<'_>) {
        (**self).process(data, out)
    }

    fn eof(&mut self, out: &mut StageWriter<'_>) {
        (**self).eof(out)
    }
}

impl<T: PipeFunction + ?Sized> PipeFunction for Box<T> {
    fn process(&mut self, data: &[u8], out: &mut StageWriter<'_>) {
        (**self).process(data, out)
    }

    fn eof(&mut self, out: &mut StageWriter<'_>) {
        (**self).eof(out)
    }
}

impl<T: PipeSink + ?Sized> PipeSink for &mut T {
    fn process(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).process(data)
    }

    fn eof(&mut self) -> io::Result<()> {
        (**self).eof()
    }
}

impl<T: PipeSink + ?Sized> PipeSink for Box<T> {
    fn process(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).process(data)
    }

    fn eof(&mut self) -> io::Result<()> {
        (**self).eof()
    }
}

/// Sink that appends all output to a caller-owned byte vector.
pub struct BytesSink<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> BytesSink<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out }
    }
}

impl PipeSink for BytesSink<'_> {
    fn process(&mut self, data: &[u8]) -> io::Result<()> {
        self.out.extend_from_slice(data);
        Ok(())
    }
}

/// Sink that collects output and appends it to a caller-owned string at EOF.
///
/// Bytes are decoded once at the end, so multi-byte characters split across
/// chunks survive. Invalid UTF-8 is replaced with U+FFFD.
pub struct StringSink<'a> {
    out: &'a mut String,
    pending: Vec<u8>,
}

impl<'a> StringSink<'a> {
    pub fn new(out: &'a mut String) -> Self {
        Self {
            out,
            pending: Vec::new(),
        }
    }
}

impl PipeSink for StringSink<'_> {
    fn process(&mut self, data: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(data);
        Ok(())
    }

    fn eof(&mut self) -> io::Result<()> {
        self.out.push_str(&String::from_utf8_lossy(&self.pending));
        self.pending.clear();
        Ok(())
    }
}

/// Sink that writes output to a file, created or truncated on construction.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: File::create(path)?,
        })
    }
}

impl From<File> for FileSink {
    fn from(file: File) -> Self {
        Self { file }
    }
}

impl PipeSink for FileSink {
    fn process(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }

    fn eof(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
