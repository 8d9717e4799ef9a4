//! Growable ring buffer sitting on every pipeline link.
//!
//! An OS pipe holds only a few kilobytes, so a fast producer would stall on
//! a slow consumer. Each link instead buffers in the controlling process:
//!
//! ```text
//!   unwrapped:  [ . . . H=========T . . . ]   readable() = H..T
//!   wrapped:    [=====T . . . . . H=======]   readable() = H..end
//! ```
//!
//! `readable()` never spans the wrap boundary. A caller consumes the prefix
//! and asks again to see the bytes at the start of the storage.
//!
//! Capacity only grows. An append that does not fit reallocates to
//! `max(2 * capacity, capacity + pending)`; the head run keeps its length
//! across growth, so growth alone never changes what `readable()` returns.

/// Initial capacity of a freshly created buffer.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Byte queue with append-at-tail and consume-at-head.
pub struct RingBuffer {
    data: Vec<u8>,
    /// Offset of the first unread byte.
    head: usize,
    /// Number of unread bytes, contiguous or not.
    len: usize,
}

impl RingBuffer {
    /// Create an empty buffer with the default capacity (1 KiB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty buffer with the given capacity (at least one byte).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    /// Total number of unread bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the backing storage.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Longest contiguous run of unread bytes starting at the head.
    pub fn readable(&self) -> &[u8] {
        let end = (self.head + self.len).min(self.data.len());
        &self.data[self.head..end]
    }

    /// Mark the first `n` bytes of [`readable`](Self::readable) as read.
    ///
    /// # Panics
    ///
    /// If `n` exceeds the length of the readable prefix.
    pub fn consume(&mut self, n: usize) {
        let prefix = self.readable().len();
        assert!(
            n <= prefix,
            "consume({n}) exceeds readable prefix of {prefix} bytes"
        );
        self.head = (self.head + n) % self.data.len();
        self.len -= n;
    }

    /// Copy `bytes` to the tail, growing the storage first if they do not fit.
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.len + bytes.len() > self.data.len() {
            self.grow(bytes.len());
        }

        let cap = self.data.len();
        let tail = (self.head + self.len) % cap;
        // Free space from the tail runs either to the end of storage or, when
        // wrapped, up to the head. Both cases fit the first copy.
        let first = bytes.len().min(cap - tail);
        self.data[tail..tail + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&bytes[first..]);
        }
        self.len += bytes.len();
    }

    /// Drop all unread bytes. Capacity is kept.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn grow(&mut self, pending: usize) {
        let old_cap = self.data.len();
        let new_cap = (2 * old_cap).max(old_cap + pending);
        let mut data = vec![0; new_cap];

        let head_run = self.readable().len();
        if head_run == self.len {
            // Unwrapped: keep the run at its offset.
            data[self.head..self.head + self.len]
                .copy_from_slice(&self.data[self.head..self.head + self.len]);
        } else {
            // Wrapped: the head run moves to the end of the new storage, the
            // wrapped remainder stays at the start.
            let wrapped = self.len - head_run;
            data[new_cap - head_run..].copy_from_slice(&self.data[self.head..old_cap]);
            data[..wrapped].copy_from_slice(&self.data[..wrapped]);
            self.head = new_cap - head_run;
        }

        tracing::trace!(old_cap, new_cap, buffered = self.len, "ring buffer grew");
        self.data = data;
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.data.len())
            .field("head", &self.head)
            .field("len", &self.len)
            .finish()
    }
}
