//! Typed stream events.
//!
//! Events are plain values produced by the completion paths and delivered to
//! listeners. They carry no identity beyond their payload and are not
//! retained after dispatch.

use core::fmt;

/// One outcome on a stream resource or operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Connection established.
    Connect,

    /// Peer closed its write side; no more data will arrive.
    End,

    /// An incoming connection is ready to accept.
    Listen,

    /// The write side has been fully closed after flushing pending writes.
    Shutdown,

    /// One queued write completed.
    Write,

    /// Bytes arrived on a reading stream.
    Data(DataEvent),

    /// An operation failed.
    Error(ErrorEvent),
}

impl StreamEvent {
    /// Shorthand predicate used in dispatch paths.
    #[inline]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Bytes read from the stream. Ownership of the buffer moves into the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEvent {
    /// The buffer handed out by the allocation callback for this cycle.
    pub data: Box<[u8]>,
    /// Number of valid bytes at the front of `data`.
    pub len: usize,
}

impl DataEvent {
    pub fn new(data: Box<[u8]>, len: usize) -> Self {
        debug_assert!(len <= data.len());
        Self { data, len }
    }

    /// The valid portion of the buffer.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// A failed operation. `code` is the negated errno reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorEvent {
    /// Negative status: `-EPIPE`, `-ECONNRESET`, ...
    pub code: i32,
}

impl ErrorEvent {
    /// Build from a negative status code. Positive inputs are negated so the
    /// stored code is always `<= 0`.
    pub fn new(code: i32) -> Self {
        Self {
            code: if code > 0 { -code } else { code },
        }
    }

    /// The positive errno value.
    #[inline]
    pub const fn errno(&self) -> i32 {
        -self.code
    }

    /// Symbolic name for common errnos, "EUNKNOWN" otherwise.
    pub fn name(&self) -> &'static str {
        match self.errno() {
            1 => "EPERM",
            2 => "ENOENT",
            4 => "EINTR",
            5 => "EIO",
            9 => "EBADF",
            11 => "EAGAIN",
            13 => "EACCES",
            22 => "EINVAL",
            32 => "EPIPE",
            98 => "EADDRINUSE",
            104 => "ECONNRESET",
            107 => "ENOTCONN",
            110 => "ETIMEDOUT",
            111 => "ECONNREFUSED",
            125 => "ECANCELED",
            _ => "EUNKNOWN",
        }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code)
    }
}
