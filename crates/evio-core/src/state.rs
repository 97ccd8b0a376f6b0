//! Stream resource lifecycle state.

use core::fmt;

/// State of a stream resource.
///
/// Reading is tracked separately (it toggles on a `Connected` resource and
/// does not change the lifecycle state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// Created against a loop, no OS handle bound yet. Valid accept target.
    Uninit = 0,

    /// OS handle bound (created or bound to an address), not yet connected
    /// or listening.
    Open = 1,

    /// Accepting incoming connections. Spawns `Connected` resources via
    /// `accept`; never itself becomes `Connected`.
    Listening = 2,

    /// Duplex channel established.
    Connected = 3,

    /// `shutdown()` issued, pending writes still flushing.
    ShuttingDown = 4,

    /// Write side fully closed. Read side may still be open.
    ShutdownDone = 5,

    /// Terminal. No further operations may be issued.
    Closed = 6,
}

impl StreamState {
    /// Whether the resource holds a live OS handle.
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, StreamState::Uninit | StreamState::Closed)
    }

    /// Whether new write operations may be issued.
    #[inline]
    pub const fn can_write(&self) -> bool {
        matches!(self, StreamState::Connected)
    }

    /// Whether reads may be started or continue.
    #[inline]
    pub const fn can_read(&self) -> bool {
        matches!(
            self,
            StreamState::Connected | StreamState::ShuttingDown | StreamState::ShutdownDone
        )
    }

    #[inline]
    pub const fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

impl From<u8> for StreamState {
    fn from(v: u8) -> Self {
        match v {
            0 => StreamState::Uninit,
            1 => StreamState::Open,
            2 => StreamState::Listening,
            3 => StreamState::Connected,
            4 => StreamState::ShuttingDown,
            5 => StreamState::ShutdownDone,
            6 => StreamState::Closed,
            _ => StreamState::Closed, // Default for invalid values
        }
    }
}

impl From<StreamState> for u8 {
    fn from(state: StreamState) -> u8 {
        state as u8
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Uninit => "uninit",
            StreamState::Open => "open",
            StreamState::Listening => "listening",
            StreamState::Connected => "connected",
            StreamState::ShuttingDown => "shutting-down",
            StreamState::ShutdownDone => "shutdown-done",
            StreamState::Closed => "closed",
        };
        f.write_str(name)
    }
}
