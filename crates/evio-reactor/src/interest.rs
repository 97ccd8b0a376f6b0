//! Interest and readiness flags.
//!
//! Plain `u8` newtypes rather than an external bitflags dependency; the set
//! of flags is tiny and fixed.

use core::fmt;
use core::ops::BitOr;

use nix::poll::PollFlags;

/// What a source wants to be woken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Interest(u8);

impl Interest {
    pub const EMPTY: Self = Self(0);
    pub const READABLE: Self = Self(1);
    pub const WRITABLE: Self = Self(2);

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn to_poll_flags(self) -> PollFlags {
        let mut flags = PollFlags::empty();
        if self.contains(Self::READABLE) {
            flags |= PollFlags::POLLIN;
        }
        if self.contains(Self::WRITABLE) {
            flags |= PollFlags::POLLOUT;
        }
        flags
    }
}

impl BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (
            self.contains(Self::READABLE),
            self.contains(Self::WRITABLE),
        ) {
            (true, true) => f.write_str("rw"),
            (true, false) => f.write_str("r-"),
            (false, true) => f.write_str("-w"),
            (false, false) => f.write_str("--"),
        }
    }
}

/// What the OS reported for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Ready(u8);

impl Ready {
    pub const EMPTY: Self = Self(0);
    pub const READABLE: Self = Self(1);
    pub const WRITABLE: Self = Self(2);
    /// Peer hung up. Reported regardless of interest.
    pub const HUP: Self = Self(4);
    /// Error condition on the fd. Reported regardless of interest.
    pub const ERROR: Self = Self(8);

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_readable(self) -> bool {
        self.contains(Self::READABLE)
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    #[inline]
    pub const fn is_hup(self) -> bool {
        self.contains(Self::HUP)
    }

    #[inline]
    pub const fn is_error(self) -> bool {
        self.contains(Self::ERROR)
    }

    pub(crate) fn from_poll_flags(flags: PollFlags) -> Self {
        let mut ready = Self::EMPTY;
        if flags.intersects(PollFlags::POLLIN) {
            ready = ready | Self::READABLE;
        }
        if flags.intersects(PollFlags::POLLOUT) {
            ready = ready | Self::WRITABLE;
        }
        if flags.intersects(PollFlags::POLLHUP) {
            ready = ready | Self::HUP;
        }
        if flags.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
            ready = ready | Self::ERROR;
        }
        ready
    }
}

impl BitOr for Ready {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
