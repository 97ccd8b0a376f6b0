//! Identifier types for sources, operations and listeners.
//!
//! These are the correlation currency between the reactor and the stream
//! layer: a `Token` names a registered source slot, an `OpId` names a single
//! in-flight operation, a `ListenerId` names one registered handler.

use core::fmt;

/// Opaque index of a source slot in the reactor registry.
///
/// Handed out by `register()`, consumed by `set_interest()`/`deregister()`.
/// Slots are reused, so a stale token must never be kept past deregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Token(pub u32);

impl Token {
    /// Sentinel for "not registered".
    pub const NONE: Self = Self(u32::MAX);

    #[inline]
    pub const fn new(idx: u32) -> Self {
        Self(idx)
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "Token(NONE)")
        } else {
            write!(f, "Token({})", self.0)
        }
    }
}

/// Correlation ID of a one-shot asynchronous operation.
///
/// Monotonically assigned per resource; used for logging and diagnostics,
/// never reused within a resource's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct OpId(pub u64);

impl OpId {
    pub const NONE: Self = Self(u64::MAX);

    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Identifier of a registered listener, used to remove it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ListenerId(pub u64);
