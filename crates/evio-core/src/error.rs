//! Error types for the evio stream layer.
//!
//! Failures detectable at call time are returned as `Err(EvioError)`.
//! Failures of an already-issued operation are never returned; they are
//! published as an `ErrorEvent` to the relevant listener registry.

use core::fmt;

/// Result type for stream layer operations
pub type EvioResult<T> = Result<T, EvioError>;

/// Errors that can occur when issuing stream operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvioError {
    /// Operation attempted on a closed resource.
    Closed,

    /// An exclusive operation is already active (e.g. second `listen`).
    Busy,

    /// Malformed call: incompatible accept target, non-IPC pipe for a
    /// handle-passing write, resources on different loops, and so on.
    InvalidArgument(&'static str),

    /// Resource is not registered with the loop.
    NotRegistered,

    /// Source registry is full, cannot register another fd.
    RegistryFull,

    /// Resource is not in a state that allows the operation.
    InvalidState,

    /// OS error with errno.
    Os(i32),
}

impl fmt::Display for EvioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "resource is closed"),
            Self::Busy => write!(f, "operation already active"),
            Self::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            Self::NotRegistered => write!(f, "resource not registered with the loop"),
            Self::RegistryFull => write!(f, "source registry full"),
            Self::InvalidState => write!(f, "invalid state for operation"),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for EvioError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", EvioError::Closed), "resource is closed");
        assert_eq!(format!("{}", EvioError::Os(32)), "OS error: errno 32");
        assert_eq!(
            format!("{}", EvioError::InvalidArgument("accept target")),
            "invalid argument: accept target"
        );
    }

    #[test]
    fn test_eq() {
        assert_eq!(EvioError::Os(9), EvioError::Os(9));
        assert_ne!(EvioError::Os(9), EvioError::Closed);
    }
}
