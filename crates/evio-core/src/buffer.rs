//! Write buffer ownership.
//!
//! A buffer crosses the caller/reactor boundary in one of two modes:
//! transferred (`Owned`) or caller-retained (`Borrowed`). Release happens in
//! exactly one place, `Drop`, so every completion path (success, error,
//! cancellation, loop teardown) frees a transferred buffer exactly once and
//! never touches a borrowed one.

use core::fmt;

/// Bytes handed to a write operation.
pub enum WriteBuf {
    /// The operation owns the allocation and frees it on completion.
    Owned(Box<[u8]>),

    /// The caller retains ownership. The pointed-to bytes must outlive the
    /// operation; a violated lifetime is undefined behavior, not detected.
    Borrowed { ptr: *const u8, len: usize },
}

impl WriteBuf {
    /// Transfer ownership of `data` to the operation.
    pub fn owned(data: impl Into<Box<[u8]>>) -> Self {
        Self::Owned(data.into())
    }

    /// Borrow `data` for the duration of the operation.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `data` stays valid and unmoved until
    /// the operation's completion event has been published.
    pub unsafe fn borrowed(data: &[u8]) -> Self {
        Self::Borrowed {
            ptr: data.as_ptr(),
            len: data.len(),
        }
    }

    /// The full byte range of the buffer.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Owned(data) => data,
            // Safety: upheld by the `borrowed()` caller contract.
            Self::Borrowed { ptr, len } => unsafe { std::slice::from_raw_parts(*ptr, *len) },
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Owned(data) => data.len(),
            Self::Borrowed { len, .. } => *len,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

impl From<Vec<u8>> for WriteBuf {
    fn from(data: Vec<u8>) -> Self {
        Self::Owned(data.into_boxed_slice())
    }
}

impl fmt::Debug for WriteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned(data) => write!(f, "WriteBuf::Owned({} bytes)", data.len()),
            Self::Borrowed { len, .. } => write!(f, "WriteBuf::Borrowed({} bytes)", len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_roundtrip() {
        let buf = WriteBuf::owned(vec![1u8, 2, 3]);
        assert_eq!(buf.as_bytes(), &[1, 2, 3]);
        assert_eq!(buf.len(), 3);
        assert!(buf.is_owned());
    }

    #[test]
    fn test_borrowed_no_release() {
        let backing = vec![9u8; 16];
        {
            let buf = unsafe { WriteBuf::borrowed(&backing) };
            assert_eq!(buf.as_bytes(), &backing[..]);
            assert!(!buf.is_owned());
        }
        // Backing still valid after the borrowed buf dropped.
        assert_eq!(backing[0], 9);
    }

    #[test]
    fn test_from_vec() {
        let buf: WriteBuf = vec![7u8; 4].into();
        assert_eq!(buf.len(), 4);
        assert!(!buf.is_empty());
    }
}
