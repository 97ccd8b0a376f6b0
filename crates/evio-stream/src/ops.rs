//! One-shot operation objects.
//!
//! Each in-flight asynchronous request (connect, shutdown, write) is one of
//! these. An operation owns its arguments, carries its own one-shot listener
//! registry, and completes exactly once: the `done` latch guarantees that a
//! second completion attempt is a silent no-op.
//!
//! Issuing an operation stores a strong `Rc` in the owning resource (write
//! queue or pending slot); the completion path takes that `Rc` out before
//! publishing, so the operation is destroyed right after its event is
//! delivered. The registered once-listeners just forward the resolved event
//! to the owning resource's persistent listeners.

use std::cell::Cell;
use std::os::fd::RawFd;

use evio_core::buffer::WriteBuf;
use evio_core::event::StreamEvent;
use evio_core::id::OpId;
use evio_core::listeners::Listeners;

/// Shared exactly-once completion behavior.
pub(crate) trait OneShot {
    fn done_flag(&self) -> &Cell<bool>;
    fn listeners(&self) -> &Listeners;

    /// Deliver the single completion event to the operation's listeners.
    /// Later calls do nothing.
    fn complete(&self, event: &StreamEvent) {
        if self.done_flag().replace(true) {
            return;
        }
        self.listeners().publish(event);
    }

    fn is_done(&self) -> bool {
        self.done_flag().get()
    }
}

/// A pending connection attempt.
pub(crate) struct ConnectOp {
    pub id: OpId,
    done: Cell<bool>,
    listeners: Listeners,
}

impl ConnectOp {
    pub fn new(id: OpId) -> Self {
        Self {
            id,
            done: Cell::new(false),
            listeners: Listeners::new(),
        }
    }
}

impl OneShot for ConnectOp {
    fn done_flag(&self) -> &Cell<bool> {
        &self.done
    }

    fn listeners(&self) -> &Listeners {
        &self.listeners
    }
}

/// A pending write-side shutdown. Executes once the write queue drains.
pub(crate) struct ShutdownOp {
    pub id: OpId,
    done: Cell<bool>,
    listeners: Listeners,
}

impl ShutdownOp {
    pub fn new(id: OpId) -> Self {
        Self {
            id,
            done: Cell::new(false),
            listeners: Listeners::new(),
        }
    }
}

impl OneShot for ShutdownOp {
    fn done_flag(&self) -> &Cell<bool> {
        &self.done
    }

    fn listeners(&self) -> &Listeners {
        &self.listeners
    }
}

/// A queued write.
///
/// Owns its buffer; the `WriteBuf` is released by `Drop` when the operation
/// is destroyed, on success, failure and cancellation alike. `send_fd` is
/// the optional handle transferred alongside the payload on IPC-capable
/// pipes; it is transmitted with the first byte of the payload.
pub(crate) struct WriteOp {
    pub id: OpId,
    pub buf: WriteBuf,
    pub send_fd: Option<RawFd>,
    pub written: Cell<usize>,
    done: Cell<bool>,
    listeners: Listeners,
}

impl WriteOp {
    pub fn new(id: OpId, buf: WriteBuf, send_fd: Option<RawFd>) -> Self {
        Self {
            id,
            buf,
            send_fd,
            written: Cell::new(0),
            done: Cell::new(false),
            listeners: Listeners::new(),
        }
    }

    /// Bytes not yet handed to the OS.
    pub fn remaining(&self) -> &[u8] {
        &self.buf.as_bytes()[self.written.get()..]
    }

    pub fn is_finished(&self) -> bool {
        self.written.get() >= self.buf.len()
    }

    /// Whether the attached handle still needs to be transmitted.
    pub fn fd_pending(&self) -> bool {
        self.send_fd.is_some() && self.written.get() == 0
    }
}

impl OneShot for WriteOp {
    fn done_flag(&self) -> &Cell<bool> {
        &self.done
    }

    fn listeners(&self) -> &Listeners {
        &self.listeners
    }
}
