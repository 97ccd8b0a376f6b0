//! Stream resource lifecycle and operation set.
//!
//! A `StreamResource` owns one OS stream handle, its lifecycle state, its
//! listener registry and its in-flight operations. It is the typed owner the
//! reactor resolves at the trampoline boundary: readiness dispatch arrives
//! through `IoDriver::on_ready`, is translated into reads, write-queue
//! drains or connect/shutdown completions, and leaves as typed events on
//! the listener registry.
//!
//! All mutation happens on the loop thread. The struct is `!Send` by
//! construction (`Rc`, `Cell`, `RefCell`) and no external synchronization
//! is provided.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};

use nix::errno::Errno;
use nix::sys::socket::{self, sockopt, Backlog, SockaddrLike};

use evio_core::buffer::WriteBuf;
use evio_core::event::{DataEvent, ErrorEvent, StreamEvent};
use evio_core::id::{ListenerId, OpId, Token};
use evio_core::listeners::Listeners;
use evio_core::state::StreamState;
use evio_core::{edebug, etrace, EvioError, EvioResult};
use evio_reactor::{EventLoop, Interest, IoDriver, Ready};

use crate::ops::{ConnectOp, OneShot, ShutdownOp, WriteOp};

/// What kind of stream a resource wraps. `accept` targets must match the
/// listener's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// TCP socket (IPv4 or IPv6).
    Tcp,
    /// Unix-domain stream socket; `ipc` enables handle passing.
    Pipe { ipc: bool },
}

impl StreamKind {
    #[inline]
    pub const fn is_ipc(self) -> bool {
        matches!(self, StreamKind::Pipe { ipc: true })
    }

    fn compatible(self, other: Self) -> bool {
        matches!(
            (self, other),
            (StreamKind::Tcp, StreamKind::Tcp) | (StreamKind::Pipe { .. }, StreamKind::Pipe { .. })
        )
    }
}

/// Buffer factory invoked before each read delivery cycle.
type AllocCb = Box<dyn FnMut(usize) -> Vec<u8>>;

/// One live stream endpoint.
///
/// Obtained through the loop-bound factories (`TcpSocket::new`,
/// `PipeSocket::new`) and shared as `Rc<StreamResource>`. In-flight
/// operations hold strong references to their arguments, and the resource
/// holds strong references to its in-flight operations, so issuing an
/// operation keeps everything alive until its single completion fires.
pub struct StreamResource {
    weak: Weak<StreamResource>,
    eloop: Rc<EventLoop>,
    kind: StreamKind,
    fd: RefCell<Option<OwnedFd>>,
    token: Cell<Token>,
    state: Cell<StreamState>,
    can_read: Cell<bool>,
    can_write: Cell<bool>,
    listeners: Listeners,

    reading: Cell<bool>,
    eof_seen: Cell<bool>,
    listen_failed: Cell<bool>,
    alloc_cb: RefCell<Option<AllocCb>>,
    received_fds: RefCell<VecDeque<OwnedFd>>,

    write_queue: RefCell<VecDeque<Rc<WriteOp>>>,
    connect_op: RefCell<Option<Rc<ConnectOp>>>,
    shutdown_op: RefCell<Option<Rc<ShutdownOp>>>,
    blocking_mode: Cell<bool>,
    next_op: Cell<u64>,
}

impl StreamResource {
    /// Factory: a fresh, uninitialized resource bound to `eloop`.
    pub fn new(eloop: &Rc<EventLoop>, kind: StreamKind) -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            eloop: Rc::clone(eloop),
            kind,
            fd: RefCell::new(None),
            token: Cell::new(Token::NONE),
            state: Cell::new(StreamState::Uninit),
            can_read: Cell::new(false),
            can_write: Cell::new(false),
            listeners: Listeners::new(),
            reading: Cell::new(false),
            eof_seen: Cell::new(false),
            listen_failed: Cell::new(false),
            alloc_cb: RefCell::new(None),
            received_fds: RefCell::new(VecDeque::new()),
            write_queue: RefCell::new(VecDeque::new()),
            connect_op: RefCell::new(None),
            shutdown_op: RefCell::new(None),
            blocking_mode: Cell::new(false),
            next_op: Cell::new(0),
        })
    }

    // ── Introspection ──

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    pub fn event_loop(&self) -> &Rc<EventLoop> {
        &self.eloop
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd.borrow().as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Whether the stream currently has read capability.
    pub fn readable(&self) -> bool {
        self.can_read.get()
    }

    /// Whether the stream currently has write capability.
    pub fn writable(&self) -> bool {
        self.can_write.get()
    }

    pub fn is_reading(&self) -> bool {
        self.reading.get()
    }

    pub fn pending_write_count(&self) -> usize {
        self.write_queue.borrow().len()
    }

    // ── Listener registration ──

    pub fn on<F>(&self, handler: F) -> ListenerId
    where
        F: FnMut(&StreamEvent) + 'static,
    {
        self.listeners.on(handler)
    }

    pub fn once<F>(&self, handler: F) -> ListenerId
    where
        F: FnMut(&StreamEvent) + 'static,
    {
        self.listeners.once(handler)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }

    /// Deliver an event to this resource's listeners.
    pub fn publish(&self, event: &StreamEvent) {
        self.listeners.publish(event);
    }

    // ── Handle binding ──

    /// Bind an OS handle and register it with the loop.
    pub(crate) fn install_fd(&self, fd: OwnedFd, state: StreamState) -> EvioResult<()> {
        if self.fd.borrow().is_some() {
            return Err(EvioError::InvalidState);
        }
        let rc = self.weak.upgrade().ok_or(EvioError::NotRegistered)?;
        let raw = fd.as_raw_fd();
        let token = self
            .eloop
            .register(raw, Interest::EMPTY, Rc::downgrade(&rc) as Weak<dyn IoDriver>)?;
        *self.fd.borrow_mut() = Some(fd);
        self.token.set(token);
        self.state.set(state);
        if state == StreamState::Connected {
            self.can_read.set(true);
            self.can_write.set(true);
        }
        edebug!("stream: fd {} installed, state {}", raw, state);
        Ok(())
    }

    // ── listen / accept ──

    /// Start listening for incoming connections. One `Listen` event is
    /// published per connection ready to accept. May be issued once.
    pub fn listen(&self, backlog: i32) -> EvioResult<()> {
        match self.state.get() {
            StreamState::Closed => return Err(EvioError::Closed),
            StreamState::Listening => return Err(EvioError::Busy),
            StreamState::Open => {}
            _ => return Err(EvioError::InvalidState),
        }
        let raw = self.raw_fd().ok_or(EvioError::NotRegistered)?;
        let backlog = Backlog::new(backlog).map_err(|e| EvioError::Os(e as i32))?;
        // Safety: raw comes from our still-held OwnedFd.
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw) };
        socket::listen(&borrowed, backlog).map_err(|e| EvioError::Os(e as i32))?;
        self.state.set(StreamState::Listening);
        self.update_interest();
        Ok(())
    }

    /// Accept a pending connection into `target`.
    ///
    /// `target` must be a fresh, uninitialized resource of a compatible kind
    /// on the same loop. Guaranteed to succeed on the first call after a
    /// `Listen` event; calling more than once per event is undefined and may
    /// fail with `Os(EAGAIN)`.
    pub fn accept(&self, target: &Rc<StreamResource>) -> EvioResult<()> {
        if self.state.get() != StreamState::Listening {
            return Err(EvioError::InvalidState);
        }
        if target.state.get() != StreamState::Uninit {
            return Err(EvioError::InvalidArgument("accept target must be uninitialized"));
        }
        if !Rc::ptr_eq(&self.eloop, &target.eloop) {
            return Err(EvioError::InvalidArgument("accept target on a different loop"));
        }
        if !self.kind.compatible(target.kind) {
            return Err(EvioError::InvalidArgument("accept target of incompatible kind"));
        }
        let raw = self.raw_fd().ok_or(EvioError::NotRegistered)?;
        let accepted = socket::accept4(
            raw,
            socket::SockFlag::SOCK_NONBLOCK | socket::SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|e| EvioError::Os(e as i32))?;
        // Safety: accept4 returned a fresh fd we now own.
        let owned = unsafe { OwnedFd::from_raw_fd(accepted) };
        target.install_fd(owned, StreamState::Connected)
    }

    // ── connect ──

    /// Issue an asynchronous connect against `addr`. Exactly one of
    /// `Connect` / `Error` is published on completion.
    pub(crate) fn issue_connect<A: SockaddrLike>(&self, addr: &A) -> EvioResult<()> {
        if self.state.get().is_closed() {
            return Err(EvioError::Closed);
        }
        if self.connect_op.borrow().is_some() {
            return Err(EvioError::Busy);
        }
        if self.state.get() != StreamState::Open {
            return Err(EvioError::InvalidState);
        }
        let raw = self.raw_fd().ok_or(EvioError::NotRegistered)?;

        let op = Rc::new(ConnectOp::new(self.next_op_id()));
        self.forward_to_self(op.listeners());
        etrace!("stream: connect {} issued on fd {}", op.id, raw);
        *self.connect_op.borrow_mut() = Some(op);

        match socket::connect(raw, addr) {
            // Completed in-line; report through the deferred queue so the
            // event never fires inside the issuing call.
            Ok(()) => self.defer_connect_completion(0),
            Err(Errno::EINPROGRESS) => self.update_interest(),
            Err(e) => self.defer_connect_completion(e as i32),
        }
        Ok(())
    }

    fn defer_connect_completion(&self, status: i32) {
        let weak = self.weak.clone();
        self.eloop.defer(move || {
            if let Some(res) = weak.upgrade() {
                res.finish_connect(status);
                res.update_interest();
            }
        });
    }

    fn finish_connect(&self, status: i32) {
        let Some(op) = self.connect_op.borrow_mut().take() else {
            return;
        };
        if status == 0 {
            self.state.set(StreamState::Connected);
            self.can_read.set(true);
            self.can_write.set(true);
            op.complete(&StreamEvent::Connect);
        } else {
            op.complete(&StreamEvent::Error(ErrorEvent::new(-status)));
        }
    }

    /// Error readiness on a listening socket: report once and stop watching
    /// so a level-triggered error condition cannot re-arm every tick.
    fn handle_listen_error(&self) {
        if self.listen_failed.replace(true) {
            return;
        }
        let code = match self.raw_fd() {
            Some(raw) => {
                // Safety: fd is held by self.
                let borrowed = unsafe { BorrowedFd::borrow_raw(raw) };
                match socket::getsockopt(&borrowed, sockopt::SocketError) {
                    Ok(0) | Err(_) => libc::EIO,
                    Ok(e) => e,
                }
            }
            None => libc::EBADF,
        };
        self.publish(&StreamEvent::Error(ErrorEvent::new(-code)));
    }

    fn handle_connect_ready(&self) {
        let status = match self.raw_fd() {
            Some(raw) => {
                // Safety: fd is held by self.
                let borrowed = unsafe { BorrowedFd::borrow_raw(raw) };
                socket::getsockopt(&borrowed, sockopt::SocketError).unwrap_or(libc::EIO)
            }
            None => libc::EBADF,
        };
        self.finish_connect(status);
    }

    // ── read / stop ──

    /// Start continuous reads. `Data` events are published as bytes arrive,
    /// one `End` when the peer closes its write side, `Error` on
    /// transmission failure. Continues until `stop()` or closure.
    pub fn read(&self) -> EvioResult<()> {
        if self.state.get().is_closed() {
            return Err(EvioError::Closed);
        }
        if !self.can_read.get() {
            return Err(EvioError::InvalidState);
        }
        self.reading.set(true);
        self.update_interest();
        Ok(())
    }

    /// Stop delivering read events. Idempotent; safe when not reading.
    pub fn stop(&self) {
        self.reading.set(false);
        if !self.state.get().is_closed() {
            self.update_interest();
        }
    }

    /// Override the per-cycle read buffer factory. The callback receives the
    /// suggested capacity and must return the buffer the reactor reads into.
    pub fn alloc<F>(&self, f: F)
    where
        F: FnMut(usize) -> Vec<u8> + 'static,
    {
        *self.alloc_cb.borrow_mut() = Some(Box::new(f));
    }

    /// Take the next stream handle received alongside IPC reads. Handles
    /// queue in arrival order; unclaimed ones are closed with the resource.
    pub fn pending_fd(&self) -> Option<OwnedFd> {
        self.received_fds.borrow_mut().pop_front()
    }

    fn do_read_cycle(&self) {
        let Some(raw) = self.raw_fd() else {
            return;
        };
        let suggested = self.eloop.config().read_buf_size;
        let mut buf = {
            let mut cb = self.alloc_cb.borrow_mut();
            match cb.as_mut() {
                Some(f) => f(suggested),
                None => vec![0u8; suggested],
            }
        };
        if buf.is_empty() {
            self.reading.set(false);
            self.update_interest();
            self.publish(&StreamEvent::Error(ErrorEvent::new(-libc::ENOBUFS)));
            return;
        }

        let result = if self.kind.is_ipc() {
            match sys::recv_with_fd(raw, &mut buf) {
                Ok((n, fd)) => {
                    if let Some(fd) = fd {
                        self.received_fds.borrow_mut().push_back(fd);
                    }
                    Ok(n)
                }
                Err(e) => Err(e),
            }
        } else {
            sys::read(raw, &mut buf)
        };

        match result {
            Ok(0) => {
                // Peer closed its write side. Latched: readiness storms from
                // POLLHUP must not re-deliver End.
                self.eof_seen.set(true);
                self.update_interest();
                self.publish(&StreamEvent::End);
            }
            Ok(n) => {
                etrace!("stream: fd {} read {} bytes", raw, n);
                self.publish(&StreamEvent::Data(DataEvent::new(buf.into_boxed_slice(), n)));
            }
            Err(e) if e == libc::EAGAIN || e == libc::EWOULDBLOCK => {}
            Err(e) => {
                self.reading.set(false);
                self.update_interest();
                self.publish(&StreamEvent::Error(ErrorEvent::new(-e)));
            }
        }
    }

    // ── write ──

    /// Queue a write. Writes on one resource complete in submission order;
    /// exactly one `Write` or `Error` event is published per call.
    pub fn write(&self, buf: WriteBuf) -> EvioResult<()> {
        self.enqueue_write(buf, None)
    }

    /// Queue a write of an owned byte vector.
    pub fn write_owned(&self, data: Vec<u8>) -> EvioResult<()> {
        self.enqueue_write(WriteBuf::from(data), None)
    }

    /// Queue a write of caller-owned bytes.
    ///
    /// # Safety
    ///
    /// `data` must stay valid and unmoved until this write's completion
    /// event has been published. A violated lifetime is undefined behavior.
    pub unsafe fn write_borrowed(&self, data: &[u8]) -> EvioResult<()> {
        self.enqueue_write(WriteBuf::borrowed(data), None)
    }

    /// Queue a handle-passing write: transmits `send`'s OS handle alongside
    /// the payload. Only valid on IPC-capable pipes; `send` must live on
    /// the same loop and the payload must be non-empty.
    pub fn write_to(&self, send: &Rc<StreamResource>, buf: WriteBuf) -> EvioResult<()> {
        if !self.kind.is_ipc() {
            return Err(EvioError::InvalidArgument("handle passing requires an IPC pipe"));
        }
        if !Rc::ptr_eq(&self.eloop, &send.eloop) {
            return Err(EvioError::InvalidArgument("send resource on a different loop"));
        }
        if buf.is_empty() {
            return Err(EvioError::InvalidArgument("handle-passing write requires payload bytes"));
        }
        let send_raw = send.raw_fd().ok_or(EvioError::InvalidArgument("send resource has no handle"))?;
        self.enqueue_write(buf, Some(send_raw))
    }

    fn enqueue_write(&self, buf: WriteBuf, send_fd: Option<RawFd>) -> EvioResult<()> {
        if self.state.get().is_closed() {
            return Err(EvioError::Closed);
        }
        if !self.state.get().can_write() || !self.can_write.get() {
            return Err(EvioError::InvalidState);
        }

        let op = Rc::new(WriteOp::new(self.next_op_id(), buf, send_fd));
        self.forward_to_self(op.listeners());
        etrace!("stream: write {} queued ({} bytes)", op.id, op.buf.len());

        if self.blocking_mode.get() {
            // Blocking mode: the syscall completes synchronously here, the
            // event still arrives through the loop's deferred queue.
            let event = self.write_sync(&op);
            self.eloop.defer(move || op.complete(&event));
            return Ok(());
        }

        self.write_queue.borrow_mut().push_back(op);
        self.update_interest();
        Ok(())
    }

    fn write_sync(&self, op: &Rc<WriteOp>) -> StreamEvent {
        let Some(raw) = self.raw_fd() else {
            return StreamEvent::Error(ErrorEvent::new(-libc::EBADF));
        };
        while !op.is_finished() {
            let result = if op.fd_pending() {
                sys::send_with_fd(raw, op.remaining(), op.send_fd.unwrap_or(-1))
            } else {
                sys::send(raw, op.remaining())
            };
            match result {
                Ok(n) => op.written.set(op.written.get() + n),
                Err(e) => return StreamEvent::Error(ErrorEvent::new(-e)),
            }
        }
        StreamEvent::Write
    }

    fn drain_writes(&self) {
        loop {
            let op = match self.write_queue.borrow().front() {
                Some(op) => Rc::clone(op),
                None => break,
            };
            match self.advance_write(&op) {
                WriteProgress::Done => {
                    self.write_queue.borrow_mut().pop_front();
                    op.complete(&StreamEvent::Write);
                }
                WriteProgress::Blocked => break,
                WriteProgress::Failed(errno) => {
                    self.write_queue.borrow_mut().pop_front();
                    op.complete(&StreamEvent::Error(ErrorEvent::new(-errno)));
                }
            }
        }

        if self.write_queue.borrow().is_empty() && self.state.get() == StreamState::ShuttingDown {
            self.finish_shutdown();
        }
    }

    fn advance_write(&self, op: &Rc<WriteOp>) -> WriteProgress {
        let Some(raw) = self.raw_fd() else {
            return WriteProgress::Failed(libc::EBADF);
        };
        loop {
            if op.is_finished() {
                return WriteProgress::Done;
            }
            let result = if op.fd_pending() {
                sys::send_with_fd(raw, op.remaining(), op.send_fd.unwrap_or(-1))
            } else {
                sys::send(raw, op.remaining())
            };
            match result {
                Ok(n) => op.written.set(op.written.get() + n),
                Err(e) if e == libc::EAGAIN || e == libc::EWOULDBLOCK => {
                    return WriteProgress::Blocked
                }
                Err(e) => return WriteProgress::Failed(e),
            }
        }
    }

    /// Best-effort synchronous write. Returns the number of bytes written
    /// (possibly 0); never queues, never returns a negative count. Any
    /// failed send returns 0 and publishes exactly one `Error` event;
    /// a full kernel buffer reports as `-EAGAIN`.
    pub fn try_write(&self, bytes: &[u8]) -> usize {
        let Some(raw) = self.raw_fd() else {
            self.publish(&StreamEvent::Error(ErrorEvent::new(-libc::EBADF)));
            return 0;
        };
        if !self.can_write.get() {
            self.publish(&StreamEvent::Error(ErrorEvent::new(-libc::ENOTCONN)));
            return 0;
        }
        match sys::send(raw, bytes) {
            Ok(n) => n,
            Err(e) => {
                self.publish(&StreamEvent::Error(ErrorEvent::new(-e)));
                0
            }
        }
    }

    /// Toggle blocking mode. While enabled, writes complete synchronously
    /// at submission; completion is still reported through events. Returns
    /// true on success.
    pub fn blocking(&self, enable: bool) -> bool {
        let Some(raw) = self.raw_fd() else {
            return false;
        };
        if !sys::set_nonblocking(raw, !enable) {
            return false;
        }
        self.blocking_mode.set(enable);
        true
    }

    // ── shutdown / close ──

    /// Close the write side once all pending writes flush. One `Shutdown`
    /// or `Error` event is published on completion; the read side stays
    /// open.
    pub fn shutdown(&self) -> EvioResult<()> {
        if self.state.get().is_closed() {
            return Err(EvioError::Closed);
        }
        if self.shutdown_op.borrow().is_some() {
            return Err(EvioError::Busy);
        }
        if self.state.get() != StreamState::Connected {
            return Err(EvioError::InvalidState);
        }

        let op = Rc::new(ShutdownOp::new(self.next_op_id()));
        self.forward_to_self(op.listeners());
        self.state.set(StreamState::ShuttingDown);
        self.can_write.set(false);
        *self.shutdown_op.borrow_mut() = Some(op);

        if self.write_queue.borrow().is_empty() {
            let weak = self.weak.clone();
            self.eloop.defer(move || {
                if let Some(res) = weak.upgrade() {
                    if res.state.get() == StreamState::ShuttingDown {
                        res.finish_shutdown();
                    }
                }
            });
        }
        Ok(())
    }

    fn finish_shutdown(&self) {
        let Some(op) = self.shutdown_op.borrow_mut().take() else {
            return;
        };
        let event = match self.raw_fd() {
            Some(raw) => match socket::shutdown(raw, socket::Shutdown::Write) {
                Ok(()) => {
                    self.state.set(StreamState::ShutdownDone);
                    StreamEvent::Shutdown
                }
                Err(e) => StreamEvent::Error(ErrorEvent::new(-(e as i32))),
            },
            None => StreamEvent::Error(ErrorEvent::new(-libc::EBADF)),
        };
        self.update_interest();
        op.complete(&event);
    }

    /// Close the resource. Pending operations complete with
    /// `Error(-ECANCELED)` through the deferred queue; their buffers are
    /// released exactly once when the operations are destroyed. No further
    /// operations may be issued.
    pub fn close(&self) {
        if self.state.get().is_closed() {
            return;
        }
        edebug!("stream: closing fd {:?}", self.raw_fd());
        self.state.set(StreamState::Closed);
        self.can_read.set(false);
        self.can_write.set(false);
        self.reading.set(false);

        if let Some(op) = self.connect_op.borrow_mut().take() {
            self.eloop
                .defer(move || op.complete(&StreamEvent::Error(ErrorEvent::new(-libc::ECANCELED))));
        }
        if let Some(op) = self.shutdown_op.borrow_mut().take() {
            self.eloop
                .defer(move || op.complete(&StreamEvent::Error(ErrorEvent::new(-libc::ECANCELED))));
        }
        let cancelled: Vec<Rc<WriteOp>> = self.write_queue.borrow_mut().drain(..).collect();
        for op in cancelled {
            self.eloop
                .defer(move || op.complete(&StreamEvent::Error(ErrorEvent::new(-libc::ECANCELED))));
        }

        let token = self.token.replace(Token::NONE);
        if !token.is_none() {
            let _ = self.eloop.deregister(token);
        }
        // Dropping the OwnedFd closes the handle.
        self.fd.borrow_mut().take();
    }

    // ── internals ──

    fn next_op_id(&self) -> OpId {
        let id = self.next_op.get();
        self.next_op.set(id + 1);
        OpId::new(id)
    }

    /// Attach the forwarding listener: the operation's resolved event is
    /// re-published to this resource's persistent listeners.
    fn forward_to_self(&self, listeners: &Listeners) {
        let weak = self.weak.clone();
        listeners.once(move |event| {
            if let Some(res) = weak.upgrade() {
                res.publish(event);
            }
        });
    }

    fn update_interest(&self) {
        let token = self.token.get();
        if token.is_none() {
            return;
        }
        let state = self.state.get();
        let mut interest = Interest::EMPTY;
        if (state == StreamState::Listening && !self.listen_failed.get())
            || (self.reading.get() && !self.eof_seen.get() && state.can_read())
        {
            interest = interest | Interest::READABLE;
        }
        if self.connect_op.borrow().is_some() || !self.write_queue.borrow().is_empty() {
            interest = interest | Interest::WRITABLE;
        }
        let _ = self.eloop.set_interest(token, interest);
    }
}

enum WriteProgress {
    Done,
    Blocked,
    Failed(i32),
}

impl IoDriver for StreamResource {
    fn on_ready(self: Rc<Self>, ready: Ready) {
        if self.state.get().is_closed() {
            return;
        }

        if self.connect_op.borrow().is_some()
            && (ready.is_writable() || ready.is_error() || ready.is_hup())
        {
            self.handle_connect_ready();
        }

        if ready.is_readable() || ready.is_hup() || ready.is_error() {
            if self.state.get() == StreamState::Listening {
                if ready.is_error() || ready.is_hup() {
                    self.handle_listen_error();
                } else {
                    self.publish(&StreamEvent::Listen);
                }
            } else if self.reading.get() && !self.eof_seen.get() {
                self.do_read_cycle();
            }
        }

        if ready.is_writable() && self.state.get() != StreamState::Listening {
            self.drain_writes();
        }

        if !self.state.get().is_closed() {
            self.update_interest();
        }
    }
}

impl Drop for StreamResource {
    fn drop(&mut self) {
        // Last external reference gone; make sure the loop slot is freed.
        let token = self.token.replace(Token::NONE);
        if !token.is_none() {
            let _ = self.eloop.deregister(token);
        }
    }
}

/// Thin raw-syscall layer. `send` is used instead of `write` so EPIPE is
/// reported through the return value rather than SIGPIPE.
mod sys {
    use super::*;

    pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize, i32> {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(Errno::last_raw())
        } else {
            Ok(n as usize)
        }
    }

    pub fn send(fd: RawFd, bytes: &[u8]) -> Result<usize, i32> {
        let n = unsafe {
            libc::send(
                fd,
                bytes.as_ptr().cast(),
                bytes.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n < 0 {
            Err(Errno::last_raw())
        } else {
            Ok(n as usize)
        }
    }

    pub fn send_with_fd(fd: RawFd, bytes: &[u8], send_fd: RawFd) -> Result<usize, i32> {
        let iov = [IoSlice::new(bytes)];
        let fds = [send_fd];
        let cmsgs = [socket::ControlMessage::ScmRights(&fds)];
        socket::sendmsg::<socket::UnixAddr>(
            fd,
            &iov,
            &cmsgs,
            socket::MsgFlags::MSG_NOSIGNAL,
            None,
        )
        .map_err(|e| e as i32)
    }

    pub fn recv_with_fd(fd: RawFd, buf: &mut [u8]) -> Result<(usize, Option<OwnedFd>), i32> {
        let mut iov = [IoSliceMut::new(buf)];
        let mut space = nix::cmsg_space!([RawFd; 1]);
        let msg = socket::recvmsg::<socket::UnixAddr>(
            fd,
            &mut iov,
            Some(&mut space),
            socket::MsgFlags::empty(),
        )
        .map_err(|e| e as i32)?;

        let bytes = msg.bytes;
        let mut received = None;
        if let Ok(cmsgs) = msg.cmsgs() {
            for cmsg in cmsgs {
                if let socket::ControlMessageOwned::ScmRights(fds) = cmsg {
                    for raw in fds {
                        // Safety: the kernel just installed this fd for us.
                        received = Some(unsafe { OwnedFd::from_raw_fd(raw) });
                    }
                }
            }
        }
        Ok((bytes, received))
    }

    pub fn set_nonblocking(fd: RawFd, nonblocking: bool) -> bool {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return false;
        }
        let new_flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        unsafe { libc::fcntl(fd, libc::F_SETFL, new_flags) >= 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(kind: StreamKind) -> (Rc<EventLoop>, Rc<StreamResource>) {
        let eloop = EventLoop::new();
        let res = StreamResource::new(&eloop, kind);
        (eloop, res)
    }

    #[test]
    fn test_new_resource_uninit() {
        let (_l, res) = fresh(StreamKind::Tcp);
        assert_eq!(res.state(), StreamState::Uninit);
        assert!(!res.readable());
        assert!(!res.writable());
        assert!(res.raw_fd().is_none());
    }

    #[test]
    fn test_write_requires_connection() {
        let (_l, res) = fresh(StreamKind::Tcp);
        assert_eq!(
            res.write_owned(b"hi".to_vec()),
            Err(EvioError::InvalidState)
        );
    }

    #[test]
    fn test_read_requires_capability() {
        let (_l, res) = fresh(StreamKind::Tcp);
        assert_eq!(res.read(), Err(EvioError::InvalidState));
    }

    #[test]
    fn test_stop_is_noop_when_not_reading() {
        let (_l, res) = fresh(StreamKind::Tcp);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        res.on(move |_| h.set(h.get() + 1));

        res.stop();
        res.stop();
        assert_eq!(hits.get(), 0, "stop() must not emit events");
        assert!(!res.is_reading());
    }

    #[test]
    fn test_close_is_idempotent_and_terminal() {
        let (_l, res) = fresh(StreamKind::Tcp);
        res.close();
        res.close();
        assert_eq!(res.state(), StreamState::Closed);
        assert_eq!(res.write_owned(vec![1]), Err(EvioError::Closed));
        assert_eq!(res.read(), Err(EvioError::Closed));
        assert_eq!(res.shutdown(), Err(EvioError::Closed));
        assert_eq!(res.listen(128), Err(EvioError::Closed));
    }

    #[test]
    fn test_write_to_rejects_non_ipc() {
        let (eloop, res) = fresh(StreamKind::Pipe { ipc: false });
        let other = StreamResource::new(&eloop, StreamKind::Tcp);
        assert!(matches!(
            res.write_to(&other, WriteBuf::owned(vec![1u8])),
            Err(EvioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_accept_validations() {
        let (eloop, res) = fresh(StreamKind::Tcp);
        let target = StreamResource::new(&eloop, StreamKind::Tcp);
        // Not listening yet.
        assert_eq!(res.accept(&target), Err(EvioError::InvalidState));

        let other_loop = EventLoop::new();
        let far = StreamResource::new(&other_loop, StreamKind::Tcp);
        // Cross-loop targets rejected even before the listening check.
        assert!(res.accept(&far).is_err());
    }

    #[test]
    fn test_kind_compatibility() {
        assert!(StreamKind::Tcp.compatible(StreamKind::Tcp));
        assert!(StreamKind::Pipe { ipc: true }.compatible(StreamKind::Pipe { ipc: false }));
        assert!(!StreamKind::Tcp.compatible(StreamKind::Pipe { ipc: false }));
        assert!(StreamKind::Pipe { ipc: true }.is_ipc());
        assert!(!StreamKind::Pipe { ipc: false }.is_ipc());
    }

    #[test]
    fn test_try_write_unconnected_reports_error() {
        let (_l, res) = fresh(StreamKind::Tcp);
        let errors = Rc::new(Cell::new(0));
        let e = Rc::clone(&errors);
        res.on(move |ev| {
            if ev.is_error() {
                e.set(e.get() + 1);
            }
        });

        let n = res.try_write(b"data");
        assert_eq!(n, 0);
        assert_eq!(errors.get(), 1);
    }

    #[test]
    fn test_listener_error_readiness_reports_once() {
        let (_l, res) = fresh(StreamKind::Pipe { ipc: false });
        let fd = socket::socket(
            socket::AddressFamily::Unix,
            socket::SockType::Stream,
            socket::SockFlag::SOCK_NONBLOCK | socket::SockFlag::SOCK_CLOEXEC,
            None,
        )
        .unwrap();
        res.install_fd(fd, StreamState::Open).unwrap();

        let path = std::env::temp_dir().join(format!("evio-res-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let addr = socket::UnixAddr::new(&path).unwrap();
        socket::bind(res.raw_fd().unwrap(), &addr).unwrap();
        res.listen(4).unwrap();

        let errors = Rc::new(Cell::new(0));
        let listens = Rc::new(Cell::new(0));
        let e = Rc::clone(&errors);
        let l = Rc::clone(&listens);
        res.on(move |ev| match ev {
            StreamEvent::Error(_) => e.set(e.get() + 1),
            StreamEvent::Listen => l.set(l.get() + 1),
            _ => {}
        });

        // Level-triggered error readiness may storm; exactly one report.
        Rc::clone(&res).on_ready(Ready::ERROR);
        Rc::clone(&res).on_ready(Ready::ERROR);
        assert_eq!(errors.get(), 1);
        assert_eq!(listens.get(), 0, "no Listen event for error readiness");
        assert_eq!(res.state(), StreamState::Listening);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_op_ids_monotonic() {
        let (_l, res) = fresh(StreamKind::Tcp);
        assert_eq!(res.next_op_id(), OpId::new(0));
        assert_eq!(res.next_op_id(), OpId::new(1));
    }
}
