//! Unix-domain pipe specialization.
//!
//! A `PipeSocket` wraps a Unix stream socket. With `ipc` enabled it can
//! transfer stream handles alongside payload bytes (`write_to`) and picks
//! up handles received during read cycles (`pending_fd`).

use std::ops::Deref;
use std::path::Path;
use std::rc::Rc;

use nix::sys::socket::{self, AddressFamily, SockFlag, SockType, UnixAddr};

use evio_core::state::StreamState;
use evio_core::{EvioError, EvioResult};
use evio_reactor::EventLoop;

use crate::resource::{StreamKind, StreamResource};

/// A Unix-domain stream endpoint, optionally IPC-capable.
pub struct PipeSocket {
    res: Rc<StreamResource>,
}

impl PipeSocket {
    /// Factory: an uninitialized pipe resource bound to `eloop`.
    ///
    /// `ipc` enables handle passing; both ends of a channel must agree on
    /// it for received handles to be picked up.
    pub fn new(eloop: &Rc<EventLoop>, ipc: bool) -> Self {
        Self {
            res: StreamResource::new(eloop, StreamKind::Pipe { ipc }),
        }
    }

    /// A connected pair of pipes, both ends on `eloop`.
    pub fn pair(eloop: &Rc<EventLoop>, ipc: bool) -> EvioResult<(Self, Self)> {
        let (a, b) = socket::socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|e| EvioError::Os(e as i32))?;

        let left = Self::new(eloop, ipc);
        let right = Self::new(eloop, ipc);
        left.res.install_fd(a, StreamState::Connected)?;
        right.res.install_fd(b, StreamState::Connected)?;
        Ok((left, right))
    }

    /// The underlying shared resource, e.g. for `accept` targets.
    pub fn resource(&self) -> &Rc<StreamResource> {
        &self.res
    }

    fn ensure_fd(&self) -> EvioResult<()> {
        if self.res.raw_fd().is_some() {
            return Ok(());
        }
        let fd = socket::socket(
            AddressFamily::Unix,
            SockType::Stream,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| EvioError::Os(e as i32))?;
        self.res.install_fd(fd, StreamState::Open)
    }

    /// Bind the pipe to a filesystem path.
    pub fn bind<P: AsRef<Path>>(&self, path: P) -> EvioResult<()> {
        self.ensure_fd()?;
        let raw = self.res.raw_fd().ok_or(EvioError::NotRegistered)?;
        let addr = UnixAddr::new(path.as_ref()).map_err(|e| EvioError::Os(e as i32))?;
        socket::bind(raw, &addr).map_err(|e| EvioError::Os(e as i32))
    }

    /// Issue an asynchronous connect to a bound pipe path.
    pub fn connect<P: AsRef<Path>>(&self, path: P) -> EvioResult<()> {
        self.ensure_fd()?;
        let addr = UnixAddr::new(path.as_ref()).map_err(|e| EvioError::Os(e as i32))?;
        self.res.issue_connect(&addr)
    }
}

impl Deref for PipeSocket {
    type Target = StreamResource;

    fn deref(&self) -> &StreamResource {
        &self.res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{drive, record};
    use evio_core::buffer::WriteBuf;
    use evio_core::event::StreamEvent;
    use std::cell::{Cell, RefCell};
    use std::os::fd::AsRawFd;

    fn count(events: &Rc<RefCell<Vec<StreamEvent>>>, pred: fn(&StreamEvent) -> bool) -> usize {
        events.borrow().iter().filter(|ev| pred(ev)).count()
    }

    #[test]
    fn test_pair_is_connected_both_ways() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        assert_eq!(a.state(), StreamState::Connected);
        assert_eq!(b.state(), StreamState::Connected);
        assert!(a.readable() && a.writable());
        assert!(b.readable() && b.writable());
    }

    #[test]
    fn test_write_data_roundtrip() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        let a_events = record(a.resource());
        let b_events = record(b.resource());

        b.read().unwrap();
        a.write_owned(b"hello".to_vec()).unwrap();

        drive(&eloop, || {
            b_events
                .borrow()
                .iter()
                .any(|ev| matches!(ev, StreamEvent::Data(_)))
        });

        let events = b_events.borrow();
        match &events[0] {
            StreamEvent::Data(d) => {
                assert_eq!(d.bytes(), b"hello");
                assert_eq!(d.len, 5);
            }
            other => panic!("expected Data first, got {:?}", other),
        }
        // No End mixed in while the peer is still open.
        assert_eq!(count(&b_events, |ev| matches!(ev, StreamEvent::End)), 0);
        assert_eq!(count(&a_events, |ev| matches!(ev, StreamEvent::Write)), 1);
    }

    #[test]
    fn test_n_writes_n_events_in_order() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        let a_events = record(a.resource());

        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        b.on(move |ev| {
            if let StreamEvent::Data(d) = ev {
                sink.borrow_mut().extend_from_slice(d.bytes());
            }
        });
        b.read().unwrap();

        const N: usize = 5;
        for i in 0..N {
            a.write_owned(vec![b'0' + i as u8]).unwrap();
        }

        drive(&eloop, || received.borrow().len() >= N);
        // FIFO per-stream: bytes arrive in submission order.
        assert_eq!(&*received.borrow(), b"01234");
        // Exactly N completions, one-to-one.
        assert_eq!(count(&a_events, |ev| matches!(ev, StreamEvent::Write)), N);
        assert_eq!(count(&a_events, StreamEvent::is_error), 0);
    }

    #[test]
    fn test_large_write_partial_progress() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        let a_events = record(a.resource());

        let received = Rc::new(Cell::new(0usize));
        let sink = Rc::clone(&received);
        b.on(move |ev| {
            if let StreamEvent::Data(d) = ev {
                sink.set(sink.get() + d.len);
            }
        });
        b.read().unwrap();

        // Larger than any default socket buffer: forces EAGAIN and multiple
        // drain cycles before the single completion event.
        let big = vec![0xabu8; 1 << 20];
        let total = big.len() + 4;
        a.write_owned(big).unwrap();
        a.write_owned(b"tail".to_vec()).unwrap();

        drive(&eloop, || received.get() >= total);
        assert_eq!(received.get(), total);
        assert_eq!(count(&a_events, |ev| matches!(ev, StreamEvent::Write)), 2);
    }

    #[test]
    fn test_borrowed_write() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        let b_events = record(b.resource());
        b.read().unwrap();

        let backing = b"borrowed-bytes".to_vec();
        unsafe { a.write_borrowed(&backing).unwrap() };

        drive(&eloop, || {
            b_events
                .borrow()
                .iter()
                .any(|ev| matches!(ev, StreamEvent::Data(_)))
        });
        // Backing is still ours after completion.
        assert_eq!(&backing[..8], b"borrowed");
    }

    #[test]
    fn test_stop_then_restart_read() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        let b_events = record(b.resource());

        b.read().unwrap();
        a.write_owned(b"one".to_vec()).unwrap();
        drive(&eloop, || {
            count(&b_events, |ev| matches!(ev, StreamEvent::Data(_))) >= 1
        });

        b.stop();
        let quiet = count(&b_events, |ev| matches!(ev, StreamEvent::Data(_)));
        a.write_owned(b"two".to_vec()).unwrap();
        // A few turns with reads stopped: no new Data events.
        for _ in 0..5 {
            eloop.run_once(Some(10)).unwrap();
        }
        assert_eq!(
            count(&b_events, |ev| matches!(ev, StreamEvent::Data(_))),
            quiet
        );

        // Restart: delivery resumes with the bytes written meanwhile.
        b.read().unwrap();
        drive(&eloop, || {
            count(&b_events, |ev| matches!(ev, StreamEvent::Data(_))) > quiet
        });
    }

    #[test]
    fn test_peer_close_emits_end_exactly_once() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        let b_events = record(b.resource());

        b.read().unwrap();
        a.write_owned(b"bye".to_vec()).unwrap();
        drive(&eloop, || {
            count(&b_events, |ev| matches!(ev, StreamEvent::Data(_))) >= 1
        });

        a.close();
        drive(&eloop, || {
            count(&b_events, |ev| matches!(ev, StreamEvent::End)) >= 1
        });
        // Extra turns must not re-deliver End or produce trailing Data.
        for _ in 0..5 {
            eloop.run_once(Some(10)).unwrap();
        }
        let events = b_events.borrow();
        assert_eq!(
            events
                .iter()
                .filter(|ev| matches!(ev, StreamEvent::End))
                .count(),
            1
        );
        let end_pos = events
            .iter()
            .position(|ev| matches!(ev, StreamEvent::End))
            .unwrap();
        assert!(
            events[end_pos..]
                .iter()
                .all(|ev| !matches!(ev, StreamEvent::Data(_))),
            "no Data after End"
        );
    }

    #[test]
    fn test_shutdown_flushes_then_completes() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        let a_events = record(a.resource());
        let b_events = record(b.resource());
        b.read().unwrap();

        a.write_owned(b"last words".to_vec()).unwrap();
        a.shutdown().unwrap();
        assert!(!a.writable());
        assert_eq!(a.write_owned(vec![1]), Err(EvioError::InvalidState));

        drive(&eloop, || {
            count(&a_events, |ev| matches!(ev, StreamEvent::Shutdown)) >= 1
        });
        // The queued write completed before the shutdown.
        let events = a_events.borrow();
        let write_pos = events
            .iter()
            .position(|ev| matches!(ev, StreamEvent::Write))
            .expect("write completed");
        let shutdown_pos = events
            .iter()
            .position(|ev| matches!(ev, StreamEvent::Shutdown))
            .unwrap();
        assert!(write_pos < shutdown_pos);
        drop(events);

        // Peer sees the data, then end-of-stream; its read side of the
        // local end stays open.
        drive(&eloop, || {
            count(&b_events, |ev| matches!(ev, StreamEvent::End)) >= 1
        });
        assert!(a.readable());
    }

    #[test]
    fn test_try_write_failure_returns_zero_with_one_error() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        let a_events = record(a.resource());

        b.close();
        // Give the kernel the close; then sends fail with EPIPE.
        eloop.run_once(Some(10)).unwrap();

        let n = a.try_write(b"doomed");
        assert_eq!(n, 0);
        assert_eq!(count(&a_events, StreamEvent::is_error), 1);
    }

    #[test]
    fn test_try_write_full_buffer_reports_eagain() {
        let eloop = EventLoop::new();
        let (a, _b) = PipeSocket::pair(&eloop, false).unwrap();
        let a_events = record(a.resource());

        // Fill the kernel buffer; the first call that cannot make progress
        // returns 0 and reports through one Error event.
        let chunk = vec![0u8; 64 * 1024];
        let mut calls = 0;
        while a.try_write(&chunk) > 0 {
            calls += 1;
            assert!(calls < 10_000, "socket buffer never filled");
        }

        let events = a_events.borrow();
        let errors: Vec<_> = events.iter().filter(|ev| ev.is_error()).collect();
        assert_eq!(errors.len(), 1);
        if let StreamEvent::Error(e) = errors[0] {
            assert_eq!(e.errno(), libc::EAGAIN);
        }
    }

    #[test]
    fn test_try_write_success_is_synchronous() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        let n = a.try_write(b"now");
        assert_eq!(n, 3);

        let b_events = record(b.resource());
        b.read().unwrap();
        drive(&eloop, || {
            b_events
                .borrow()
                .iter()
                .any(|ev| matches!(ev, StreamEvent::Data(_)))
        });
    }

    #[test]
    fn test_close_cancels_pending_writes_exactly_once() {
        let eloop = EventLoop::new();
        let (a, _b) = PipeSocket::pair(&eloop, false).unwrap();
        let a_events = record(a.resource());

        // Saturate the socket buffer so the queue cannot drain.
        let big = vec![0u8; 1 << 20];
        a.write_owned(big).unwrap();
        a.write_owned(b"queued".to_vec()).unwrap();
        a.close();

        drive(&eloop, || count(&a_events, StreamEvent::is_error) >= 2);
        for _ in 0..3 {
            eloop.run_once(Some(10)).unwrap();
        }
        // One completion per cancelled write, all ECANCELED, no Write events.
        let events = a_events.borrow();
        let errors: Vec<_> = events.iter().filter(|ev| ev.is_error()).collect();
        assert_eq!(errors.len(), 2);
        for ev in &errors {
            if let StreamEvent::Error(e) = ev {
                assert_eq!(e.errno(), libc::ECANCELED);
            }
        }
        assert_eq!(
            events
                .iter()
                .filter(|ev| matches!(ev, StreamEvent::Write))
                .count(),
            0
        );
    }

    #[test]
    fn test_blocking_mode_write_still_reports_via_event() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        let a_events = record(a.resource());
        let b_events = record(b.resource());
        b.read().unwrap();

        assert!(a.blocking(true));
        a.write_owned(b"sync".to_vec()).unwrap();
        // Completed synchronously, but the event arrives via the loop.
        assert_eq!(count(&a_events, |ev| matches!(ev, StreamEvent::Write)), 0);
        eloop.run_once(Some(10)).unwrap();
        assert_eq!(count(&a_events, |ev| matches!(ev, StreamEvent::Write)), 1);

        drive(&eloop, || {
            b_events
                .borrow()
                .iter()
                .any(|ev| matches!(ev, StreamEvent::Data(_)))
        });
        assert!(a.blocking(false));
    }

    #[test]
    fn test_ipc_fd_passing() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, true).unwrap();
        let (payload_src, payload_sink) = PipeSocket::pair(&eloop, false).unwrap();

        let b_events = record(b.resource());
        b.read().unwrap();

        // Send the source end of the second pair over the first.
        a.write_to(payload_src.resource(), WriteBuf::owned(b"fd".to_vec()))
            .unwrap();

        drive(&eloop, || {
            b_events
                .borrow()
                .iter()
                .any(|ev| matches!(ev, StreamEvent::Data(_)))
        });
        let received = b.pending_fd().expect("handle arrived with the payload");
        assert!(received.as_raw_fd() >= 0);

        // The received handle is usable: bytes sent through it surface on
        // the second pair's other end.
        let n = unsafe {
            libc::send(
                received.as_raw_fd(),
                b"ping".as_ptr().cast(),
                4,
                libc::MSG_NOSIGNAL,
            )
        };
        assert_eq!(n, 4);

        let sink_events = record(payload_sink.resource());
        payload_sink.read().unwrap();
        drive(&eloop, || {
            sink_events
                .borrow()
                .iter()
                .any(|ev| matches!(ev, StreamEvent::Data(_)))
        });
    }

    #[test]
    fn test_pending_fd_queue_keeps_every_handle() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, true).unwrap();
        let (x, _xs) = PipeSocket::pair(&eloop, false).unwrap();
        let (y, _ys) = PipeSocket::pair(&eloop, false).unwrap();

        let b_events = record(b.resource());
        b.read().unwrap();

        // Two handle-passing writes back to back. Ancillary data makes a
        // read boundary, so each handle arrives with its own cycle.
        a.write_to(x.resource(), WriteBuf::owned(b"1".to_vec())).unwrap();
        a.write_to(y.resource(), WriteBuf::owned(b"2".to_vec())).unwrap();

        drive(&eloop, || {
            count(&b_events, |ev| matches!(ev, StreamEvent::Data(_))) >= 2
        });

        // Both handles retrievable, arrival order, none overwritten.
        let first = b.pending_fd().expect("first handle kept");
        let second = b.pending_fd().expect("second handle kept");
        assert!(first.as_raw_fd() >= 0 && second.as_raw_fd() >= 0);
        assert!(b.pending_fd().is_none());
    }

    #[test]
    fn test_write_to_rejects_empty_payload() {
        let eloop = EventLoop::new();
        let (a, _b) = PipeSocket::pair(&eloop, true).unwrap();
        let (src, _sink) = PipeSocket::pair(&eloop, false).unwrap();
        assert!(matches!(
            a.write_to(src.resource(), WriteBuf::owned(Vec::new())),
            Err(EvioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_listen_accept_over_path() {
        let dir = std::env::temp_dir().join(format!("evio-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("listen.sock");
        let _ = std::fs::remove_file(&path);

        let eloop = EventLoop::new();
        let server = PipeSocket::new(&eloop, false);
        server.bind(&path).unwrap();
        server.listen(16).unwrap();

        let client = PipeSocket::new(&eloop, false);
        let client_events = record(client.resource());
        client.connect(&path).unwrap();

        let conn = PipeSocket::new(&eloop, false);
        let conn_res = Rc::clone(conn.resource());
        let server_res = Rc::clone(server.resource());
        let accepted = Rc::new(Cell::new(false));
        let acc = Rc::clone(&accepted);
        server.on(move |ev| {
            if matches!(ev, StreamEvent::Listen) && !acc.get() {
                server_res.accept(&conn_res).unwrap();
                acc.set(true);
            }
        });

        drive(&eloop, || accepted.get());
        assert!(conn.readable());
        drive(&eloop, || {
            client_events
                .borrow()
                .iter()
                .any(|ev| matches!(ev, StreamEvent::Connect))
        });

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn test_alloc_callback_supplies_buffers() {
        let eloop = EventLoop::new();
        let (a, b) = PipeSocket::pair(&eloop, false).unwrap();
        let b_events = record(b.resource());

        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        b.alloc(move |suggested| {
            c.set(c.get() + 1);
            vec![0u8; suggested.min(8)]
        });
        b.read().unwrap();

        a.write_owned(b"x".to_vec()).unwrap();
        drive(&eloop, || {
            b_events
                .borrow()
                .iter()
                .any(|ev| matches!(ev, StreamEvent::Data(_)))
        });
        assert!(calls.get() >= 1, "allocation callback invoked per cycle");
    }
}
