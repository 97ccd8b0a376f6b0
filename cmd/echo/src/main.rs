//! evio echo server
//!
//! Single-threaded TCP echo server driven by the evio event loop.
//! Every connection is a `StreamResource`; all I/O happens through the
//! subscribable event model, no callbacks into raw readiness handling.
//!
//! Usage:
//!     cargo build --release -p evio-echo
//!     ./target/release/evio-echo [port]
//!
//! Test with:
//!     echo "hello" | nc localhost 9999

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use evio_core::constants::DEFAULT_BACKLOG;
use evio_core::event::StreamEvent;
use evio_core::{einfo, ewarn};
use evio_reactor::EventLoop;
use evio_stream::{StreamKind, StreamResource, TcpSocket};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(9999);

    let eloop = EventLoop::new();

    let server = TcpSocket::new(&eloop);
    let addr = format!("0.0.0.0:{port}").parse().expect("listen address");
    server.bind(addr).expect("bind failed");
    server.listen(DEFAULT_BACKLOG).expect("listen failed");
    einfo!("evio-echo: listening on {}", server.local_addr().expect("local_addr"));

    // Accepted connections stay alive through this list; handlers hold
    // only weak references so a closed connection is actually released.
    let conns: Rc<RefCell<Vec<Rc<StreamResource>>>> = Rc::new(RefCell::new(Vec::new()));

    let server_res = Rc::clone(server.resource());
    let accept_loop = Rc::clone(&eloop);
    let accept_conns = Rc::clone(&conns);
    server.on(move |ev| {
        if !matches!(ev, StreamEvent::Listen) {
            return;
        }
        let conn = StreamResource::new(&accept_loop, StreamKind::Tcp);
        if let Err(e) = server_res.accept(&conn) {
            ewarn!("evio-echo: accept failed: {}", e);
            return;
        }
        attach_echo(&conn, &accept_conns);
        accept_conns.borrow_mut().push(Rc::clone(&conn));
        if let Err(e) = conn.read() {
            ewarn!("evio-echo: read start failed: {}", e);
        }
    });

    if let Err(e) = eloop.run() {
        ewarn!("evio-echo: loop error: {}", e);
    }
}

/// Wire a connection to echo its input and drop itself on end or error.
fn attach_echo(conn: &Rc<StreamResource>, conns: &Rc<RefCell<Vec<Rc<StreamResource>>>>) {
    let weak: Weak<StreamResource> = Rc::downgrade(conn);
    let list = Rc::clone(conns);
    conn.on(move |ev| {
        let Some(conn) = weak.upgrade() else { return };
        match ev {
            StreamEvent::Data(data) => {
                if let Err(e) = conn.write_owned(data.bytes().to_vec()) {
                    ewarn!("evio-echo: echo write failed: {}", e);
                    conn.close();
                    list.borrow_mut().retain(|c| !Rc::ptr_eq(c, &conn));
                }
            }
            StreamEvent::End => {
                conn.close();
                list.borrow_mut().retain(|c| !Rc::ptr_eq(c, &conn));
            }
            StreamEvent::Error(err) => {
                ewarn!("evio-echo: connection error: {}", err.name());
                conn.close();
                list.borrow_mut().retain(|c| !Rc::ptr_eq(c, &conn));
            }
            _ => {}
        }
    });
}
