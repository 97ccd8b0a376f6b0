//! Typed stream resources over the evio reactor.
//!
//! This crate turns raw readiness notifications from [`evio_reactor`] into
//! the subscribable event model of [`evio_core`]: a [`StreamResource`] owns
//! a duplex file descriptor, tracks its lifecycle state, and publishes
//! `StreamEvent`s to registered listeners. [`TcpSocket`] and [`PipeSocket`]
//! are thin specializations that add address handling on top.
//!
//! # Implementors
//! - `resource`: the shared duplex stream state machine and operation set
//! - `ops`: one-shot connect/shutdown/write operation objects
//! - `tcp`: TCP endpoints (bind/connect/local_addr)
//! - `pipe`: Unix-domain endpoints, including socketpair and fd passing

mod ops;
pub mod pipe;
pub mod resource;
pub mod tcp;

pub use pipe::PipeSocket;
pub use resource::{StreamKind, StreamResource};
pub use tcp::TcpSocket;
