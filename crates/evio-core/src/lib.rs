//! # evio-core
//!
//! Core types for the evio stream layer.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! The reactor and the concrete stream implementations live in
//! `evio-reactor` and `evio-stream`.
//!
//! ## Modules
//!
//! - `event` - typed stream events and their payloads
//! - `listeners` - per-object publish/subscribe registry
//! - `error` - error types
//! - `id` - token and operation identifier types
//! - `buffer` - write buffer ownership (owned vs. borrowed)
//! - `state` - stream lifecycle state enum
//! - `elog` - kernel-style debug printing macros
//! - `env` - environment variable utilities

#![allow(dead_code)]

pub mod buffer;
pub mod elog;
pub mod env;
pub mod error;
pub mod event;
pub mod id;
pub mod listeners;
pub mod state;

// Re-exports for convenience
pub use buffer::WriteBuf;
pub use error::{EvioError, EvioResult};
pub use event::{DataEvent, ErrorEvent, StreamEvent};
pub use id::{ListenerId, OpId, Token};
pub use listeners::Listeners;
pub use state::StreamState;

/// Shared constants
pub mod constants {
    /// Default read buffer capacity handed to the allocation callback,
    /// matching the usual 64 KiB reactor read chunk.
    pub const DEFAULT_READ_BUF_SIZE: usize = 64 * 1024;

    /// Default listen backlog, same as listen(2) conventions.
    pub const DEFAULT_BACKLOG: i32 = 128;

    /// Default maximum number of registered sources per loop.
    pub const DEFAULT_MAX_SOURCES: usize = 1024;
}
