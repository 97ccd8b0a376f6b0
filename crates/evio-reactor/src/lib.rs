//! # evio-reactor
//!
//! The single-threaded reactor collaborator: a poll(2)-backed source
//! registry plus the dispatch loop that turns OS readiness into typed
//! callbacks on registered drivers.
//!
//! The reactor never blocks inside a caller's frame: completion callbacks
//! run only from `run_once`/`run`, one at a time, on the thread driving the
//! loop. Same-tick completions (blocking-mode writes, immediate failures)
//! go through the deferred queue and are dispatched at the end of the tick.
//!
//! ## Modules
//!
//! - `config` - loop configuration, env-var backed
//! - `interest` - interest and readiness flag types
//! - `event_loop` - source registry and dispatch loop

#![allow(dead_code)]

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub mod config;
        pub mod event_loop;
        pub mod interest;

        pub use config::LoopConfig;
        pub use event_loop::{EventLoop, IoDriver};
        pub use interest::{Interest, Ready};
    } else {
        compile_error!("evio-reactor only supports Unix platforms (poll(2) based)");
    }
}
