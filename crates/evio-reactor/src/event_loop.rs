//! Source registry and dispatch loop.
//!
//! The loop owns a slab of sources, each pairing an fd with an interest set
//! and a weakly-held typed driver. `run_once` polls all interested fds and
//! dispatches readiness to the drivers one at a time, then drains the
//! deferred queue. Resolving `Token -> Weak<dyn IoDriver>` at dispatch time
//! is the trampoline: the loop never stores or casts raw pointers to
//! recover an owner.
//!
//! Slots are reused LIFO. The readiness snapshot captures each driver's
//! `Weak` before any callback runs, so a slot recycled by a callback cannot
//! receive a stale wakeup.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::os::fd::{BorrowedFd, RawFd};
use std::rc::{Rc, Weak};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollTimeout};

use evio_core::error::{EvioError, EvioResult};
use evio_core::id::Token;
use evio_core::{edebug, etrace, ewarn};

use crate::config::LoopConfig;
use crate::interest::{Interest, Ready};

/// Target of readiness dispatch.
///
/// Implemented by stream resources; the receiver is `Rc<Self>` so the
/// driver stays alive for the duration of its own callback even if it
/// deregisters itself.
pub trait IoDriver {
    fn on_ready(self: Rc<Self>, ready: Ready);
}

struct Source {
    fd: RawFd,
    interest: Cell<Interest>,
    driver: Weak<dyn IoDriver>,
}

/// The single-threaded event loop.
///
/// Held as `Rc<EventLoop>`; resources keep a clone and register themselves
/// against it. All dispatch happens on the thread calling `run_once`/`run`.
pub struct EventLoop {
    config: LoopConfig,
    sources: RefCell<Vec<Option<Source>>>,
    /// LIFO stack of free slot indices (for reuse)
    free: RefCell<Vec<u32>>,
    deferred: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    dispatching: Cell<bool>,
}

impl EventLoop {
    pub fn new() -> Rc<Self> {
        Self::with_config(LoopConfig::default())
    }

    pub fn with_config(config: LoopConfig) -> Rc<Self> {
        Rc::new(Self {
            config,
            sources: RefCell::new(Vec::new()),
            free: RefCell::new(Vec::new()),
            deferred: RefCell::new(VecDeque::new()),
            dispatching: Cell::new(false),
        })
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Register an fd with its driver. Returns the slot token.
    pub fn register(
        &self,
        fd: RawFd,
        interest: Interest,
        driver: Weak<dyn IoDriver>,
    ) -> EvioResult<Token> {
        let mut sources = self.sources.borrow_mut();
        let source = Source {
            fd,
            interest: Cell::new(interest),
            driver,
        };

        let token = if let Some(idx) = self.free.borrow_mut().pop() {
            sources[idx as usize] = Some(source);
            Token::new(idx)
        } else {
            if sources.len() >= self.config.max_sources {
                return Err(EvioError::RegistryFull);
            }
            sources.push(Some(source));
            Token::new((sources.len() - 1) as u32)
        };

        edebug!("loop: registered fd {} as {}", fd, token);
        Ok(token)
    }

    /// Update the interest set of a registered source.
    pub fn set_interest(&self, token: Token, interest: Interest) -> EvioResult<()> {
        let sources = self.sources.borrow();
        let source = sources
            .get(token.index())
            .and_then(|s| s.as_ref())
            .ok_or(EvioError::NotRegistered)?;
        etrace!("loop: {} interest {}", token, interest);
        source.interest.set(interest);
        Ok(())
    }

    /// Remove a source. The fd itself is closed by its owner, not the loop.
    pub fn deregister(&self, token: Token) -> EvioResult<()> {
        if token.is_none() {
            return Err(EvioError::NotRegistered);
        }
        let mut sources = self.sources.borrow_mut();
        match sources.get_mut(token.index()) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.free.borrow_mut().push(token.0);
                edebug!("loop: deregistered {}", token);
                Ok(())
            }
            _ => Err(EvioError::NotRegistered),
        }
    }

    /// Queue a closure for dispatch at the end of the current (or next)
    /// tick. This is how same-tick completions reach their listeners
    /// without ever running inside the issuing call's frame.
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.deferred.borrow_mut().push_back(Box::new(f));
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.sources.borrow().iter().filter(|s| s.is_some()).count()
    }

    /// Whether another turn of the loop has anything to do.
    pub fn has_work(&self) -> bool {
        if !self.deferred.borrow().is_empty() {
            return true;
        }
        self.sources
            .borrow()
            .iter()
            .flatten()
            .any(|s| !s.interest.get().is_empty())
    }

    /// Run one turn: poll all interested fds, dispatch readiness, then
    /// drain the deferred queue. Returns the number of callbacks dispatched.
    ///
    /// `timeout_ms` overrides the configured poll timeout. A turn with
    /// pending deferred work polls with a zero timeout so completions are
    /// not delayed.
    pub fn run_once(&self, timeout_ms: Option<u16>) -> EvioResult<usize> {
        let mut dispatched = 0;

        // Snapshot (fd, interest, driver) so callbacks may freely mutate
        // the registry while we dispatch.
        let snapshot: Vec<(Token, RawFd, Interest, Weak<dyn IoDriver>)> = {
            let sources = self.sources.borrow();
            sources
                .iter()
                .enumerate()
                .filter_map(|(idx, slot)| slot.as_ref().map(|s| (idx, s)))
                .filter(|(_, s)| !s.interest.get().is_empty())
                .map(|(idx, s)| {
                    (
                        Token::new(idx as u32),
                        s.fd,
                        s.interest.get(),
                        Weak::clone(&s.driver),
                    )
                })
                .collect()
        };

        if !snapshot.is_empty() {
            let mut pollfds: Vec<PollFd> = snapshot
                .iter()
                .map(|(_, fd, interest, _)| {
                    // Safety: the fd is owned by a still-registered resource;
                    // the borrow only lives for this poll call.
                    let borrowed = unsafe { BorrowedFd::borrow_raw(*fd) };
                    PollFd::new(borrowed, interest.to_poll_flags())
                })
                .collect();

            let timeout = if !self.deferred.borrow().is_empty() {
                PollTimeout::from(0u16)
            } else {
                PollTimeout::from(timeout_ms.unwrap_or(self.config.poll_timeout_ms))
            };

            match poll(&mut pollfds, timeout) {
                Ok(_) => {
                    let ready_list: Vec<(Token, Ready, Weak<dyn IoDriver>)> = pollfds
                        .iter()
                        .zip(snapshot.iter())
                        .filter_map(|(pfd, (token, _, _, driver))| {
                            let revents = pfd.revents().unwrap_or_else(nix::poll::PollFlags::empty);
                            let ready = Ready::from_poll_flags(revents);
                            if ready.is_empty() {
                                None
                            } else {
                                Some((*token, ready, Weak::clone(driver)))
                            }
                        })
                        .collect();
                    drop(pollfds);

                    self.dispatching.set(true);
                    for (token, ready, driver) in ready_list {
                        match driver.upgrade() {
                            Some(driver) => {
                                etrace!("loop: dispatch {} ready={:?}", token, ready);
                                driver.on_ready(ready);
                                dispatched += 1;
                            }
                            None => {
                                // Owner dropped without deregistering. Reap
                                // the slot only if it still holds this driver;
                                // an earlier callback this tick may have freed
                                // and recycled it for a live registration.
                                let still_stale = {
                                    let sources = self.sources.borrow();
                                    sources
                                        .get(token.index())
                                        .and_then(|s| s.as_ref())
                                        .is_some_and(|s| Weak::ptr_eq(&s.driver, &driver))
                                };
                                if still_stale {
                                    ewarn!("loop: dropping stale source {}", token);
                                    let _ = self.deregister(token);
                                }
                            }
                        }
                    }
                    self.dispatching.set(false);
                }
                Err(Errno::EINTR) => {}
                Err(e) => return Err(EvioError::Os(e as i32)),
            }
        }

        dispatched += self.drain_deferred();
        Ok(dispatched)
    }

    /// Run until no source has interest and no deferred work remains.
    pub fn run(&self) -> EvioResult<()> {
        while self.has_work() {
            self.run_once(None)?;
        }
        Ok(())
    }

    fn drain_deferred(&self) -> usize {
        let mut count = 0;
        loop {
            // Take one at a time; a deferred closure may defer more work.
            let next = self.deferred.borrow_mut().pop_front();
            match next {
                Some(f) => {
                    f();
                    count += 1;
                }
                None => break,
            }
        }
        count
    }
}
