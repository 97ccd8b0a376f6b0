//! Per-object listener registry.
//!
//! Every resource and every one-shot operation owns one `Listeners`. The
//! completion paths publish a `StreamEvent` into it; handlers run in
//! registration order on the loop thread.
//!
//! The registry is single-threaded (`!Send`); interior mutability lets
//! handlers register and remove listeners while a publish is in progress.

use std::cell::RefCell;

use crate::event::StreamEvent;
use crate::id::ListenerId;

type Handler = Box<dyn FnMut(&StreamEvent)>;

struct Entry {
    id: ListenerId,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    tombstones: Vec<ListenerId>,
    next_id: u64,
    publishing: bool,
}

/// Registry of event handlers with `on` (persistent) and `once` (one-shot)
/// registration.
#[derive(Default)]
pub struct Listeners {
    inner: RefCell<Inner>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent listener. Runs on every published event until
    /// removed.
    pub fn on<F>(&self, handler: F) -> ListenerId
    where
        F: FnMut(&StreamEvent) + 'static,
    {
        self.push(Box::new(handler), false)
    }

    /// Register a one-shot listener, removed after its first delivery.
    pub fn once<F>(&self, handler: F) -> ListenerId
    where
        F: FnMut(&StreamEvent) + 'static,
    {
        self.push(Box::new(handler), true)
    }

    fn push(&self, handler: Handler, once: bool) -> ListenerId {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.entries.push(Entry { id, once, handler });
        id
    }

    /// Remove a listener by id. Safe to call from inside a handler; the
    /// removal takes effect for subsequent events.
    pub fn remove(&self, id: ListenerId) {
        let mut inner = self.inner.borrow_mut();
        if inner.publishing {
            inner.tombstones.push(id);
        } else {
            inner.entries.retain(|e| e.id != id);
        }
    }

    /// Drop all listeners.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.publishing {
            let ids: Vec<ListenerId> = inner.entries.iter().map(|e| e.id).collect();
            inner.tombstones.extend(ids);
        } else {
            inner.entries.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    /// Deliver an event to all listeners in registration order.
    ///
    /// `once` listeners are dropped after this call. Listeners registered by
    /// a handler during this publish are not invoked for this event.
    /// A nested publish on the same registry reaches only listeners added
    /// during the outer publish.
    ///
    /// Events with no registered listener are silently dropped.
    pub fn publish(&self, event: &StreamEvent) {
        // Take the entries out so handlers can re-borrow the registry.
        let (mut running, top_level) = {
            let mut inner = self.inner.borrow_mut();
            let top_level = !inner.publishing;
            inner.publishing = true;
            // In a nested publish, `entries` holds only listeners added by
            // the outer publish's handlers.
            (std::mem::take(&mut inner.entries), top_level)
        };

        for entry in &mut running {
            (entry.handler)(event);
        }

        let mut inner = self.inner.borrow_mut();
        if top_level {
            inner.publishing = false;
        }
        // Keep surviving persistent listeners ahead of ones added mid-publish.
        let added = std::mem::take(&mut inner.entries);
        let tombstones = if top_level {
            std::mem::take(&mut inner.tombstones)
        } else {
            inner.tombstones.clone()
        };
        inner.entries = running
            .into_iter()
            .filter(|e| !e.once && !tombstones.contains(&e.id))
            .chain(added.into_iter().filter(|e| !tombstones.contains(&e.id)))
            .collect();
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}
