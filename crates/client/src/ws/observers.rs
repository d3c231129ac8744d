//! State and error observers.
//!
//! Notices are queued while the manager's state lock is held and delivered
//! after it is released, by whichever caller finds the queue idle. Every
//! observer therefore sees transitions in the order they happened, and an
//! observer may call back into the manager without deadlocking.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use super::connection::ConnectionState;
use super::lock;
use super::router::panic_message;
use crate::error::ClientError;

pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&ClientError) + Send + Sync>;

struct Registered<H> {
    id: u64,
    handler: H,
}

#[derive(Default)]
struct ObserverSet {
    next_id: u64,
    state: Vec<Registered<StateHandler>>,
    error: Vec<Registered<ErrorHandler>>,
}

impl ObserverSet {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A queued notification with the observers registered when it was raised.
enum Notice {
    State(ConnectionState, Vec<StateHandler>),
    Error(ClientError, Vec<ErrorHandler>),
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<Notice>,
    draining: bool,
}

#[derive(Default)]
pub(crate) struct Notifier {
    observers: Mutex<ObserverSet>,
    outbox: Mutex<Outbox>,
}

impl Notifier {
    pub(crate) fn add_state(&self, handler: StateHandler) -> u64 {
        let mut observers = lock(&self.observers);
        let id = observers.allocate_id();
        observers.state.push(Registered { id, handler });
        id
    }

    pub(crate) fn add_error(&self, handler: ErrorHandler) -> u64 {
        let mut observers = lock(&self.observers);
        let id = observers.allocate_id();
        observers.error.push(Registered { id, handler });
        id
    }

    /// Queue a state notice. Safe to call with the manager lock held.
    pub(crate) fn enqueue_state(&self, state: ConnectionState) {
        let handlers = lock(&self.observers)
            .state
            .iter()
            .map(|r| r.handler.clone())
            .collect();
        lock(&self.outbox)
            .queue
            .push_back(Notice::State(state, handlers));
    }

    /// Queue a notice for `handler` alone, ordered with every other notice.
    pub(crate) fn enqueue_state_to(&self, state: ConnectionState, handler: StateHandler) {
        lock(&self.outbox)
            .queue
            .push_back(Notice::State(state, vec![handler]));
    }

    /// Queue an error notice. Safe to call with the manager lock held.
    pub(crate) fn enqueue_error(&self, error: ClientError) {
        let handlers = lock(&self.observers)
            .error
            .iter()
            .map(|r| r.handler.clone())
            .collect();
        lock(&self.outbox)
            .queue
            .push_back(Notice::Error(error, handlers));
    }

    /// Deliver queued notices unless another caller is already doing so.
    ///
    /// Must not be called with the manager lock held.
    pub(crate) fn flush(&self) {
        {
            let mut outbox = lock(&self.outbox);
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }

        loop {
            let notice = {
                let mut outbox = lock(&self.outbox);
                match outbox.queue.pop_front() {
                    Some(notice) => notice,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };

            match notice {
                Notice::State(state, handlers) => {
                    for handler in handlers {
                        notify_state(&handler, state);
                    }
                }
                Notice::Error(error, handlers) => {
                    for handler in handlers {
                        contain("error", || handler(&error));
                    }
                }
            }
        }
    }

    fn remove(&self, slot: Slot) -> bool {
        let mut observers = lock(&self.observers);
        match slot {
            Slot::State(id) => remove_by_id(&mut observers.state, id),
            Slot::Error(id) => remove_by_id(&mut observers.error, id),
        }
    }
}

fn notify_state(handler: &StateHandler, state: ConnectionState) {
    contain("state", || handler(state));
}

fn contain(what: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        crate::log_error!(
            "{} observer panicked: {}",
            what,
            panic_message(panic.as_ref())
        );
    }
}

fn remove_by_id<H>(entries: &mut Vec<Registered<H>>, id: u64) -> bool {
    match entries.iter().position(|r| r.id == id) {
        Some(index) => {
            entries.remove(index);
            true
        }
        None => false,
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    State(u64),
    Error(u64),
}

/// Returned by `on_state_change` and `on_error`.
///
/// Dropping it leaves the observer registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Unsubscribe {
    notifier: Weak<Notifier>,
    slot: Slot,
}

impl Unsubscribe {
    pub(crate) fn state(notifier: &Arc<Notifier>, id: u64) -> Self {
        Self {
            notifier: Arc::downgrade(notifier),
            slot: Slot::State(id),
        }
    }

    pub(crate) fn error(notifier: &Arc<Notifier>, id: u64) -> Self {
        Self {
            notifier: Arc::downgrade(notifier),
            slot: Slot::Error(id),
        }
    }

    /// Remove the observer. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.notifier.upgrade() {
            Some(notifier) => notifier.remove(self.slot),
            None => false,
        }
    }
}
