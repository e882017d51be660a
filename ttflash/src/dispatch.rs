//! Publish/subscribe delivery of framed lines.
//!
//! The read loop publishes every line with [`LineDispatcher::dispatch`].
//! Callers interested in a response register a predicate first:
//!
//! - [`LineWaiter`]: resolves with the first matching line, then unregisters
//! - [`LineSubscription`]: receives every matching line until dropped
//!
//! Entries are evaluated in registration order and independently of each
//! other; a line may satisfy several of them. Lines published before a
//! registration are never delivered to it. Dropping a handle cancels it.
//!
//! Once the dispatcher is shut down (the read loop ended) every pending and
//! future registration reports [`Error::Closed`].

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::trace;

use crate::error::{Error, Result};
use crate::lock;

type Predicate = Box<dyn Fn(&str) -> bool + Send>;

struct Entry {
    id: u64,
    predicate: Predicate,
    sender: Sender<String>,
    once: bool,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
    shut_down: bool,
}

/// Fan-out of received lines to registered predicates.
#[derive(Clone, Default)]
pub struct LineDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl LineDispatcher {
    /// Create a dispatcher with no registrations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve with the first subsequent line satisfying `predicate`.
    pub fn wait_until<F>(&self, predicate: F) -> LineWaiter
    where
        F: Fn(&str) -> bool + Send + 'static,
    {
        LineWaiter(self.register(Box::new(predicate), true))
    }

    /// Receive every subsequent line satisfying `predicate`.
    pub fn subscribe<F>(&self, predicate: F) -> LineSubscription
    where
        F: Fn(&str) -> bool + Send + 'static,
    {
        LineSubscription(self.register(Box::new(predicate), false))
    }

    fn register(&self, predicate: Predicate, once: bool) -> Registration {
        let (sender, receiver) = mpsc::channel();
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        if registry.shut_down {
            // Dropping the sender makes the receiver report Closed right away
            drop(sender);
        } else {
            registry.entries.push(Entry {
                id,
                predicate,
                sender,
                once,
            });
        }
        Registration {
            id,
            registry: Arc::clone(&self.registry),
            receiver,
        }
    }

    /// Deliver a line (trimmed) to every matching registration.
    ///
    /// Returns the number of registrations that received it.
    pub fn dispatch(&self, line: &str) -> usize {
        let line = line.trim();
        let mut registry = lock(&self.registry);
        let mut delivered = 0;

        registry.entries.retain(|entry| {
            if !(entry.predicate)(line) {
                return true;
            }
            if entry.sender.send(line.to_string()).is_err() {
                // Receiver already gone
                return false;
            }
            delivered += 1;
            !entry.once
        });

        if delivered > 0 {
            trace!("Line {line:?} delivered to {delivered} waiter(s)");
        }
        delivered
    }

    /// Close every registration; later registrations are closed immediately.
    pub fn shutdown(&self) {
        let mut registry = lock(&self.registry);
        registry.shut_down = true;
        registry.entries.clear();
    }

    /// Number of active registrations.
    pub fn registered(&self) -> usize {
        lock(&self.registry).entries.len()
    }
}

struct Registration {
    id: u64,
    registry: Arc<Mutex<Registry>>,
    receiver: Receiver<String>,
}

impl Registration {
    fn recv(&self) -> Result<String> {
        self.receiver.recv().map_err(|_| Error::Closed)
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<String>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(line) => Ok(Some(line)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Closed),
        }
    }

    fn try_recv(&self) -> Result<Option<String>> {
        match self.receiver.try_recv() {
            Ok(line) => Ok(Some(line)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Closed),
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let id = self.id;
        lock(&self.registry)
            .entries
            .retain(|entry| entry.id != id);
    }
}

/// One-shot wait for a matching line.
pub struct LineWaiter(Registration);

impl LineWaiter {
    /// Block until a matching line arrives.
    pub fn wait(self) -> Result<String> {
        self.0.recv()
    }

    /// Block for at most `timeout`; `Ok(None)` if nothing matched in time.
    ///
    /// The waiter stays registered after a timeout and can be polled again.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<String>> {
        self.0.recv_timeout(timeout)
    }

    /// Return the matching line if it has already arrived.
    pub fn try_wait(&self) -> Result<Option<String>> {
        self.0.try_recv()
    }
}

/// Continuing stream of matching lines.
///
/// Lines are queued from the moment of registration, so nothing is lost
/// between two calls to [`LineSubscription::recv`].
pub struct LineSubscription(Registration);

impl LineSubscription {
    /// Block until the next matching line.
    pub fn recv(&self) -> Result<String> {
        self.0.recv()
    }

    /// Block for at most `timeout`; `Ok(None)` if nothing matched in time.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<String>> {
        self.0.recv_timeout(timeout)
    }

    /// Next queued line, without blocking.
    pub fn try_recv(&self) -> Result<Option<String>> {
        self.0.try_recv()
    }
}
