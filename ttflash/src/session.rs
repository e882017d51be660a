//! Session state observed while talking to a board.
//!
//! The protocol engine is the only writer. Everyone else reads snapshots or
//! registers an observer that is told about each change.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::lock;

/// Maximum number of entries kept in the session log.
pub const MAX_LOG_ENTRIES: usize = 1000;

/// One transmitted command or one received line.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogEntry {
    /// Line text, without terminator.
    pub text: String,
    /// `true` for host-to-board commands.
    pub sent: bool,
}

impl LogEntry {
    /// Entry for a command sent to the board.
    pub fn sent(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sent: true,
        }
    }

    /// Entry for a line received from the board.
    pub fn received(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sent: false,
        }
    }
}

/// What is known about the board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SessionState {
    /// A boot banner was seen.
    pub booted: bool,
    /// Reported SDK version.
    pub shell_version: Option<String>,
    /// Reported SPI flash JEDEC id.
    pub flash_id: Option<String>,
    /// Most recent exchanged lines, oldest first.
    pub log: VecDeque<LogEntry>,
}

impl SessionState {
    /// Append to the log, evicting the oldest entry once full.
    pub fn push_log(&mut self, entry: LogEntry) {
        if self.log.len() >= MAX_LOG_ENTRIES {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }
}

/// A single change applied to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// The boot banner was seen.
    Booted,
    /// The SDK version was reported.
    Version(String),
    /// The flash id was reported.
    FlashId(String),
    /// A line was logged.
    Log(LogEntry),
}

type Observer = Arc<dyn Fn(&SessionChange) + Send + Sync>;

/// Handle returned by [`SessionStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

#[derive(Default)]
struct Observers {
    next_id: u64,
    list: Vec<(u64, Observer)>,
}

/// Shared, observable [`SessionState`].
#[derive(Default)]
pub struct SessionStore {
    state: Mutex<SessionState>,
    observers: Mutex<Observers>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        lock(&self.state).clone()
    }

    /// Whether the boot banner was seen.
    pub fn booted(&self) -> bool {
        lock(&self.state).booted
    }

    /// Reported SDK version, if any.
    pub fn shell_version(&self) -> Option<String> {
        lock(&self.state).shell_version.clone()
    }

    /// Reported flash id, if any.
    pub fn flash_id(&self) -> Option<String> {
        lock(&self.state).flash_id.clone()
    }

    /// Register an observer called after every change.
    ///
    /// Observers run on the thread that made the change (usually the read
    /// loop) and must not block.
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&SessionChange) + Send + Sync + 'static,
    {
        let mut observers = lock(&self.observers);
        let id = observers.next_id;
        observers.next_id += 1;
        observers.list.push((id, Arc::new(observer)));
        ObserverId(id)
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ObserverId) {
        lock(&self.observers)
            .list
            .retain(|(existing, _)| *existing != id.0);
    }

    pub(crate) fn push_log(&self, entry: LogEntry) {
        lock(&self.state).push_log(entry.clone());
        self.notify(&SessionChange::Log(entry));
    }

    pub(crate) fn set_booted(&self) {
        lock(&self.state).booted = true;
        self.notify(&SessionChange::Booted);
    }

    pub(crate) fn set_shell_version(&self, version: String) {
        lock(&self.state).shell_version = Some(version.clone());
        self.notify(&SessionChange::Version(version));
    }

    pub(crate) fn set_flash_id(&self, flash_id: String) {
        lock(&self.state).flash_id = Some(flash_id.clone());
        self.notify(&SessionChange::FlashId(flash_id));
    }

    /// Observers are called without the registry locked, so they may
    /// subscribe or unsubscribe. One removed during a change still hears it.
    fn notify(&self, change: &SessionChange) {
        let observers: Vec<Observer> = lock(&self.observers)
            .list
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(change);
        }
    }
}
