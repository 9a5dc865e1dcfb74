//! Connectivity state tracking with watcher broadcast.
//!
//! A [`ConnectivityTracker`] is the authoritative state machine for one
//! producing stream. All mutation happens on the owner's serialized
//! context (expressed here as `&mut self`); [`ConnectivityTracker::state`]
//! is loadable from any thread. Watchers attached to the tracker observe
//! every subsequent transition in insertion order; wrapping a watcher in
//! [`AsyncWatcher`] moves delivery onto a work serializer so slow
//! observers never stall the owner.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::exec::{Executor, WorkSerializer};

/// Connectivity of a producing stream. `Shutdown` is terminal: no
/// transition ever leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl ConnectivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectivityState::Idle => "IDLE",
            ConnectivityState::Connecting => "CONNECTING",
            ConnectivityState::Ready => "READY",
            ConnectivityState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectivityState::Shutdown => "SHUTDOWN",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectivityState::Idle,
            1 => ConnectivityState::Connecting,
            2 => ConnectivityState::Ready,
            3 => ConnectivityState::TransientFailure,
            _ => ConnectivityState::Shutdown,
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome carried alongside a state transition: OK, or the error that
/// drove the stream into its current state. Cheap to clone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status(Option<Arc<str>>);

impl Status {
    pub fn ok() -> Self {
        Self(None)
    }

    pub fn error(message: impl Into<Arc<str>>) -> Self {
        Self(Some(message.into()))
    }

    pub fn is_ok(&self) -> bool {
        self.0.is_none()
    }

    pub fn message(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("OK"),
            Some(message) => f.write_str(message),
        }
    }
}

/// Observer of connectivity transitions.
pub trait StateWatcher: Send + Sync + 'static {
    fn on_state_change(&self, state: ConnectivityState, status: Status);
}

/// Removal handle returned by [`ConnectivityTracker::add_watcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

/// Wraps a watcher so notifications are reposted through a work
/// serializer instead of running inline in `set_state`. The serializer
/// preserves issue order per watcher and never overlaps deliveries.
pub struct AsyncWatcher<W: StateWatcher> {
    inner: Arc<W>,
    serializer: Arc<WorkSerializer>,
}

impl<W: StateWatcher> AsyncWatcher<W> {
    /// Delivers through `serializer`, shared with whatever else the host
    /// runs on it.
    pub fn new(inner: Arc<W>, serializer: Arc<WorkSerializer>) -> Self {
        Self { inner, serializer }
    }

    /// Delivers through a private serializer over `executor`.
    pub fn with_executor(inner: Arc<W>, executor: Arc<dyn Executor>) -> Self {
        Self::new(inner, Arc::new(WorkSerializer::new(executor)))
    }
}

impl<W: StateWatcher> StateWatcher for AsyncWatcher<W> {
    fn on_state_change(&self, state: ConnectivityState, status: Status) {
        // The task owns a clone of the watcher, so a pending delivery
        // outlives removal from the tracker and then stops naturally.
        let watcher = Arc::clone(&self.inner);
        self.serializer.run(move || {
            watcher.on_state_change(state, status);
        });
    }
}

/// Authoritative connectivity state for one named stream, with attached
/// watchers notified on every transition.
pub struct ConnectivityTracker {
    name: Arc<str>,
    state: AtomicU8,
    status: Status,
    watchers: Vec<(WatcherId, Arc<dyn StateWatcher>)>,
    next_watcher_id: u64,
}

impl ConnectivityTracker {
    pub fn new(name: impl Into<Arc<str>>, initial: ConnectivityState) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(initial as u8),
            status: Status::ok(),
            watchers: Vec::new(),
            next_watcher_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. Safe from any thread.
    pub fn state(&self) -> ConnectivityState {
        ConnectivityState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Moves the tracker to `state` and broadcasts to watchers in
    /// insertion order. No-op when the state is unchanged. Entering
    /// `Shutdown` orphans every watcher after the broadcast.
    pub fn set_state(&mut self, state: ConnectivityState, status: Status, reason: &str) {
        let current = self.state();
        if state == current {
            return;
        }
        // Shutdown is terminal.
        if current == ConnectivityState::Shutdown {
            return;
        }
        debug!(
            tracker = %self.name,
            from = %current,
            to = %state,
            status = %status,
            reason,
            "connectivity state change"
        );
        self.state.store(state as u8, Ordering::Relaxed);
        self.status = status.clone();
        for (_, watcher) in &self.watchers {
            watcher.on_state_change(state, status.clone());
        }
        if state == ConnectivityState::Shutdown {
            self.watchers.clear();
        }
    }

    /// Attaches `watcher`. If `initial_hint` differs from the current
    /// state the watcher is notified immediately with the current state
    /// and status. When the tracker is already shut down the watcher only
    /// receives that terminal notification and is not retained.
    pub fn add_watcher(
        &mut self,
        initial_hint: ConnectivityState,
        watcher: Arc<dyn StateWatcher>,
    ) -> WatcherId {
        let id = WatcherId(self.next_watcher_id);
        self.next_watcher_id += 1;

        let current = self.state();
        debug!(tracker = %self.name, watcher = id.0, state = %current, "add watcher");
        if initial_hint != current {
            watcher.on_state_change(current, self.status.clone());
        }
        if current != ConnectivityState::Shutdown {
            self.watchers.push((id, watcher));
        }
        id
    }

    /// Detaches the watcher behind `id`. Idempotent.
    pub fn remove_watcher(&mut self, id: WatcherId) {
        debug!(tracker = %self.name, watcher = id.0, "remove watcher");
        self.watchers.retain(|(watcher_id, _)| *watcher_id != id);
    }

    /// Number of currently attached watchers.
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }
}

impl Drop for ConnectivityTracker {
    fn drop(&mut self) {
        // Watchers that outlive the tracker still get a terminal signal.
        if self.state() == ConnectivityState::Shutdown {
            return;
        }
        for (_, watcher) in &self.watchers {
            watcher.on_state_change(ConnectivityState::Shutdown, Status::ok());
        }
    }
}

impl fmt::Debug for ConnectivityTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityTracker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("watchers", &self.watchers.len())
            .finish()
    }
}
