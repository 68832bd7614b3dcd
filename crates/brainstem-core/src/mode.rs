//! The authoritative mode value.
//!
//! [`ModeController`] owns the single system-wide [`Mode`]. Writers are
//! serialized by a mutex held for the read-modify-write; every effective
//! change is published as a [`ModeTransition`] while still under the lock,
//! so subscribers observe transitions in exactly the order they were
//! applied.
//!
//! An attached [`TransitionSink`] is called under the same lock. The IPC
//! registry uses it to queue mode changes to clients, and replies that
//! carry the mode are queued through [`ModeController::inspect`], so each
//! connection sees frames in write order and its last one is current.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::ipc::registry::ConnectionId;
use crate::ipc::types::Mode;

/// Capacity of the transition channel.
const TRANSITION_CAPACITY: usize = 64;

/// Who asked for a mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A `set_mode` request on an IPC connection.
    Connection(ConnectionId),
    /// The hotkey chord policy.
    Hotkey,
    /// Daemon-internal callers (tests, feature modules).
    Internal,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Connection(id) => write!(f, "{id}"),
            Origin::Hotkey => f.write_str("hotkey"),
            Origin::Internal => f.write_str("internal"),
        }
    }
}

/// An applied change from one mode to a different one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeTransition {
    pub from: Mode,
    pub to: Mode,
    pub origin: Origin,
    /// How long `from` was active.
    pub held: Duration,
}

/// Result of [`ModeController::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutcome {
    pub previous: Mode,
    pub current: Mode,
}

impl SetOutcome {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Synchronous receiver of applied transitions.
///
/// Called with the mode lock held: implementations must not block and must
/// not call back into the [`ModeController`].
pub trait TransitionSink: Send + Sync {
    fn deliver(&self, transition: &ModeTransition);
}

struct ModeSlot {
    mode: Mode,
    entered_at: Instant,
    sink: Option<Arc<dyn TransitionSink>>,
}

/// Single-writer owner of the daemon's mode.
pub struct ModeController {
    slot: Mutex<ModeSlot>,
    transitions: broadcast::Sender<ModeTransition>,
}

impl ModeController {
    /// A controller in [`Mode::Idle`].
    pub fn new() -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            slot: Mutex::new(ModeSlot {
                mode: Mode::Idle,
                entered_at: Instant::now(),
                sink: None,
            }),
            transitions,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModeSlot> {
        // The slot holds plain values, so a panic mid-update cannot leave it torn.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current mode.
    pub fn current(&self) -> Mode {
        self.lock().mode
    }

    /// Run `f` with the current mode while no write can interleave.
    ///
    /// `f` must not call back into the controller.
    pub fn inspect<R>(&self, f: impl FnOnce(Mode) -> R) -> R {
        let slot = self.lock();
        f(slot.mode)
    }

    /// Route every later transition to `sink`, replacing any earlier one.
    pub fn attach(&self, sink: Arc<dyn TransitionSink>) {
        self.lock().sink = Some(sink);
    }

    /// Stop delivering transitions to the attached sink.
    pub fn detach(&self) {
        self.lock().sink = None;
    }

    /// Set the mode. Any mode may follow any other.
    ///
    /// A [`ModeTransition`] is published only when the value actually
    /// changes; setting the current mode again is a silent no-op.
    pub fn set(&self, requested: Mode, origin: Origin) -> SetOutcome {
        self.update(origin, |_| requested)
    }

    /// Replace the mode with `next(current)` as one atomic step.
    pub fn update(&self, origin: Origin, next: impl FnOnce(Mode) -> Mode) -> SetOutcome {
        self.update_then(origin, next, |outcome| *outcome)
    }

    /// Like [`ModeController::update`], then run `then` on the outcome
    /// before the lock is released.
    ///
    /// `then` must not call back into the controller.
    pub fn update_then<R>(
        &self,
        origin: Origin,
        next: impl FnOnce(Mode) -> Mode,
        then: impl FnOnce(&SetOutcome) -> R,
    ) -> R {
        let mut slot = self.lock();
        let previous = slot.mode;
        let requested = next(previous);
        let outcome = SetOutcome {
            previous,
            current: requested,
        };
        if previous == requested {
            debug!(mode = %requested, %origin, "mode unchanged");
            return then(&outcome);
        }

        let now = Instant::now();
        let held = now.duration_since(slot.entered_at);
        slot.mode = requested;
        slot.entered_at = now;

        info!(
            from = %previous,
            to = %requested,
            %origin,
            held_ms = held.as_millis() as u64,
            "mode transition"
        );

        let transition = ModeTransition {
            from: previous,
            to: requested,
            origin,
            held,
        };
        if let Some(sink) = &slot.sink {
            sink.deliver(&transition);
        }
        // No receivers is fine: nobody is listening yet.
        let _ = self.transitions.send(transition);

        then(&outcome)
    }

    /// Receive every transition applied after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ModeTransition> {
        self.transitions.subscribe()
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}
