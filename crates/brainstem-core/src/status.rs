//! Status snapshots assembled from process-wide state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::build_info;
use crate::ipc::types::{Mode, StatusSnapshot};
use crate::mode::ModeController;

/// Whether the global hotkey is currently registered.
///
/// Written by the hotkey subsystem, read by status requests. Clones share
/// the same flag.
#[derive(Debug, Clone, Default)]
pub struct HotkeyFlag(Arc<AtomicBool>);

impl HotkeyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, registered: bool) {
        self.0.store(registered, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Builds [`StatusSnapshot`]s on demand.
#[derive(Clone)]
pub struct StatusProvider {
    started_at: Instant,
    modes: Arc<ModeController>,
    hotkey: HotkeyFlag,
}

impl StatusProvider {
    /// Captures the start time; uptime is measured from this call.
    pub fn new(modes: Arc<ModeController>, hotkey: HotkeyFlag) -> Self {
        Self {
            started_at: Instant::now(),
            modes,
            hotkey,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot_with(self.modes.current())
    }

    /// A snapshot reporting `mode`, for callers already holding the mode lock.
    pub fn snapshot_with(&self, mode: Mode) -> StatusSnapshot {
        StatusSnapshot {
            version: build_info::VERSION.to_string(),
            mode,
            hotkey_registered: self.hotkey.get(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}
