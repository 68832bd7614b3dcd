#![deny(unsafe_code)]

//! brainstem core daemon runtime.
//!
//! The daemon is the single source of truth for the user's interaction
//! mode. Clients talk to it over a local socket; every change of mode is
//! pushed to every connected client.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Daemon runtime: socket lifecycle, signals, hotkey wiring.
pub mod daemon;
/// Hotkey chord policy.
pub mod hotkey;
/// Wire protocol, framing, server and client.
pub mod ipc;
/// The authoritative mode value and its transition stream.
pub mod mode;
/// Client-side connection keeper.
pub mod reconnect;
/// Status snapshots.
pub mod status;

pub use daemon::{Daemon, DaemonError};
pub use ipc::{IpcClient, Mode, Request, Response, StatusSnapshot};
pub use mode::{ModeController, ModeTransition, Origin, TransitionSink};
pub use reconnect::{ClientEvent, ControllerHandle, LinkState, ReconnectController, RetryPolicy};
pub use status::HotkeyFlag;
