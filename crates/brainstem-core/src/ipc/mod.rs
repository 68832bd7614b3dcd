//! Daemon IPC: framed JSON over a Unix domain socket.
//!
//! Clients (the CLI, status indicators, overlays) connect to the daemon's
//! per-user socket, send one request at a time and receive its reply plus
//! any mode-change broadcasts on the same stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   len:u32 LE + JSON    ┌──────────────┐   ┌────────────┐
//! │  Client  │◀──────────────────────▶│  IpcServer   │──▶│ Dispatcher │
//! └──────────┘     Unix socket        │ reader/writer│   └─────┬──────┘
//!       ▲                             │ per conn     │         │ set
//!       │          broadcast          └──────▲───────┘   ┌─────▼──────────┐
//!       └───────────────────────────── Registry ◀────────│ ModeController │
//!                                    (under mode lock)   └────────────────┘
//! ```

pub mod client;
pub mod codec;
pub mod dispatch;
pub mod registry;
pub mod server;
pub mod types;

pub use client::{Connection, IpcClient, IpcClientError};
pub use codec::FrameError;
pub use dispatch::Dispatcher;
pub use registry::{ConnectionId, Registry};
pub use server::{IpcServer, ServerOptions, TransportError};
pub use types::*;
