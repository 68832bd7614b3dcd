//! Request dispatch: decoded request in, reply out.
//!
//! Handlers never block beyond the momentary mode lock. Replies that carry
//! the mode are queued on the requester's connection while that lock is
//! held, and an effective change reaches every connection, the requester
//! included, through the registry's [`TransitionSink`]. A connection's
//! mode-bearing frames therefore arrive in write order.
//!
//! [`TransitionSink`]: crate::mode::TransitionSink

use std::sync::Arc;

use tracing::debug;

use super::codec;
use super::registry::{ConnectionId, Registry};
use super::types::{ERROR_BAD_REQUEST, Request, Response};
use crate::mode::{ModeController, Origin};
use crate::status::StatusProvider;

/// Turns requests into responses.
#[derive(Clone)]
pub struct Dispatcher {
    modes: Arc<ModeController>,
    status: StatusProvider,
    registry: Arc<Registry>,
}

impl Dispatcher {
    /// Mode transitions are routed to `registry` from here on.
    pub fn new(
        modes: Arc<ModeController>,
        status: StatusProvider,
        registry: Arc<Registry>,
    ) -> Self {
        modes.attach(registry.clone());
        Self {
            modes,
            status,
            registry,
        }
    }

    /// Handle one decoded request from connection `origin`.
    ///
    /// Returns the reply for the caller to queue, or `None` when the reply
    /// was already queued on `origin` in mode order.
    pub fn handle(&self, origin: ConnectionId, request: Request) -> Option<Response> {
        match request {
            Request::Ping => Some(Response::Pong),
            Request::GetStatus => {
                self.modes.inspect(|mode| {
                    self.registry
                        .send_to(origin, Response::Status(self.status.snapshot_with(mode)))
                });
                None
            }
            Request::SetMode { mode } => {
                self.modes.update_then(
                    Origin::Connection(origin),
                    |_| mode,
                    |outcome| {
                        // Unchanged values are still acknowledged to the requester.
                        if !outcome.changed() {
                            self.registry
                                .send_to(origin, Response::mode_change(outcome.current));
                        }
                    },
                );
                None
            }
        }
    }

    /// Decode a frame payload and handle it.
    ///
    /// A payload that is not a valid request gets a `bad_request` error;
    /// the caller keeps the connection open.
    pub fn handle_payload(&self, origin: ConnectionId, payload: &[u8]) -> Option<Response> {
        match codec::decode_payload::<Request>(payload) {
            Ok(request) => {
                debug!(conn = %origin, ?request, "request");
                self.handle(origin, request)
            }
            Err(e) => {
                debug!(conn = %origin, error = %e, "rejecting request");
                Some(Response::error(ERROR_BAD_REQUEST, e.to_string()))
            }
        }
    }
}
