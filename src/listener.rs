//! The callback surface a connection drives.
//!
//! Every method has a do-nothing default (the one exception answers pings),
//! so an application implements only what it cares about. Callbacks for a
//! single connection are serialized; callbacks for different connections may
//! run concurrently on different worker threads.

use bytes::{Bytes, BytesMut};

use crate::close::CloseCode;
use crate::codec::Variant;
use crate::frame::{Frame, FrameView};
use crate::handshake::{Request, Response};
use crate::session::{CloseSignal, Conn};
use crate::WsError;

/// A handshake refusal carrying the close code and reason to report.
#[derive(Debug, Clone)]
pub struct Rejection {
    /// Close code recorded for the connection.
    pub code: CloseCode,
    /// Human-readable refusal reason.
    pub reason: String,
}

impl Rejection {
    /// A refusal with `code` and `reason`.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Rejection {
            code,
            reason: reason.into(),
        }
    }
}

/// Receives connection lifecycle and traffic events.
///
/// Implementations must be [`Send`] and [`Sync`]: the engine invokes them
/// from worker threads and, for write-side events, from whichever thread
/// queued the data. A panic inside any callback is contained and surfaced
/// through [`Listener::on_error`] rather than unwinding into the engine.
pub trait Listener: Send + Sync {
    /// The handshake completed and the connection is open.
    fn on_open(&self, _conn: &Conn) {}

    /// The connection is fully torn down. Fires exactly once per connection
    /// that got past accept, with the close code, reason and whether the
    /// close was initiated remotely.
    fn on_close(&self, _conn: &Conn, _signal: &CloseSignal) {}

    /// A complete text message arrived.
    fn on_message(&self, _conn: &Conn, _text: &str) {}

    /// A complete binary message arrived.
    fn on_message_binary(&self, _conn: &Conn, _data: Bytes) {}

    /// A ping arrived. The default answers with a pong echoing the payload.
    fn on_ping(&self, conn: &Conn, frame: &FrameView) {
        let _ = conn.send_frame(Frame::pong(BytesMut::from(&frame.payload[..])));
    }

    /// A pong arrived.
    fn on_pong(&self, _conn: &Conn, _frame: &FrameView) {}

    /// This side is about to send a close frame to start the close
    /// handshake. Not invoked when the peer started it.
    fn on_close_initiated(&self, _conn: &Conn, _code: CloseCode, _reason: &str) {}

    /// The connection entered its flush-and-close stage: no further sends
    /// are accepted and the transport will drop once the queue drains.
    fn on_closing(&self, _conn: &Conn, _signal: &CloseSignal) {}

    /// Outgoing data was queued; whoever owns the transport should enable
    /// write readiness for this connection.
    fn on_write_demand(&self, _conn: &Conn) {}

    /// Something went wrong. `conn` is absent for failures not tied to a
    /// single connection, such as a poller breakdown.
    fn on_error(&self, _conn: Option<&Conn>, _error: &WsError) {}

    /// A server received an upgrade request and `variant` matched it.
    ///
    /// Return a [`Response`] to accept (engine-managed headers are filled in
    /// afterwards, application headers are kept) or a [`Rejection`] to refuse
    /// the connection before it opens.
    fn on_handshake_received(
        &self,
        _conn: &Conn,
        _variant: Variant,
        _request: &Request,
    ) -> std::result::Result<Response, Rejection> {
        Ok(Response::default())
    }
}
