//! # wsmill
//!
//! A threaded WebSocket engine: wire codecs for two framing generations, an
//! incremental HTTP-style handshake parser, a callback-driven connection state
//! machine, and a readiness-polled server that fans decoding out to a small
//! pool of worker threads.
//!
//! The crate is split along those seams:
//!
//! - [`frame`]: frame heads, opcodes and payload views shared by both codecs
//! - [`codec`]: [`FrameCodec`](codec::FrameCodec) with the length-prefixed
//!   and the `0x00`/`0xFF` delimiter framings behind one interface
//! - [`handshake`]: byte-level HTTP request/response parsing and serialization
//! - [`session`]: the per-connection state machine ([`Session`]) driving a
//!   [`Listener`] through the connection lifecycle
//! - [`server`]: [`Server`](server::Server), a `mio`-based event loop with
//!   sticky decode workers and a bounded read-buffer pool
//! - [`io`]: the [`Channel`](io::Channel) transport seam, where TLS or other
//!   stream decorations plug in
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wsmill::{Conn, Listener, Server};
//!
//! struct Echo;
//!
//! impl Listener for Echo {
//!     fn on_message(&self, conn: &Conn, text: &str) {
//!         let _ = conn.send_text(text);
//!     }
//! }
//!
//! fn main() -> wsmill::Result<()> {
//!     let server = Server::bind("127.0.0.1:9001".parse().unwrap(), Arc::new(Echo))?;
//!     println!("listening on {}", server.local_addr());
//!     loop {
//!         std::thread::park();
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! - `logging`: routes internal diagnostics through the `log` facade
//! - `simd`: accelerates UTF-8 validation of text payloads with `simdutf8`
//!
//! ## Concurrency
//!
//! One selector thread owns the poller and all socket registration. Decoding
//! runs on `N` worker threads; a connection is bound to one worker on first
//! read and never migrates, so callbacks for a given connection are serial
//! while distinct connections progress in parallel. Sends are allowed from any
//! thread and are queued, with the actual socket writes performed back on the
//! selector thread.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod close;
pub mod codec;
pub mod frame;
pub mod handshake;
pub mod io;
pub mod listener;
mod mask;
pub(crate) mod pool;
pub mod server;
pub mod session;

pub use close::CloseCode;
pub use codec::{CloseHandshakeType, FrameCodec, Variant};
pub use frame::{Frame, FrameView, OpCode};
pub use handshake::{Handshake, Headers, Request, Response};
pub use io::{Channel, PlainChannel, PlainSocketFactory, SocketFactory};
pub use listener::{Listener, Rejection};
pub use server::{Server, ServerConfig};
pub use session::{CloseSignal, Conn, ReadyState, Session};

use std::io::Error as IoError;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, WsError>;

/// Which side of the connection a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake and masks outgoing frames.
    Client,
    /// Accepts the handshake and sends frames unmasked.
    Server,
}

/// Hard ceilings applied while decoding input from the peer.
///
/// Both limits are deliberately generous defaults; lower them for servers
/// exposed to untrusted clients.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Largest accepted frame payload, and largest reassembled fragmented
    /// message, in bytes.
    pub max_payload_len: usize,
    /// Largest accepted handshake (start line plus headers), in bytes.
    pub max_handshake_len: usize,
}

impl Limits {
    /// Sets the maximum accepted payload size in bytes.
    pub fn with_max_payload_len(self, len: usize) -> Self {
        Limits {
            max_payload_len: len,
            ..self
        }
    }

    /// Sets the maximum accepted handshake size in bytes.
    pub fn with_max_handshake_len(self, len: usize) -> Self {
        Limits {
            max_handshake_len: len,
            ..self
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_payload_len: 1024 * 1024,
            max_handshake_len: 16 * 1024,
        }
    }
}

/// Any error the engine can surface, from wire-level protocol violations to
/// transport failures.
#[derive(Debug, Error)]
pub enum WsError {
    /// Reserved header bits were set. No extension is ever negotiated, so the
    /// bits must be zero.
    #[error("bad rsv {0:#04x}")]
    BadRsv(u8),

    /// The opcode nibble does not name a known frame type.
    #[error("unknown opcode {0:#x}")]
    InvalidOpCode(u8),

    /// A control frame arrived without its final bit set.
    #[error("fragmented control frame")]
    FragmentedControl,

    /// A control frame declared a payload longer than 125 bytes.
    #[error("control frame payload exceeds 125 bytes")]
    OversizedControl,

    /// Text payload (or a close reason) was not valid UTF-8.
    #[error("invalid utf-8 in text payload")]
    InvalidUtf8,

    /// A new data frame started while a fragmented message was still open.
    #[error("continuous frame sequence not completed")]
    IncompleteContinuation,

    /// A continuation frame arrived with no fragmented message open.
    #[error("continuation frame outside a fragmented message")]
    StrayContinuation,

    /// A close frame carried a one-byte payload, which can encode neither a
    /// close code nor a reason.
    #[error("invalid close frame payload")]
    InvalidCloseFrame,

    /// A close code outside the ranges permitted on the wire.
    #[error("close code {0} must not be sent over the wire")]
    InvalidCloseCode(u16),

    /// A close frame may only carry a reason when it also carries a code.
    #[error("a close frame must have a closecode if it has a reason")]
    ReasonWithoutCloseCode,

    /// Delimiter framing: a start marker appeared inside an open frame.
    #[error("unexpected start of frame")]
    UnexpectedStartOfFrame,

    /// Delimiter framing: an end marker appeared with no frame open.
    #[error("unexpected end of frame")]
    UnexpectedEndOfFrame,

    /// Delimiter framing: a payload byte appeared outside any frame.
    #[error("unexpected byte {0:#04x} outside of frame")]
    StrayByte(u8),

    /// Delimiter framing carries text frames only.
    #[error("only text frames are supported by this framing")]
    TextOnly,

    /// A frame payload larger than the configured ceiling.
    #[error("frame payload of {len} bytes exceeds the limit of {max}")]
    PayloadTooLarge {
        /// Length declared or accumulated so far.
        len: u64,
        /// Configured ceiling.
        max: usize,
    },

    /// Handshake bytes kept arriving without a terminator past the configured
    /// ceiling.
    #[error("handshake exceeds the limit of {0} bytes")]
    HandshakeTooLarge(usize),

    /// The HTTP start line did not have its three-token shape.
    #[error("malformed http start line")]
    InvalidStartLine,

    /// A header line without a colon separator.
    #[error("not an http header")]
    InvalidHeader,

    /// A response status other than `101 Switching Protocols`.
    #[error("unexpected http status {0}")]
    InvalidStatusCode(u16),

    /// The peer sent a response where a request was expected, or vice versa.
    #[error("wrong http function")]
    WrongHttpFunction,

    /// The operation requires an open connection.
    #[error("connection is not open")]
    NotOpen,

    /// A listener callback panicked; the panic was contained.
    #[error("listener callback panicked")]
    ListenerPanic,

    /// Transport-level I/O failure.
    #[error(transparent)]
    Io(#[from] IoError),
}

impl WsError {
    /// Close code a session uses when it terminates the connection because of
    /// this error.
    pub fn close_code(&self) -> CloseCode {
        match self {
            WsError::InvalidUtf8 => CloseCode::BadData,
            WsError::PayloadTooLarge { .. } | WsError::HandshakeTooLarge(_) => CloseCode::TooBig,
            WsError::Io(_) => CloseCode::Abnormal,
            _ => CloseCode::Protocol,
        }
    }
}
