//! The per-connection state machine.
//!
//! A [`Session`] owns everything one connection needs: the handshake
//! accumulation buffer, the negotiated [`FrameCodec`], the outgoing byte
//! queue and the close bookkeeping. It is transport-agnostic: bytes come in
//! through [`Session::receive`], bytes go out through the queue that
//! [`crate::io::write_batch`] drains, and everything the application needs
//! to know arrives through [`Listener`] callbacks.
//!
//! Closing happens in two stages. `flush-and-close` marks the intent and
//! records the close signal while queued bytes (typically the close frame)
//! are still draining; `teardown` drops the transport, moves the state to
//! `Closed` and fires `on_close` exactly once. The two stages may collapse
//! into one for abrupt endings.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::close::{self, CloseCode};
use crate::codec::{CloseHandshakeType, FrameCodec, Variant};
use crate::frame::{Frame, FrameView, OpCode};
use crate::handshake::{self, Handshake, HandshakeInput, Request, Response};
use crate::io::Channel;
use crate::listener::Listener;
use crate::{Limits, Result, Role, WsError};

/// A shared handle to a connection. Cheap to clone, safe to hold anywhere.
pub type Conn = Arc<Session>;

/// Connection lifecycle states, in the only order they can be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReadyState {
    /// No handshake seen yet.
    NotConnected = 0,
    /// A client has sent its upgrade request and awaits the response.
    Connecting = 1,
    /// Handshake complete; traffic flows.
    Open = 2,
    /// A close is underway; no new sends are accepted.
    Closing = 3,
    /// Torn down. Terminal.
    Closed = 4,
}

impl ReadyState {
    fn from_u8(value: u8) -> ReadyState {
        match value {
            0 => ReadyState::NotConnected,
            1 => ReadyState::Connecting,
            2 => ReadyState::Open,
            3 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// How and why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSignal {
    /// Close code, possibly a local-only one such as
    /// [`CloseCode::NeverConnected`].
    pub code: CloseCode,
    /// Reason text, empty when none was given.
    pub reason: String,
    /// Whether the peer initiated the close.
    pub remote: bool,
}

impl CloseSignal {
    fn new(code: CloseCode, reason: impl Into<String>, remote: bool) -> Self {
        CloseSignal {
            code,
            reason: reason.into(),
            remote,
        }
    }
}

/// Worker slot value meaning "not yet bound to a decode worker".
pub(crate) const UNASSIGNED: usize = usize::MAX;

struct Inner {
    /// Installed once the handshake negotiates a variant.
    codec: Option<FrameCodec>,
    /// Accumulates handshake bytes; dropped once the connection opens or
    /// starts closing.
    handshake_buf: Option<BytesMut>,
    /// Client side: the variant and request sent, awaiting the response.
    pending_open: Option<(Variant, Request)>,
    /// Request target this connection was opened for.
    resource: String,
    /// Reassembly state for a fragmented message.
    fragment: Option<(OpCode, BytesMut)>,
    /// Recorded close outcome once flush-and-close (or teardown) has run.
    close_signal: Option<CloseSignal>,
    /// Flush-and-close has been entered.
    flush_and_close: bool,
    /// Teardown has run; everything after is a no-op.
    torn_down: bool,
}

/// One WebSocket connection.
///
/// Created behind an [`Arc`] (see [`Conn`]); the engine and the application
/// share the same handle.
pub struct Session {
    role: Role,
    limits: Limits,
    listener: Arc<dyn Listener>,
    me: Weak<Session>,
    state: AtomicU8,
    inner: Mutex<Inner>,
    out_queue: Mutex<VecDeque<Bytes>>,
    channel: Mutex<Option<Box<dyn Channel>>>,
    /// Lock-free mirror of `Inner::flush_and_close` for the write path.
    flushing: AtomicBool,
    /// Decode worker this connection is bound to.
    worker: AtomicUsize,
    /// Poll token under which the server registered this connection.
    token: AtomicUsize,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl Session {
    /// A connection with no transport addresses, useful when the caller
    /// pumps bytes in by hand.
    pub fn new(role: Role, listener: Arc<dyn Listener>, limits: Limits) -> Conn {
        Self::with_addresses(role, listener, limits, None, None)
    }

    /// A connection annotated with its socket addresses.
    pub fn with_addresses(
        role: Role,
        listener: Arc<dyn Listener>,
        limits: Limits,
        local_addr: Option<SocketAddr>,
        peer_addr: Option<SocketAddr>,
    ) -> Conn {
        Arc::new_cyclic(|me| Session {
            role,
            limits,
            listener,
            me: me.clone(),
            state: AtomicU8::new(ReadyState::NotConnected as u8),
            inner: Mutex::new(Inner {
                codec: None,
                handshake_buf: Some(BytesMut::new()),
                pending_open: None,
                resource: String::new(),
                fragment: None,
                close_signal: None,
                flush_and_close: false,
                torn_down: false,
            }),
            out_queue: Mutex::new(VecDeque::new()),
            channel: Mutex::new(None),
            flushing: AtomicBool::new(false),
            worker: AtomicUsize::new(UNASSIGNED),
            token: AtomicUsize::new(UNASSIGNED),
            local_addr,
            peer_addr,
        })
    }

    /// Which side this session plays.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current lifecycle state.
    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the handshake is still in flight.
    pub fn is_connecting(&self) -> bool {
        self.ready_state() == ReadyState::Connecting
    }

    /// Whether traffic may flow.
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Whether a close is underway.
    pub fn is_closing(&self) -> bool {
        self.ready_state() == ReadyState::Closing
    }

    /// Whether the connection is fully torn down.
    pub fn is_closed(&self) -> bool {
        self.ready_state() == ReadyState::Closed
    }

    /// Request target this connection was opened for. Empty before the
    /// handshake completes.
    pub fn resource(&self) -> String {
        self.inner.lock().resource.clone()
    }

    /// Address of the peer, when known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Local address of the transport, when known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether outgoing bytes are still queued.
    pub fn has_buffered_data(&self) -> bool {
        !self.out_queue.lock().is_empty()
    }

    // ---- transport wiring -------------------------------------------------

    pub(crate) fn attach_channel(&self, channel: Box<dyn Channel>) {
        *self.channel.lock() = Some(channel);
    }

    /// Run `f` on the channel, if one is still attached.
    pub(crate) fn with_channel<R>(&self, f: impl FnOnce(&mut Box<dyn Channel>) -> R) -> Option<R> {
        self.channel.lock().as_mut().map(f)
    }

    pub(crate) fn channel(&self) -> &Mutex<Option<Box<dyn Channel>>> {
        &self.channel
    }

    pub(crate) fn out_queue(&self) -> &Mutex<VecDeque<Bytes>> {
        &self.out_queue
    }

    pub(crate) fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    pub(crate) fn worker_slot(&self) -> usize {
        self.worker.load(Ordering::Relaxed)
    }

    pub(crate) fn bind_worker(&self, index: usize) {
        self.worker.store(index, Ordering::Relaxed);
    }

    pub(crate) fn token(&self) -> usize {
        self.token.load(Ordering::Relaxed)
    }

    pub(crate) fn bind_token(&self, token: usize) {
        self.token.store(token, Ordering::Relaxed);
    }

    // ---- sending ----------------------------------------------------------

    /// Queue a text message.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send_frame(Frame::text(text.as_bytes()))
    }

    /// Queue a binary message.
    pub fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send_frame(Frame::binary(data))
    }

    /// Queue an arbitrary frame.
    ///
    /// Rejected with [`WsError::NotOpen`] unless the connection is open and
    /// not yet flushing toward a close.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        if !self.is_open() || self.is_flushing() {
            return Err(WsError::NotOpen);
        }
        self.enqueue_frame(frame)
    }

    /// Encode and queue without a state check; close frames use this while
    /// the connection is already on its way down.
    fn enqueue_frame(&self, frame: Frame) -> Result<()> {
        let wire = {
            let inner = self.inner.lock();
            let Some(codec) = inner.codec.as_ref() else {
                return Err(WsError::NotOpen);
            };
            codec.encode(frame, self.role)?
        };
        self.out_queue.lock().push_back(wire);
        self.dispatch(|listener, conn| listener.on_write_demand(conn));
        Ok(())
    }

    // ---- client handshake -------------------------------------------------

    /// Client side: queue the upgrade request for `variant` and start
    /// waiting for the server's response.
    pub fn send_open_request(&self, variant: Variant, mut request: Request) {
        debug_assert_eq!(self.role, Role::Client);
        variant.postprocess_request(&mut request);
        let wire = request.serialize();
        {
            let mut inner = self.inner.lock();
            inner.resource = request.resource.clone();
            inner.pending_open = Some((variant, request));
        }
        self.advance_state(ReadyState::Connecting);
        self.out_queue.lock().push_back(wire);
        self.dispatch(|listener, conn| listener.on_write_demand(conn));
    }

    // ---- receiving --------------------------------------------------------

    /// Feed bytes read from the transport.
    ///
    /// Routes to the handshake parser until a framing variant is installed,
    /// then to the frame decoder; bytes left over after the handshake head
    /// are decoded as frames within the same call.
    pub fn receive(&self, input: &[u8]) {
        if input.is_empty() || self.is_closed() {
            return;
        }
        let needs_handshake = self.inner.lock().codec.is_none();
        if needs_handshake {
            if let Some(leftover) = self.handshake_bytes(input) {
                if !leftover.is_empty() {
                    self.frame_bytes(&leftover);
                }
            }
        } else {
            self.frame_bytes(input);
        }
    }

    /// Accumulate and try to complete the handshake. Returns the bytes that
    /// followed the head when the connection opened.
    fn handshake_bytes(&self, input: &[u8]) -> Option<BytesMut> {
        enum Phase {
            Wait,
            Fail(WsError),
            Head { handshake: Handshake, leftover: BytesMut },
        }

        let phase = {
            let mut inner = self.inner.lock();
            let Some(buf) = inner.handshake_buf.as_mut() else {
                // already closing; late bytes are dropped
                return None;
            };
            if buf.len().saturating_add(input.len()) > self.limits.max_handshake_len {
                Phase::Fail(WsError::HandshakeTooLarge(self.limits.max_handshake_len))
            } else {
                buf.extend_from_slice(input);
                match handshake::parse(buf, self.role) {
                    Ok(HandshakeInput::Incomplete { hint }) => {
                        if hint > buf.len() {
                            let need = hint - buf.len();
                            buf.reserve(need);
                        }
                        Phase::Wait
                    }
                    Ok(HandshakeInput::Complete { handshake, consumed }) => {
                        let mut taken = std::mem::take(buf);
                        let leftover = taken.split_off(consumed);
                        inner.handshake_buf = None;
                        Phase::Head { handshake, leftover }
                    }
                    Err(err) => Phase::Fail(err),
                }
            }
        };

        match phase {
            Phase::Wait => None,
            Phase::Fail(err) => {
                self.handshake_failed(err);
                None
            }
            Phase::Head { handshake, leftover } => match (self.role, handshake) {
                (Role::Server, Handshake::Request(request)) => {
                    self.open_server(request).then_some(leftover)
                }
                (Role::Client, Handshake::Response(response)) => {
                    self.open_client(response).then_some(leftover)
                }
                _ => {
                    self.flush_and_close(CloseSignal::new(
                        CloseCode::Protocol,
                        WsError::WrongHttpFunction.to_string(),
                        false,
                    ));
                    None
                }
            },
        }
    }

    fn handshake_failed(&self, err: WsError) {
        match &err {
            // a mismatched side keeps the protocol close code
            WsError::WrongHttpFunction => {
                self.flush_and_close(CloseSignal::new(CloseCode::Protocol, err.to_string(), false));
            }
            WsError::HandshakeTooLarge(_) => {
                self.report_error(&err);
                self.close_with(err.close_code(), err.to_string(), false);
            }
            _ => {
                self.close_with(err.close_code(), err.to_string(), false);
            }
        }
    }

    /// Server side: negotiate a variant, consult the acceptance hook, queue
    /// the response and open. Returns whether the connection opened.
    fn open_server(&self, request: Request) -> bool {
        let Some(variant) = Variant::CANDIDATES
            .into_iter()
            .find(|v| v.accepts_request(&request))
        else {
            self.close_with(
                CloseCode::Protocol,
                "no framing variant matched the handshake".to_owned(),
                false,
            );
            return false;
        };

        let Some(conn) = self.me.upgrade() else {
            return false;
        };
        let listener = self.listener.clone();
        let verdict = match catch_unwind(AssertUnwindSafe(|| {
            listener.on_handshake_received(&conn, variant, &request)
        })) {
            Ok(verdict) => verdict,
            Err(_) => {
                self.report_error(&WsError::ListenerPanic);
                self.flush_and_close(CloseSignal::new(
                    CloseCode::NeverConnected,
                    "handshake hook failed",
                    false,
                ));
                return false;
            }
        };
        let mut response = match verdict {
            Ok(response) => response,
            Err(rejection) => {
                self.flush_and_close(CloseSignal::new(rejection.code, rejection.reason, false));
                return false;
            }
        };

        variant.postprocess_response(&request, &mut response);
        let wire = response.serialize();
        {
            let mut inner = self.inner.lock();
            inner.resource = request.resource.clone();
            inner.codec = Some(FrameCodec::new(variant, self.limits));
        }
        self.out_queue.lock().push_back(wire);
        self.dispatch(|listener, conn| listener.on_write_demand(conn));
        self.advance_state(ReadyState::Open);
        #[cfg(feature = "logging")]
        log::debug!(
            "connection from {:?} open for {:?} with {:?}",
            self.peer_addr,
            self.inner.lock().resource,
            variant
        );
        self.dispatch(|listener, conn| listener.on_open(conn));
        true
    }

    /// Client side: match the response against the requested variant and
    /// open. Returns whether the connection opened.
    fn open_client(&self, response: Response) -> bool {
        let pending = self.inner.lock().pending_open.take();
        let Some((variant, _request)) = pending else {
            self.flush_and_close(CloseSignal::new(
                CloseCode::Protocol,
                "unsolicited handshake response",
                false,
            ));
            return false;
        };
        if !variant.accepts_response(&response) {
            self.close_with(
                CloseCode::Protocol,
                "handshake response does not match the requested framing".to_owned(),
                false,
            );
            return false;
        }
        self.inner.lock().codec = Some(FrameCodec::new(variant, self.limits));
        self.advance_state(ReadyState::Open);
        #[cfg(feature = "logging")]
        log::debug!("connection to {:?} open with {:?}", self.peer_addr, variant);
        self.dispatch(|listener, conn| listener.on_open(conn));
        true
    }

    /// Decode frames and act on them.
    fn frame_bytes(&self, input: &[u8]) {
        let frames = {
            let mut inner = self.inner.lock();
            let Some(codec) = inner.codec.as_mut() else {
                return;
            };
            match codec.decode(input) {
                Ok(frames) => frames,
                Err(err) => {
                    drop(inner);
                    self.decode_failed(err);
                    return;
                }
            }
        };
        for frame in frames {
            if self.is_closed() {
                break;
            }
            self.handle_frame(frame);
        }
    }

    fn decode_failed(&self, err: WsError) {
        #[cfg(feature = "logging")]
        log::debug!("closing connection after decode error: {err}");
        self.report_error(&err);
        self.close_with(err.close_code(), err.to_string(), false);
    }

    fn handle_frame(&self, frame: Frame) {
        match frame.opcode {
            OpCode::Close => self.close_frame_received(&frame),
            OpCode::Ping => {
                let view = FrameView {
                    opcode: OpCode::Ping,
                    payload: frame.payload.freeze(),
                };
                self.dispatch(|listener, conn| listener.on_ping(conn, &view));
            }
            OpCode::Pong => {
                let view = FrameView {
                    opcode: OpCode::Pong,
                    payload: frame.payload.freeze(),
                };
                self.dispatch(|listener, conn| listener.on_pong(conn, &view));
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if let Err(err) = self.data_frame(frame) {
                    self.decode_failed(err);
                }
            }
        }
    }

    /// Apply the fragmentation rules and hand back a completed message, if
    /// this frame finished one.
    fn data_frame(&self, frame: Frame) -> Result<()> {
        let completed = {
            let mut inner = self.inner.lock();
            match frame.opcode {
                OpCode::Continuation => {
                    let Some((opcode, mut partial)) = inner.fragment.take() else {
                        return Err(WsError::StrayContinuation);
                    };
                    let total = partial.len().saturating_add(frame.payload.len());
                    if total > self.limits.max_payload_len {
                        return Err(WsError::PayloadTooLarge {
                            len: total as u64,
                            max: self.limits.max_payload_len,
                        });
                    }
                    partial.extend_from_slice(&frame.payload);
                    if frame.fin {
                        Some((opcode, partial))
                    } else {
                        inner.fragment = Some((opcode, partial));
                        None
                    }
                }
                opcode => {
                    if inner.fragment.is_some() {
                        return Err(WsError::IncompleteContinuation);
                    }
                    if frame.fin {
                        Some((opcode, frame.payload))
                    } else {
                        inner.fragment = Some((opcode, frame.payload));
                        None
                    }
                }
            }
        };
        if let Some((opcode, payload)) = completed {
            self.deliver(opcode, payload);
        }
        Ok(())
    }

    fn deliver(&self, opcode: OpCode, payload: BytesMut) {
        let payload = payload.freeze();
        match opcode {
            OpCode::Text => {
                #[cfg(feature = "simd")]
                let valid = simdutf8::basic::from_utf8(&payload).is_ok();
                #[cfg(not(feature = "simd"))]
                let valid = std::str::from_utf8(&payload).is_ok();
                if !valid {
                    self.decode_failed(WsError::InvalidUtf8);
                    return;
                }
                // SAFETY: validated just above.
                let text = unsafe { std::str::from_utf8_unchecked(&payload) };
                self.dispatch(|listener, conn| listener.on_message(conn, text));
            }
            OpCode::Binary => {
                self.dispatch(|listener, conn| listener.on_message_binary(conn, payload.clone()));
            }
            _ => {}
        }
    }

    // ---- closing ----------------------------------------------------------

    fn close_frame_received(&self, frame: &Frame) {
        let (code, reason) = match close::parse_close_payload(&frame.payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.decode_failed(err);
                return;
            }
        };
        if self.ready_state() == ReadyState::Closing {
            // the answer to our own close frame
            self.teardown(CloseSignal::new(code, reason, true));
        } else if self.close_handshake_type() == CloseHandshakeType::TwoWay {
            self.close_with(code, reason, true);
        } else {
            self.flush_and_close(CloseSignal::new(code, reason, false));
        }
    }

    /// Start an orderly close with `code` and `reason`.
    ///
    /// On an open two-way connection this sends a close frame and waits for
    /// the peer's answer; otherwise it degrades to flush-and-close.
    pub fn close(&self, code: CloseCode, reason: &str) {
        self.close_with(code, reason.to_owned(), false);
    }

    /// Drop the transport immediately, skipping the close handshake, and
    /// report `code` and `reason` locally.
    pub fn close_transport(&self, code: CloseCode, reason: &str) {
        self.teardown(CloseSignal::new(code, reason, false));
    }

    fn close_with(&self, code: CloseCode, reason: String, remote: bool) {
        if matches!(self.ready_state(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }

        if self.ready_state() == ReadyState::Open {
            if code == CloseCode::Abnormal {
                self.advance_state(ReadyState::Closing);
                self.flush_and_close(CloseSignal::new(code, reason, false));
                return;
            }
            if self.close_handshake_type() != CloseHandshakeType::None {
                if !remote {
                    let reason = reason.clone();
                    self.dispatch(move |listener, conn| {
                        listener.on_close_initiated(conn, code, &reason)
                    });
                }
                if self.is_open() {
                    if let Err(err) = self.queue_close_frame(code, &reason) {
                        self.report_error(&err);
                        self.flush_and_close(CloseSignal::new(
                            CloseCode::Abnormal,
                            "generated frame is invalid",
                            false,
                        ));
                    }
                }
            }
            self.flush_and_close(CloseSignal::new(code, reason, remote));
        } else {
            self.flush_and_close(CloseSignal::new(CloseCode::NeverConnected, reason, false));
        }

        self.advance_state(ReadyState::Closing);
        self.inner.lock().handshake_buf = None;
    }

    fn queue_close_frame(&self, code: CloseCode, reason: &str) -> Result<()> {
        let frame = Frame::close(code, reason)?;
        self.enqueue_frame(frame)
    }

    /// Record the close signal and stop producing: the codec is reset, sends
    /// are refused, and the write path will finish the teardown once the
    /// queue drains.
    fn flush_and_close(&self, signal: CloseSignal) {
        {
            let mut inner = self.inner.lock();
            if inner.flush_and_close {
                return;
            }
            inner.flush_and_close = true;
            inner.close_signal = Some(signal.clone());
            if let Some(codec) = inner.codec.as_mut() {
                codec.reset();
            }
            inner.pending_open = None;
        }
        self.flushing.store(true, Ordering::Release);
        self.dispatch(|listener, conn| listener.on_write_demand(conn));
        self.dispatch(|listener, conn| listener.on_closing(conn, &signal));
    }

    /// Final stage: drop the transport, move to `Closed`, fire `on_close`.
    /// Runs at most once.
    fn teardown(&self, signal: CloseSignal) {
        {
            let mut inner = self.inner.lock();
            if inner.torn_down {
                return;
            }
            inner.torn_down = true;
            if let Some(codec) = inner.codec.as_mut() {
                codec.reset();
            }
            inner.pending_open = None;
            inner.handshake_buf = None;
            inner.close_signal = Some(signal.clone());
        }
        // drop the transport before announcing the close
        let channel = self.channel.lock().take();
        drop(channel);
        self.advance_state(ReadyState::Closed);
        #[cfg(feature = "logging")]
        log::debug!(
            "connection to {:?} closed: {} {:?} (remote: {})",
            self.peer_addr,
            signal.code,
            signal.reason,
            signal.remote
        );
        self.dispatch(|listener, conn| listener.on_close(conn, &signal));
        self.out_queue.lock().clear();
    }

    /// Finish a flush-and-close whose queue has drained, using the recorded
    /// signal.
    pub(crate) fn teardown_recorded(&self) {
        let signal = self
            .inner
            .lock()
            .close_signal
            .clone()
            .unwrap_or_else(|| CloseSignal::new(CloseCode::NoStatus, "", false));
        self.teardown(signal);
    }

    /// The transport hit end-of-stream. What that means depends on how far
    /// the connection got and on the variant's close discipline.
    pub(crate) fn eot(&self) {
        let state = self.ready_state();
        if matches!(state, ReadyState::NotConnected | ReadyState::Connecting) {
            self.teardown(CloseSignal::new(CloseCode::NeverConnected, "", true));
            return;
        }

        let recorded = {
            let inner = self.inner.lock();
            if inner.flush_and_close {
                inner.close_signal.clone()
            } else {
                None
            }
        };
        if let Some(signal) = recorded {
            self.teardown(signal);
            return;
        }

        let signal = match self.close_handshake_type() {
            CloseHandshakeType::None => CloseSignal::new(CloseCode::Normal, "", true),
            CloseHandshakeType::OneWay => {
                let code = if self.role == Role::Server {
                    CloseCode::Abnormal
                } else {
                    CloseCode::Normal
                };
                CloseSignal::new(code, "", true)
            }
            CloseHandshakeType::TwoWay => CloseSignal::new(CloseCode::Abnormal, "", true),
        };
        self.teardown(signal);
    }

    /// The transport failed. Reports the error and tears down abnormally.
    pub(crate) fn transport_error(&self, err: std::io::Error) {
        let reason = err.to_string();
        self.report_error(&WsError::Io(err));
        self.teardown(CloseSignal::new(CloseCode::Abnormal, reason, false));
    }

    // ---- plumbing ---------------------------------------------------------

    fn close_handshake_type(&self) -> CloseHandshakeType {
        self.inner
            .lock()
            .codec
            .as_ref()
            .map(|codec| codec.close_handshake_type())
            .unwrap_or(CloseHandshakeType::TwoWay)
    }

    /// Monotonic state advance; a later state never goes back.
    fn advance_state(&self, to: ReadyState) {
        self.state.fetch_max(to as u8, Ordering::AcqRel);
    }

    /// Invoke a listener callback, containing panics.
    fn dispatch(&self, f: impl FnOnce(&Arc<dyn Listener>, &Conn)) {
        let Some(conn) = self.me.upgrade() else {
            return;
        };
        let listener = self.listener.clone();
        if catch_unwind(AssertUnwindSafe(|| f(&listener, &conn))).is_err() {
            self.report_error(&WsError::ListenerPanic);
        }
    }

    /// Surface an error to the listener; a panic here is swallowed since
    /// there is nowhere left to report it.
    fn report_error(&self, err: &WsError) {
        let conn = self.me.upgrade();
        let listener = self.listener.clone();
        let _ = catch_unwind(AssertUnwindSafe(|| listener.on_error(conn.as_ref(), err)));
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("state", &self.ready_state())
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}
