//! Framing variants and the codec that hides their differences.
//!
//! Two wire generations are supported. The modern one length-prefixes every
//! frame and masks client payloads; the legacy one brackets UTF-8 text
//! between a `0x00` start marker and a `0xFF` end marker and knows no other
//! frame kind. [`Variant`] carries the negotiation and handshake
//! post-processing rules for each generation, [`FrameCodec`] the byte-level
//! encoding and decoding.
//!
//! Decoders are incremental: each [`FrameCodec::decode`] call accepts however
//! many bytes the transport produced and returns every frame completed so
//! far. Partial frames are carried over to the next call, so frame boundaries
//! never have to align with read boundaries.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::{Frame, OpCode, MAX_HEAD_SIZE};
use crate::handshake::{Request, Response};
use crate::{Limits, Result, Role, WsError};

/// A framing generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Length-prefixed frames with client-side masking.
    Standard,
    /// `0x00`-to-`0xFF` delimited text frames.
    Legacy,
}

/// How a framing variant ends a connection at the protocol level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseHandshakeType {
    /// No close frame exists; the transport just closes.
    None,
    /// One side announces the close; the other does not answer.
    OneWay,
    /// Close frames are exchanged in both directions.
    TwoWay,
}

impl Variant {
    /// Negotiation order: the modern framing is preferred, the legacy one is
    /// the fallback.
    pub const CANDIDATES: [Variant; 2] = [Variant::Standard, Variant::Legacy];

    /// Whether an incoming upgrade request speaks this variant.
    pub fn accepts_request(self, request: &Request) -> bool {
        match self {
            Variant::Standard => {
                basic_accept(request.headers.get("Upgrade"), request.headers.get("Connection"))
                    && request.headers.get("Sec-WebSocket-Version") == Some("13")
            }
            Variant::Legacy => {
                request.headers.contains("Origin")
                    && basic_accept(request.headers.get("Upgrade"), request.headers.get("Connection"))
            }
        }
    }

    /// Whether a server's `101` response completes this variant's handshake.
    pub fn accepts_response(self, response: &Response) -> bool {
        basic_accept(
            response.headers.get("Upgrade"),
            response.headers.get("Connection"),
        )
    }

    /// Fill in the server's side of the handshake for an accepted request.
    pub fn postprocess_response(self, request: &Request, response: &mut Response) {
        response.status_message = "Web Socket Protocol Handshake".to_owned();
        response.headers.put("Upgrade", "WebSocket");
        response
            .headers
            .put("Connection", request.headers.get("Connection").unwrap_or(""));
        response
            .headers
            .put("WebSocket-Origin", request.headers.get("Origin").unwrap_or(""));
        let location = format!(
            "ws://{}{}",
            request.headers.get("Host").unwrap_or(""),
            request.resource
        );
        response.headers.put("WebSocket-Location", location);
    }

    /// Fill in the headers a client must send for this variant.
    pub fn postprocess_request(self, request: &mut Request) {
        request.headers.put("Upgrade", "websocket");
        request.headers.put("Connection", "Upgrade");
        if !request.headers.contains("Origin") {
            request
                .headers
                .put("Origin", format!("random{}", rand::random::<u32>()));
        }
        if self == Variant::Standard {
            request.headers.put("Sec-WebSocket-Version", "13");
        }
    }

    /// Close discipline of this variant.
    pub fn close_handshake_type(self) -> CloseHandshakeType {
        match self {
            Variant::Standard => CloseHandshakeType::TwoWay,
            Variant::Legacy => CloseHandshakeType::None,
        }
    }
}

/// Upgrade intent shared by every variant: an `Upgrade: websocket` header and
/// a `Connection` header mentioning `upgrade`, both case-insensitive.
fn basic_accept(upgrade: Option<&str>, connection: Option<&str>) -> bool {
    upgrade.is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
        && connection.is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"))
}

/// Stateful encoder/decoder for one connection's framing variant.
#[derive(Debug)]
pub enum FrameCodec {
    /// Length-prefixed framing.
    Standard(StandardFramer),
    /// Delimiter framing.
    Legacy(LegacyFramer),
}

impl FrameCodec {
    /// A fresh codec for `variant` under `limits`.
    pub fn new(variant: Variant, limits: Limits) -> Self {
        match variant {
            Variant::Standard => FrameCodec::Standard(StandardFramer::new(limits)),
            Variant::Legacy => FrameCodec::Legacy(LegacyFramer::new(limits)),
        }
    }

    /// The framing generation this codec speaks.
    pub fn variant(&self) -> Variant {
        match self {
            FrameCodec::Standard(_) => Variant::Standard,
            FrameCodec::Legacy(_) => Variant::Legacy,
        }
    }

    /// Close discipline of this codec's variant.
    pub fn close_handshake_type(&self) -> CloseHandshakeType {
        self.variant().close_handshake_type()
    }

    /// Feed `input` and collect every frame completed by it.
    ///
    /// Frames come back unmasked. An error poisons the stream; the caller is
    /// expected to tear the connection down rather than keep feeding bytes.
    pub fn decode(&mut self, input: &[u8]) -> Result<Vec<Frame>> {
        match self {
            FrameCodec::Standard(framer) => framer.decode(input),
            FrameCodec::Legacy(framer) => framer.decode(input),
        }
    }

    /// Encode one frame for the wire. `role` decides masking: clients mask,
    /// servers must not.
    pub fn encode(&self, frame: Frame, role: Role) -> Result<Bytes> {
        match self {
            FrameCodec::Standard(_) => StandardFramer::encode(frame, role),
            FrameCodec::Legacy(_) => LegacyFramer::encode(&frame),
        }
    }

    /// Drop any partially accumulated frame.
    pub fn reset(&mut self) {
        match self {
            FrameCodec::Standard(framer) => framer.buf.clear(),
            FrameCodec::Legacy(framer) => framer.frame = None,
        }
    }
}

/// Decoder state for the length-prefixed framing.
#[derive(Debug)]
pub struct StandardFramer {
    buf: BytesMut,
    max_payload_len: usize,
}

impl StandardFramer {
    fn new(limits: Limits) -> Self {
        StandardFramer {
            buf: BytesMut::new(),
            max_payload_len: limits.max_payload_len,
        }
    }

    fn decode(&mut self, input: &[u8]) -> Result<Vec<Frame>> {
        self.buf.extend_from_slice(input);
        let mut frames = Vec::new();
        while let Some(frame) = self.parse_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to take one complete frame off the front of the buffer.
    ///
    /// Header fields are validated as soon as the two fixed bytes are
    /// present, before any extended length or payload arrives; a frame that
    /// is merely incomplete is never reported as a violation.
    fn parse_one(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < 2 {
            return Ok(None);
        }

        let b0 = self.buf[0];
        let rsv = (b0 >> 4) & 0x07;
        if rsv != 0 {
            return Err(WsError::BadRsv(rsv));
        }
        let opcode = OpCode::try_from(b0 & 0x0F)?;
        let fin = b0 & 0x80 != 0;

        let b1 = self.buf[1];
        let masked = b1 & 0x80 != 0;
        let len_code = b1 & 0x7F;

        if opcode.is_control() {
            if !fin {
                return Err(WsError::FragmentedControl);
            }
            if len_code > 125 {
                return Err(WsError::OversizedControl);
            }
        }

        let (head_len, payload_len) = match len_code {
            126 => {
                if self.buf.len() < 4 {
                    return Ok(None);
                }
                (4, u16::from_be_bytes([self.buf[2], self.buf[3]]) as u64)
            }
            127 => {
                if self.buf.len() < 10 {
                    return Ok(None);
                }
                let mut be = [0u8; 8];
                be.copy_from_slice(&self.buf[2..10]);
                (10, u64::from_be_bytes(be))
            }
            short => (2, short as u64),
        };

        if payload_len > self.max_payload_len as u64 {
            return Err(WsError::PayloadTooLarge {
                len: payload_len,
                max: self.max_payload_len,
            });
        }
        let payload_len = payload_len as usize;

        let mask_len = if masked { 4 } else { 0 };
        let total = head_len + mask_len + payload_len;
        if self.buf.len() < total {
            return Ok(None);
        }

        let mut taken = self.buf.split_to(total);
        taken.advance(head_len);
        let mask = if masked {
            let key = [taken[0], taken[1], taken[2], taken[3]];
            taken.advance(4);
            Some(key)
        } else {
            None
        };

        let mut frame = Frame {
            fin,
            opcode,
            mask,
            payload: taken,
        };
        frame.unmask();
        Ok(Some(frame))
    }

    fn encode(mut frame: Frame, role: Role) -> Result<Bytes> {
        if role == Role::Client {
            frame.mask();
        }
        let mut head = [0u8; MAX_HEAD_SIZE];
        let head_len = frame.fmt_head(&mut head);

        let mut out = BytesMut::with_capacity(head_len + frame.payload.len());
        out.put_slice(&head[..head_len]);
        out.put_slice(&frame.payload);
        Ok(out.freeze())
    }
}

/// Decoder state for the delimiter framing: `None` between frames, the
/// accumulated payload while inside one.
#[derive(Debug)]
pub struct LegacyFramer {
    frame: Option<BytesMut>,
    max_payload_len: usize,
}

impl LegacyFramer {
    const START_OF_FRAME: u8 = 0x00;
    const END_OF_FRAME: u8 = 0xFF;

    fn new(limits: Limits) -> Self {
        LegacyFramer {
            frame: None,
            max_payload_len: limits.max_payload_len,
        }
    }

    fn decode(&mut self, input: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        for &byte in input {
            match byte {
                Self::START_OF_FRAME => {
                    if self.frame.is_some() {
                        return Err(WsError::UnexpectedStartOfFrame);
                    }
                    self.frame = Some(BytesMut::new());
                }
                Self::END_OF_FRAME => {
                    let Some(payload) = self.frame.take() else {
                        return Err(WsError::UnexpectedEndOfFrame);
                    };
                    // a bare start/end pair is a valid zero-length frame
                    frames.push(Frame {
                        fin: true,
                        opcode: OpCode::Text,
                        mask: None,
                        payload,
                    });
                }
                other => {
                    let Some(frame) = self.frame.as_mut() else {
                        return Err(WsError::StrayByte(other));
                    };
                    if frame.len() >= self.max_payload_len {
                        return Err(WsError::PayloadTooLarge {
                            len: frame.len() as u64 + 1,
                            max: self.max_payload_len,
                        });
                    }
                    frame.put_u8(other);
                }
            }
        }
        Ok(frames)
    }

    fn encode(frame: &Frame) -> Result<Bytes> {
        if frame.opcode != OpCode::Text {
            return Err(WsError::TextOnly);
        }
        let mut out = BytesMut::with_capacity(frame.payload.len() + 2);
        out.put_u8(Self::START_OF_FRAME);
        out.put_slice(&frame.payload);
        out.put_u8(Self::END_OF_FRAME);
        Ok(out.freeze())
    }
}
