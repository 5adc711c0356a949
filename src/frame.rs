//! Frame types shared by both framing generations.
//!
//! [`Frame`] is the wire-level unit: final-fragment bit, opcode, optional
//! mask key and payload. [`FrameView`] is the decoded, unmasked view handed
//! to application code in callbacks.

use bytes::{Bytes, BytesMut};

use crate::close::{self, CloseCode};
use crate::mask::apply_mask;
use crate::{Result, WsError};

/// Largest possible frame head: 2 fixed bytes, 8 length bytes, 4 mask bytes,
/// rounded up.
pub(crate) const MAX_HEAD_SIZE: usize = 16;

/// Frame type nibble from the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Follow-up fragment of a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text payload.
    Text = 0x1,
    /// Opaque binary payload.
    Binary = 0x2,
    /// Close handshake frame.
    Close = 0x8,
    /// Liveness probe.
    Ping = 0x9,
    /// Liveness probe answer.
    Pong = 0xA,
}

impl OpCode {
    /// Control frames interleave with fragmented messages and may never be
    /// fragmented themselves.
    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WsError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(WsError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        value as u8
    }
}

/// A complete, unmasked frame as seen by application code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameView {
    /// Frame type.
    pub opcode: OpCode,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl FrameView {
    /// A text view. The payload must already be valid UTF-8.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        FrameView {
            opcode: OpCode::Text,
            payload: payload.into(),
        }
    }

    /// A binary view.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        FrameView {
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }

    /// A ping view.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        FrameView {
            opcode: OpCode::Ping,
            payload: payload.into(),
        }
    }

    /// A pong view.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        FrameView {
            opcode: OpCode::Pong,
            payload: payload.into(),
        }
    }

    /// A close view carrying `code` and `reason`, validated against the wire
    /// rules for close payloads.
    pub fn close(code: CloseCode, reason: &str) -> Result<Self> {
        Ok(FrameView {
            opcode: OpCode::Close,
            payload: close::build_close_payload(code, reason)?,
        })
    }

    /// Close code carried by a close view, if any.
    pub fn close_code(&self) -> Option<CloseCode> {
        if self.opcode == OpCode::Close && self.payload.len() >= 2 {
            let raw = u16::from_be_bytes([self.payload[0], self.payload[1]]);
            Some(CloseCode::from_u16(raw))
        } else {
            None
        }
    }

    /// Close reason carried by a close view, if any.
    pub fn close_reason(&self) -> Option<&str> {
        if self.opcode == OpCode::Close && self.payload.len() > 2 {
            std::str::from_utf8(&self.payload[2..]).ok()
        } else {
            None
        }
    }

    /// The payload as a string slice.
    ///
    /// Panics when the payload is not valid UTF-8. Views the engine produces
    /// for text messages are validated during decoding and never panic here;
    /// ping, pong and binary views may carry arbitrary bytes.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.payload).expect("utf8")
    }
}

/// A wire-level frame: header fields plus a possibly-masked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of its message.
    pub fin: bool,
    /// Frame type.
    pub opcode: OpCode,
    /// Mask key, if the payload is (or is to be) masked.
    pub mask: Option<[u8; 4]>,
    /// Payload bytes; masked exactly when `mask` is `Some`.
    pub payload: BytesMut,
}

impl Frame {
    /// A frame with explicit header fields and an unmasked payload.
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<BytesMut>) -> Self {
        Frame {
            fin,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// An unfragmented text frame. The payload must be valid UTF-8.
    pub fn text(payload: impl Into<BytesMut>) -> Self {
        Frame::new(true, OpCode::Text, payload)
    }

    /// An unfragmented binary frame.
    pub fn binary(payload: impl Into<BytesMut>) -> Self {
        Frame::new(true, OpCode::Binary, payload)
    }

    /// A ping frame. Control frames are always final.
    pub fn ping(payload: impl Into<BytesMut>) -> Self {
        Frame::new(true, OpCode::Ping, payload)
    }

    /// A pong frame.
    pub fn pong(payload: impl Into<BytesMut>) -> Self {
        Frame::new(true, OpCode::Pong, payload)
    }

    /// A continuation fragment.
    pub fn continuation(fin: bool, payload: impl Into<BytesMut>) -> Self {
        Frame::new(fin, OpCode::Continuation, payload)
    }

    /// A close frame carrying `code` and `reason`.
    ///
    /// Fails when the code is illegal on the wire or when a reason is given
    /// without a code to anchor it.
    pub fn close(code: CloseCode, reason: &str) -> Result<Self> {
        let payload = close::build_close_payload(code, reason)?;
        Ok(Frame::new(true, OpCode::Close, BytesMut::from(&payload[..])))
    }

    /// A view of this frame's payload. The frame must be unmasked.
    pub fn view(&self) -> FrameView {
        debug_assert!(self.mask.is_none());
        FrameView {
            opcode: self.opcode,
            payload: Bytes::copy_from_slice(&self.payload),
        }
    }

    /// Write the frame head into `head`, returning its length in bytes.
    pub(crate) fn fmt_head(&self, head: &mut [u8; MAX_HEAD_SIZE]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }

    /// Mask the payload with a fresh random key. No-op if already masked.
    pub(crate) fn mask(&mut self) {
        if self.mask.is_none() {
            let key: [u8; 4] = rand::random();
            apply_mask(&mut self.payload, key);
            self.mask = Some(key);
        }
    }

    /// Remove the mask, if any, restoring the clear payload.
    pub(crate) fn unmask(&mut self) {
        if let Some(key) = self.mask.take() {
            apply_mask(&mut self.payload, key);
        }
    }
}
