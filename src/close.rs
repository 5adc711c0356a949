//! Close codes and the close frame payload format.
//!
//! A close payload is either empty, or a big-endian `u16` code followed by an
//! optional UTF-8 reason. A handful of codes are reserved for local reporting
//! and must never appear on the wire; [`CloseCode::is_wire_legal`] is the
//! single gate both the encoder and the decoder apply.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Result, WsError};

/// Status codes carried by (or derived from) close frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000, normal completion.
    Normal,
    /// 1001, endpoint is going away (shutdown, navigation).
    GoingAway,
    /// 1002, protocol violation.
    Protocol,
    /// 1003, received a data type the endpoint refuses to accept.
    Unsupported,
    /// 1005, no status code was present. Local reporting only.
    NoStatus,
    /// 1006, connection dropped without a close frame. Local reporting only.
    Abnormal,
    /// 1007, payload inconsistent with its declared type (bad UTF-8).
    BadData,
    /// 1008, message violated endpoint policy.
    Policy,
    /// 1009, message too big to process.
    TooBig,
    /// 1010, client expected an extension the server did not negotiate.
    MissingExtension,
    /// 1011, server hit an unexpected condition.
    Error,
    /// 1015, TLS handshake failure. Local reporting only.
    Tls,
    /// The connection was torn down before the handshake completed. Never
    /// sent on the wire.
    NeverConnected,
    /// Any other code, including the registered (3000-3999) and private
    /// (4000-4999) ranges.
    Other(u16),
}

impl CloseCode {
    /// Map a wire code to its variant.
    pub fn from_u16(code: u16) -> CloseCode {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::BadData,
            1008 => CloseCode::Policy,
            1009 => CloseCode::TooBig,
            1010 => CloseCode::MissingExtension,
            1011 => CloseCode::Error,
            1015 => CloseCode::Tls,
            other => CloseCode::Other(other),
        }
    }

    /// Numeric value of this code.
    ///
    /// [`CloseCode::NeverConnected`] has no wire representation and reports
    /// as 1006; it is rejected by [`CloseCode::is_wire_legal`] either way.
    pub fn to_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::BadData => 1007,
            CloseCode::Policy => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::MissingExtension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Tls => 1015,
            CloseCode::NeverConnected => 1006,
            CloseCode::Other(code) => code,
        }
    }

    /// Whether this code may be carried in a close frame payload.
    ///
    /// Legal codes are 1000 through 4999, minus 1004 (reserved) and the
    /// local-reporting codes 1005, 1006 and 1015.
    pub fn is_wire_legal(self) -> bool {
        let code = self.to_u16();
        (1000..=4999).contains(&code) && !matches!(code, 1004 | 1005 | 1006 | 1015)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseCode::NeverConnected => write!(f, "never connected"),
            other => write!(f, "{}", other.to_u16()),
        }
    }
}

/// Decode a received close payload into `(code, reason)`.
///
/// An empty payload means the peer sent no status; a one-byte payload can
/// encode nothing valid and is rejected. Codes that are illegal on the wire
/// are rejected even though this side is only reading them.
pub fn parse_close_payload(payload: &[u8]) -> Result<(CloseCode, String)> {
    match payload.len() {
        0 => Ok((CloseCode::NoStatus, String::new())),
        1 => Err(WsError::InvalidCloseFrame),
        _ => {
            let raw = u16::from_be_bytes([payload[0], payload[1]]);
            let code = CloseCode::from_u16(raw);
            if !code.is_wire_legal() {
                return Err(WsError::InvalidCloseCode(raw));
            }
            let reason = decode_reason(&payload[2..])?;
            Ok((code, reason.to_owned()))
        }
    }
}

/// Encode `(code, reason)` into a close payload.
///
/// [`CloseCode::Tls`] collapses to an empty no-status payload, and a reason
/// without a code is refused: the wire format has nowhere to put it.
pub fn build_close_payload(code: CloseCode, reason: &str) -> Result<Bytes> {
    let (code, reason) = if code == CloseCode::Tls {
        (CloseCode::NoStatus, "")
    } else {
        (code, reason)
    };

    if code == CloseCode::NoStatus {
        if !reason.is_empty() {
            return Err(WsError::ReasonWithoutCloseCode);
        }
        return Ok(Bytes::new());
    }

    if !code.is_wire_legal() {
        return Err(WsError::InvalidCloseCode(code.to_u16()));
    }

    let mut payload = BytesMut::with_capacity(2 + reason.len());
    payload.put_u16(code.to_u16());
    payload.put_slice(reason.as_bytes());
    Ok(payload.freeze())
}

#[cfg(feature = "simd")]
fn decode_reason(bytes: &[u8]) -> Result<&str> {
    simdutf8::basic::from_utf8(bytes).map_err(|_| WsError::InvalidUtf8)
}

#[cfg(not(feature = "simd"))]
fn decode_reason(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| WsError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod code_tests {
        use super::*;

        #[test]
        fn round_trips_named_codes() {
            for raw in [1000, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1010, 1011, 1015] {
                assert_eq!(CloseCode::from_u16(raw).to_u16(), raw);
            }
            assert_eq!(CloseCode::from_u16(3000), CloseCode::Other(3000));
            assert_eq!(CloseCode::Other(4321).to_u16(), 4321);
        }

        #[test]
        fn wire_legality() {
            assert!(CloseCode::Normal.is_wire_legal());
            assert!(CloseCode::Other(3000).is_wire_legal());
            assert!(CloseCode::Other(4999).is_wire_legal());

            assert!(!CloseCode::NoStatus.is_wire_legal());
            assert!(!CloseCode::Abnormal.is_wire_legal());
            assert!(!CloseCode::Tls.is_wire_legal());
            assert!(!CloseCode::NeverConnected.is_wire_legal());
            assert!(!CloseCode::Other(1004).is_wire_legal());
            assert!(!CloseCode::Other(999).is_wire_legal());
            assert!(!CloseCode::Other(5000).is_wire_legal());
        }
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn empty_payload_is_no_status() {
            assert_eq!(
                parse_close_payload(&[]).unwrap(),
                (CloseCode::NoStatus, String::new())
            );
        }

        #[test]
        fn one_byte_payload_is_invalid() {
            assert!(matches!(
                parse_close_payload(&[0x03]),
                Err(WsError::InvalidCloseFrame)
            ));
        }

        #[test]
        fn code_and_reason() {
            let mut payload = vec![0x03, 0xe8];
            payload.extend_from_slice("bye".as_bytes());
            assert_eq!(
                parse_close_payload(&payload).unwrap(),
                (CloseCode::Normal, "bye".to_owned())
            );
        }

        #[test]
        fn rejects_reserved_codes_from_the_wire() {
            // 1005 encoded explicitly
            assert!(matches!(
                parse_close_payload(&[0x03, 0xed]),
                Err(WsError::InvalidCloseCode(1005))
            ));
        }

        #[test]
        fn rejects_bad_utf8_reason() {
            assert!(matches!(
                parse_close_payload(&[0x03, 0xe8, 0xff, 0xfe]),
                Err(WsError::InvalidUtf8)
            ));
        }
    }

    mod build_tests {
        use super::*;

        #[test]
        fn code_then_reason_bytes() {
            let payload = build_close_payload(CloseCode::GoingAway, "later").unwrap();
            assert_eq!(&payload[..2], &[0x03, 0xe9]);
            assert_eq!(&payload[2..], b"later");
        }

        #[test]
        fn no_status_encodes_empty() {
            assert!(build_close_payload(CloseCode::NoStatus, "").unwrap().is_empty());
        }

        #[test]
        fn reason_without_code_is_refused() {
            assert!(matches!(
                build_close_payload(CloseCode::NoStatus, "oops"),
                Err(WsError::ReasonWithoutCloseCode)
            ));
        }

        #[test]
        fn tls_collapses_to_no_status() {
            let payload = build_close_payload(CloseCode::Tls, "cert problem").unwrap();
            assert!(payload.is_empty());
        }

        #[test]
        fn local_codes_are_refused() {
            assert!(matches!(
                build_close_payload(CloseCode::Abnormal, ""),
                Err(WsError::InvalidCloseCode(1006))
            ));
            assert!(matches!(
                build_close_payload(CloseCode::NeverConnected, ""),
                Err(WsError::InvalidCloseCode(_))
            ));
        }
    }
}
