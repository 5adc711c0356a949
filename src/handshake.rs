//! Byte-level parsing and serialization of the HTTP-style opening handshake.
//!
//! The parser is incremental over a caller-owned buffer: it either consumes a
//! complete head (start line, headers, blank line) or reports how much larger
//! the buffer should grow before the next attempt. It never consumes a
//! partial handshake.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Result, Role, WsError};

/// An ordered name/value mapping with case-insensitive names.
///
/// Insertion order is preserved through serialization; storing a name that is
/// already present replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// An empty header set.
    pub fn new() -> Self {
        Headers::default()
    }

    /// Store `value` under `name`, replacing any existing value while keeping
    /// the name's original position.
    pub fn put(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Value stored under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An upgrade request as sent by a client.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Request target from the start line, e.g. `/chat`.
    pub resource: String,
    /// Header fields in arrival order.
    pub headers: Headers,
    /// Optional body appended after the blank line when serializing.
    pub content: Option<Bytes>,
}

/// A `101` response as sent by a server.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Text after the `101` status code in the start line.
    pub status_message: String,
    /// Header fields in arrival order.
    pub headers: Headers,
    /// Optional body appended after the blank line when serializing.
    pub content: Option<Bytes>,
}

impl Request {
    /// Serialize to wire bytes: start line, headers, blank line, content.
    pub fn serialize(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_slice(b"GET ");
        out.put_slice(self.resource.as_bytes());
        out.put_slice(b" HTTP/1.1\r\n");
        serialize_tail(&mut out, &self.headers, self.content.as_ref());
        out.freeze()
    }
}

impl Response {
    /// Serialize to wire bytes: start line, headers, blank line, content.
    pub fn serialize(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_slice(b"HTTP/1.1 101 ");
        out.put_slice(self.status_message.as_bytes());
        out.put_slice(b"\r\n");
        serialize_tail(&mut out, &self.headers, self.content.as_ref());
        out.freeze()
    }
}

fn serialize_tail(out: &mut BytesMut, headers: &Headers, content: Option<&Bytes>) {
    for (name, value) in headers.iter() {
        out.put_slice(name.as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"\r\n");
    if let Some(content) = content {
        out.put_slice(content);
    }
}

/// Either side's handshake head.
#[derive(Debug, Clone)]
pub enum Handshake {
    /// A client's upgrade request.
    Request(Request),
    /// A server's `101` response.
    Response(Response),
}

impl Handshake {
    /// Header fields of either side.
    pub fn headers(&self) -> &Headers {
        match self {
            Handshake::Request(req) => &req.headers,
            Handshake::Response(resp) => &resp.headers,
        }
    }

    fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Handshake::Request(req) => &mut req.headers,
            Handshake::Response(resp) => &mut resp.headers,
        }
    }

    /// Serialize to wire bytes.
    pub fn serialize(&self) -> Bytes {
        match self {
            Handshake::Request(req) => req.serialize(),
            Handshake::Response(resp) => resp.serialize(),
        }
    }
}

/// Outcome of a parse attempt over an accumulation buffer.
#[derive(Debug)]
pub enum HandshakeInput {
    /// A full head was parsed; `consumed` bytes belong to it and anything
    /// after is frame data.
    Complete {
        /// The parsed head.
        handshake: Handshake,
        /// Bytes consumed from the front of the buffer.
        consumed: usize,
    },
    /// More bytes are needed; grow the accumulation buffer to at least
    /// `hint` before retrying.
    Incomplete {
        /// Suggested buffer size for the next attempt.
        hint: usize,
    },
}

/// Parse one handshake head from `buf`.
///
/// `role` is the parsing side: a server expects a request, a client expects
/// a `101` response. The buffer is only logically consumed on
/// [`HandshakeInput::Complete`]; on `Incomplete` nothing has been taken and
/// the caller retries once more bytes have arrived.
pub fn parse(buf: &[u8], role: Role) -> Result<HandshakeInput> {
    let mut pos = 0;

    let Some(first) = read_line(buf, &mut pos) else {
        // no complete start line yet
        return Ok(HandshakeInput::Incomplete {
            hint: buf.len() + 128,
        });
    };
    let first = String::from_utf8_lossy(first);

    let mut handshake = start_line(&first, role)?;

    loop {
        let Some(line) = read_line(buf, &mut pos) else {
            // head not terminated yet
            return Ok(HandshakeInput::Incomplete { hint: buf.len() + 16 });
        };
        if line.is_empty() {
            break;
        }
        let line = String::from_utf8_lossy(line);
        let Some((name, value)) = line.split_once(':') else {
            return Err(WsError::InvalidHeader);
        };
        handshake
            .headers_mut()
            .put(name, value.trim_start_matches(' '));
    }

    Ok(HandshakeInput::Complete {
        handshake,
        consumed: pos,
    })
}

/// Interpret the three-token start line for the given side.
fn start_line(line: &str, role: Role) -> Result<Handshake> {
    let mut tokens = line.splitn(3, ' ');
    let (Some(first), Some(second), Some(third)) = (tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(WsError::InvalidStartLine);
    };

    match role {
        Role::Server => {
            // "GET <resource> HTTP/1.1"
            if first.starts_with("HTTP/") {
                return Err(WsError::WrongHttpFunction);
            }
            let _ = third;
            Ok(Handshake::Request(Request {
                resource: second.to_owned(),
                headers: Headers::new(),
                content: None,
            }))
        }
        Role::Client => {
            // "HTTP/1.1 101 <message>"
            if !first.starts_with("HTTP/") {
                return Err(WsError::WrongHttpFunction);
            }
            let status: u16 = second.parse().map_err(|_| WsError::InvalidStartLine)?;
            if status != 101 {
                return Err(WsError::InvalidStatusCode(status));
            }
            Ok(Handshake::Response(Response {
                status_message: third.to_owned(),
                headers: Headers::new(),
                content: None,
            }))
        }
    }
}

/// Next CRLF-terminated line starting at `*pos`, without its terminator.
/// Advances `*pos` past the terminator; returns `None` when no full line is
/// buffered yet.
fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let rest = &buf[*pos..];
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    *pos += end + 2;
    Some(&rest[..end])
}
