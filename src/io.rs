//! Transport plumbing: the channel seam and the non-blocking read/write
//! helpers the server engine drives.
//!
//! A [`Channel`] is what a connection reads from and writes to. The default
//! is a bare TCP stream; a [`SocketFactory`] may substitute a wrapped
//! channel (for transport encryption and the like) once, at accept time,
//! before any read or write occurs.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;

use crate::session::Conn;
use crate::Role;

/// A bidirectional byte channel over a non-blocking TCP stream.
///
/// Wrappers that buffer internally (a TLS layer, say) report leftover work
/// through [`pending_read`](Channel::pending_read) and
/// [`pending_write`](Channel::pending_write) so the event loop knows the
/// socket-level readiness did not tell the whole story.
pub trait Channel: Read + Write + Send {
    /// The underlying stream, for poll registration.
    fn stream(&mut self) -> &mut TcpStream;

    /// Whether more input is buffered inside the wrapper and another read
    /// should happen even without socket readiness.
    fn pending_read(&self) -> bool {
        false
    }

    /// Whether output is still buffered inside the wrapper after a write.
    fn pending_write(&self) -> bool {
        false
    }

    /// Push internally buffered output toward the stream.
    fn flush_more(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A cleartext channel: reads and writes go straight to the stream.
#[derive(Debug)]
pub struct PlainChannel {
    stream: TcpStream,
}

impl PlainChannel {
    pub fn new(stream: TcpStream) -> Self {
        PlainChannel { stream }
    }
}

impl Read for PlainChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for PlainChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Channel for PlainChannel {
    fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

/// Decorates freshly accepted streams into [`Channel`]s.
///
/// Called exactly once per connection, before the stream is registered for
/// readiness. Returning an error refuses the connection.
pub trait SocketFactory: Send + Sync {
    fn wrap(&self, stream: TcpStream) -> io::Result<Box<dyn Channel>>;
}

/// The default factory: no decoration.
#[derive(Debug, Default)]
pub struct PlainSocketFactory;

impl SocketFactory for PlainSocketFactory {
    fn wrap(&self, stream: TcpStream) -> io::Result<Box<dyn Channel>> {
        Ok(Box::new(PlainChannel::new(stream)))
    }
}

/// One non-blocking read into `buf`, using its whole capacity.
///
/// Returns the byte count straight from the channel; `Ok(0)` means
/// end-of-stream and the caller runs the connection's EOT handling.
pub(crate) fn read_into(channel: &mut Box<dyn Channel>, buf: &mut BytesMut) -> io::Result<usize> {
    buf.resize(buf.capacity(), 0);
    let n = channel.read(&mut buf[..])?;
    buf.truncate(n);
    Ok(n)
}

/// Drain the connection's outgoing queue into its channel.
///
/// Writes queued buffers in order, dropping each once fully written, until
/// the queue empties or the transport backpressures. The whole queue is
/// drained per call; fairness across connections is traded for per-connection
/// throughput. Returns `Ok(true)` when nothing is left to write, `Ok(false)`
/// when a writable-readiness registration should continue the job.
///
/// When the queue empties on a server-role connection that is flushing
/// toward a close, this is the point where the deferred teardown runs.
pub(crate) fn write_batch(conn: &Conn) -> io::Result<bool> {
    let mut channel_guard = conn.channel().lock();
    let Some(channel) = channel_guard.as_mut() else {
        // already torn down
        return Ok(true);
    };

    let mut queue = conn.out_queue().lock();
    while let Some(front) = queue.front_mut() {
        match channel.write(front) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                front.advance(n);
                if front.is_empty() {
                    queue.pop_front();
                }
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    drop(queue);

    channel.flush_more()?;
    if channel.pending_write() {
        return Ok(false);
    }
    drop(channel_guard);

    if conn.is_flushing() && conn.role() == Role::Server && !conn.has_buffered_data() {
        conn.teardown_recorded();
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Listener;
    use crate::session::Session;
    use crate::{CloseCode, Limits};
    use std::io::Read as _;
    use std::net::{TcpListener as StdListener, TcpStream as StdStream};
    use std::sync::Arc;
    use std::time::Duration;

    struct Quiet;
    impl Listener for Quiet {}

    /// A connected (peer, channel) pair over loopback.
    fn socket_pair() -> (StdStream, Box<dyn Channel>) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let peer = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let channel = PlainSocketFactory
            .wrap(TcpStream::from_std(accepted))
            .unwrap();
        (peer, channel)
    }

    const UPGRADE: &[u8] = b"GET / HTTP/1.1\r\n\
        Host: example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    fn open_connection() -> (StdStream, Conn) {
        let (peer, channel) = socket_pair();
        let conn = Session::new(Role::Server, Arc::new(Quiet), Limits::default());
        conn.attach_channel(channel);
        conn.receive(UPGRADE);
        assert!(conn.is_open());
        (peer, conn)
    }

    #[test]
    fn read_into_truncates_to_what_arrived() {
        let (mut peer, mut channel) = socket_pair();
        peer.write_all(b"hello").unwrap();

        let mut buf = BytesMut::with_capacity(64);
        // wait for delivery; loopback is fast but not instantaneous
        let n = loop {
            match read_into(&mut channel, &mut buf) {
                Ok(n) => break n,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(err) => panic!("read failed: {err}"),
            }
        };
        assert_eq!(n, 5);
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn read_into_reports_would_block_when_idle() {
        let (_peer, mut channel) = socket_pair();
        let mut buf = BytesMut::with_capacity(64);
        let err = read_into(&mut channel, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn write_batch_drains_the_queue_in_order() {
        let (mut peer, conn) = open_connection();
        conn.send_text("one").unwrap();
        conn.send_text("two").unwrap();

        assert!(write_batch(&conn).unwrap());
        assert!(!conn.has_buffered_data());

        // handshake response, then both frames, in queue order
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut received = Vec::new();
        let mut chunk = [0u8; 4096];
        while !received.ends_with(&[0x81, 0x03, b't', b'w', b'o']) {
            let n = peer.read(&mut chunk).unwrap();
            assert!(n > 0, "peer hit eof before both frames arrived");
            received.extend_from_slice(&chunk[..n]);
        }
        let tail_at = received.len() - 10;
        assert_eq!(
            &received[tail_at..],
            &[0x81, 0x03, b'o', b'n', b'e', 0x81, 0x03, b't', b'w', b'o']
        );
    }

    #[test]
    fn write_batch_backpressures_instead_of_blocking() {
        let (_peer, conn) = open_connection();
        // far more than any loopback socket buffer will take in one go,
        // with the peer never reading
        let big = vec![0u8; 8 * 1024 * 1024];
        conn.send_binary(&big).unwrap();

        let mut saw_backpressure = false;
        for _ in 0..64 {
            if !write_batch(&conn).unwrap() {
                saw_backpressure = true;
                break;
            }
        }
        assert!(saw_backpressure);
        assert!(conn.has_buffered_data());
    }

    #[test]
    fn write_batch_completes_a_deferred_close() {
        let (mut peer, conn) = open_connection();
        conn.close(CloseCode::Normal, "bye");
        assert!(conn.is_closing());

        assert!(write_batch(&conn).unwrap());
        assert!(conn.is_closed(), "empty queue plus flushing means teardown");

        // the close frame made it out before the transport dropped
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut received = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match peer.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(err) => panic!("peer read failed: {err}"),
            }
        }
        let close_at = received.len() - 7;
        assert_eq!(&received[close_at..close_at + 4], &[0x88, 0x05, 0x03, 0xe8]);
        assert_eq!(&received[close_at + 4..], b"bye");
    }

    #[test]
    fn write_batch_on_a_torn_down_connection_is_a_no_op() {
        let (_peer, conn) = open_connection();
        conn.close_transport(CloseCode::Abnormal, "gone");
        assert!(write_batch(&conn).unwrap());
    }
}
