//! The threaded server engine.
//!
//! One selector thread owns the poll instance and every socket syscall: it
//! accepts connections, reads ready sockets into pooled buffers and drains
//! outgoing queues. Decoding and application callbacks run on a small fixed
//! pool of worker threads; each connection is bound to one worker for life,
//! so its parse state is single-writer and its messages arrive in order.
//!
//! Backpressure comes from the buffer pool: when all buffers are loaned out
//! to in-flight decode jobs, the selector blocks before its next read and
//! the kernel's socket buffers slow the peers down.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;

use crate::close::CloseCode;
use crate::codec::Variant;
use crate::frame::FrameView;
use crate::handshake::{Request, Response};
use crate::io::{read_into, write_batch, PlainSocketFactory, SocketFactory};
use crate::listener::{Listener, Rejection};
use crate::pool::BufferPool;
use crate::session::{CloseSignal, Conn, Session, UNASSIGNED};
use crate::{Limits, Result, Role, WsError};

/// Conventional `ws://` port, for callers that build their own address.
pub const DEFAULT_PORT: u16 = 80;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
/// Tokens below this are reserved for the listener and the waker.
const FIRST_CONNECTION: usize = 2;
const MAX_EVENTS: usize = 128;
/// Upper bound on how long commands can sit unprocessed if a wakeup is lost.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Tuning knobs for [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Decode worker threads. Defaults to the available parallelism minus
    /// one (the selector thread), with a floor of one.
    pub workers: usize,
    /// Capacity of each pooled read buffer.
    pub read_buffer_size: usize,
    /// Per-connection protocol limits.
    pub limits: Limits,
}

impl ServerConfig {
    /// Sets the number of decode worker threads.
    pub fn with_workers(self, workers: usize) -> Self {
        ServerConfig { workers, ..self }
    }

    /// Sets the capacity of each pooled read buffer.
    pub fn with_read_buffer_size(self, read_buffer_size: usize) -> Self {
        ServerConfig {
            read_buffer_size,
            ..self
        }
    }

    /// Sets the per-connection protocol limits.
    pub fn with_limits(self, limits: Limits) -> Self {
        ServerConfig { limits, ..self }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let parallelism = thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        ServerConfig {
            workers: parallelism.saturating_sub(1).max(1),
            read_buffer_size: 8192,
            limits: Limits::default(),
        }
    }
}

/// Control messages into the selector thread.
enum Command {
    /// A connection queued outgoing bytes; drain them and watch for
    /// writability if the transport backpressures.
    WriteDemand(usize),
    /// A connection finished closing; forget it.
    Retire(usize),
    /// Leave the poll loop and sweep up.
    Shutdown,
}

type Job = (Conn, BytesMut);

/// A listening WebSocket server.
///
/// Accepted connections speak whichever framing variant their handshake
/// negotiates and report to the application [`Listener`] passed at bind
/// time. Dropping the server stops it.
pub struct Server {
    local_addr: SocketAddr,
    cmd_tx: Sender<Command>,
    waker: Arc<Waker>,
    connections: Arc<Mutex<Vec<Conn>>>,
    selector: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    stopped: AtomicBool,
}

impl Server {
    /// Bind `addr` and start serving with default tuning and a cleartext
    /// transport.
    pub fn bind(addr: SocketAddr, app: Arc<dyn Listener>) -> Result<Server> {
        Self::bind_with(addr, app, ServerConfig::default(), Arc::new(PlainSocketFactory))
    }

    /// Bind `addr` with explicit tuning and a channel factory.
    ///
    /// The factory wraps every accepted stream exactly once before any byte
    /// is exchanged; this is where a transport-encryption layer slots in.
    pub fn bind_with(
        addr: SocketAddr,
        app: Arc<dyn Listener>,
        config: ServerConfig,
        factory: Arc<dyn SocketFactory>,
    ) -> Result<Server> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let (cmd_tx, cmd_rx) = unbounded();
        let connections = Arc::new(Mutex::new(Vec::new()));
        let engine = Arc::new(EngineListener {
            app,
            cmd_tx: cmd_tx.clone(),
            waker: waker.clone(),
            connections: connections.clone(),
        });

        let worker_count = config.workers.max(1);
        let pool = BufferPool::new(config.read_buffer_size, 2 * worker_count + 1);

        let mut job_txs = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let (job_tx, job_rx) = unbounded::<Job>();
            job_txs.push(job_tx);
            let pool = pool.clone();
            let handle = thread::Builder::new()
                .name(format!("wsmill-worker-{index}"))
                .spawn(move || worker_loop(job_rx, pool))?;
            workers.push(handle);
        }

        let mut event_loop = EventLoop {
            poll,
            listener,
            engine,
            factory,
            limits: config.limits,
            pool,
            job_txs,
            cmd_rx,
            arena: HashMap::new(),
            next_token: FIRST_CONNECTION,
            next_worker: 0,
            shutdown: false,
        };
        let selector = thread::Builder::new()
            .name("wsmill-select".to_owned())
            .spawn(move || event_loop.run())?;

        #[cfg(feature = "logging")]
        log::info!("listening on {local_addr}");

        Ok(Server {
            local_addr,
            cmd_tx,
            waker,
            connections,
            selector: Some(selector),
            workers,
            stopped: AtomicBool::new(false),
        })
    }

    /// The address actually bound; useful after binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of the currently open connections.
    pub fn connections(&self) -> Vec<Conn> {
        self.connections.lock().clone()
    }

    /// Close every connection with a "going away" signal and stop all
    /// threads. Idempotent; returns once everything is joined.
    pub fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        #[cfg(feature = "logging")]
        log::info!("stopping server on {}", self.local_addr);

        for conn in self.connections() {
            conn.close(CloseCode::GoingAway, "server shutting down");
        }
        if self.cmd_tx.send(Command::Shutdown).is_ok() {
            let _ = self.waker.wake();
        }
        // the selector drains the queued close frames, sweeps the arena and
        // drops the job senders, which retires the workers
        if let Some(selector) = self.selector.take() {
            let _ = selector.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hand a filled buffer to a worker queue. A disconnected queue means the
/// workers are retiring; the buffer goes back to the pool instead of
/// vanishing with the send error.
fn dispatch_job(tx: &Sender<Job>, pool: &BufferPool, conn: Conn, buf: BytesMut) -> bool {
    match tx.send((conn, buf)) {
        Ok(()) => true,
        Err(err) => {
            pool.release(err.into_inner().1);
            false
        }
    }
}

fn worker_loop(jobs: Receiver<Job>, pool: BufferPool) {
    while let Ok((conn, buf)) = jobs.recv() {
        // a panic must not take the worker down with it
        let outcome = catch_unwind(AssertUnwindSafe(|| conn.receive(&buf)));
        if outcome.is_err() {
            #[cfg(feature = "logging")]
            log::error!("decode worker caught a panic while receiving");
        }
        pool.release(buf);
    }
}

/// Sits between the sessions and the application listener: bookkeeping
/// callbacks are absorbed or mirrored into selector commands, the rest pass
/// straight through.
struct EngineListener {
    app: Arc<dyn Listener>,
    cmd_tx: Sender<Command>,
    waker: Arc<Waker>,
    connections: Arc<Mutex<Vec<Conn>>>,
}

impl EngineListener {
    fn command(&self, command: Command) {
        if self.cmd_tx.send(command).is_ok() {
            let _ = self.waker.wake();
        }
    }
}

impl Listener for EngineListener {
    fn on_open(&self, conn: &Conn) {
        self.connections.lock().push(conn.clone());
        self.app.on_open(conn);
    }

    fn on_close(&self, conn: &Conn, signal: &CloseSignal) {
        self.command(Command::Retire(conn.token()));
        self.connections.lock().retain(|c| !Arc::ptr_eq(c, conn));
        self.app.on_close(conn, signal);
    }

    fn on_message(&self, conn: &Conn, text: &str) {
        self.app.on_message(conn, text);
    }

    fn on_message_binary(&self, conn: &Conn, data: Bytes) {
        self.app.on_message_binary(conn, data);
    }

    fn on_ping(&self, conn: &Conn, frame: &FrameView) {
        self.app.on_ping(conn, frame);
    }

    fn on_pong(&self, conn: &Conn, frame: &FrameView) {
        self.app.on_pong(conn, frame);
    }

    fn on_close_initiated(&self, conn: &Conn, code: CloseCode, reason: &str) {
        self.app.on_close_initiated(conn, code, reason);
    }

    fn on_closing(&self, conn: &Conn, signal: &CloseSignal) {
        self.app.on_closing(conn, signal);
    }

    fn on_write_demand(&self, conn: &Conn) {
        // engine concern; the application never needs to see it
        self.command(Command::WriteDemand(conn.token()));
    }

    fn on_error(&self, conn: Option<&Conn>, error: &WsError) {
        self.app.on_error(conn, error);
    }

    fn on_handshake_received(
        &self,
        conn: &Conn,
        variant: Variant,
        request: &Request,
    ) -> std::result::Result<Response, Rejection> {
        self.app.on_handshake_received(conn, variant, request)
    }
}

/// State owned by the selector thread.
struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    engine: Arc<EngineListener>,
    factory: Arc<dyn SocketFactory>,
    limits: Limits,
    pool: BufferPool,
    job_txs: Vec<Sender<Job>>,
    cmd_rx: Receiver<Command>,
    /// Live connections by poll token.
    arena: HashMap<usize, Conn>,
    next_token: usize,
    next_worker: usize,
    shutdown: bool,
}

impl EventLoop {
    fn run(&mut self) {
        let mut events = Events::with_capacity(MAX_EVENTS);
        while !self.shutdown {
            if let Err(err) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.fatal(err);
                break;
            }
            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_ready(),
                    WAKER => {}
                    token => {
                        self.connection_ready(token.0, event.is_readable(), event.is_writable())
                    }
                }
            }
            self.drain_commands();
        }
        self.sweep();
    }

    /// A selector-level failure nobody can recover from: report it and shut
    /// the whole server down in order.
    fn fatal(&mut self, err: io::Error) {
        #[cfg(feature = "logging")]
        log::error!("selector failed: {err}");
        self.engine.on_error(None, &WsError::Io(err));
        self.shutdown = true;
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.cmd_rx.try_recv() {
            match command {
                Command::WriteDemand(token) => {
                    if let Some(conn) = self.arena.get(&token).cloned() {
                        self.write_ready(&conn);
                    }
                }
                Command::Retire(token) => self.remove(token),
                Command::Shutdown => self.shutdown = true,
            }
        }
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    if let Err(err) = self.install(stream, peer_addr) {
                        self.engine.on_error(None, &WsError::Io(err));
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.engine.on_error(None, &WsError::Io(err));
                    break;
                }
            }
        }
    }

    /// Wrap, register and remember a freshly accepted stream.
    fn install(&mut self, stream: TcpStream, peer_addr: SocketAddr) -> io::Result<()> {
        let local_addr = stream.local_addr().ok();
        let mut channel = self.factory.wrap(stream)?;
        let token = self.next_token;
        self.next_token += 1;
        self.poll
            .registry()
            .register(channel.stream(), Token(token), Interest::READABLE)?;

        let listener: Arc<dyn Listener> = self.engine.clone();
        let conn = Session::with_addresses(
            Role::Server,
            listener,
            self.limits,
            local_addr,
            Some(peer_addr),
        );
        conn.bind_token(token);
        conn.attach_channel(channel);
        self.arena.insert(token, conn);
        #[cfg(feature = "logging")]
        log::debug!("accepted {peer_addr} as token {token}");
        Ok(())
    }

    fn connection_ready(&mut self, token: usize, readable: bool, writable: bool) {
        let Some(conn) = self.arena.get(&token).cloned() else {
            return;
        };
        if readable {
            self.read_ready(&conn);
        }
        if writable && self.arena.contains_key(&token) {
            self.write_ready(&conn);
        }
    }

    /// Read until the socket runs dry, shipping each buffer to the
    /// connection's decode worker.
    ///
    /// The pool acquire may block; that is the backpressure valve. No locks
    /// are held while blocked.
    fn read_ready(&mut self, conn: &Conn) {
        loop {
            let Some(mut buf) = self.pool.acquire() else {
                return;
            };
            match conn.with_channel(|channel| read_into(channel, &mut buf)) {
                None => {
                    // torn down under us
                    self.pool.release(buf);
                    self.remove(conn.token());
                    return;
                }
                Some(Ok(0)) => {
                    self.pool.release(buf);
                    conn.eot();
                    self.remove(conn.token());
                    return;
                }
                Some(Ok(_)) => {
                    let worker = self.assign_worker(conn);
                    if !dispatch_job(&self.job_txs[worker], &self.pool, conn.clone(), buf) {
                        return;
                    }
                }
                Some(Err(err)) if err.kind() == io::ErrorKind::WouldBlock => {
                    let buffered = conn.with_channel(|c| c.pending_read()).unwrap_or(false);
                    self.pool.release(buf);
                    if buffered {
                        continue;
                    }
                    return;
                }
                Some(Err(err)) if err.kind() == io::ErrorKind::Interrupted => {
                    self.pool.release(buf);
                    continue;
                }
                Some(Err(err)) => {
                    self.pool.release(buf);
                    conn.transport_error(err);
                    self.remove(conn.token());
                    return;
                }
            }
        }
    }

    /// First-touch sticky assignment: the first buffer decides the worker,
    /// everything after follows it.
    fn assign_worker(&mut self, conn: &Conn) -> usize {
        let slot = conn.worker_slot();
        if slot != UNASSIGNED {
            return slot;
        }
        let slot = self.next_worker % self.job_txs.len();
        self.next_worker = self.next_worker.wrapping_add(1);
        conn.bind_worker(slot);
        slot
    }

    fn write_ready(&mut self, conn: &Conn) {
        match write_batch(conn) {
            Ok(true) => {
                if conn.is_closed() {
                    self.remove(conn.token());
                } else {
                    let registry = self.poll.registry();
                    let _ = conn.with_channel(|channel| {
                        registry.reregister(channel.stream(), Token(conn.token()), Interest::READABLE)
                    });
                }
            }
            Ok(false) => {
                let registry = self.poll.registry();
                let _ = conn.with_channel(|channel| {
                    registry.reregister(
                        channel.stream(),
                        Token(conn.token()),
                        Interest::READABLE | Interest::WRITABLE,
                    )
                });
            }
            Err(err) => {
                conn.transport_error(err);
                self.remove(conn.token());
            }
        }
    }

    fn remove(&mut self, token: usize) {
        if let Some(conn) = self.arena.remove(&token) {
            let registry = self.poll.registry();
            let _ = conn.with_channel(|channel| registry.deregister(channel.stream()));
        }
    }

    /// Final pass on the way out: give every live connection a close frame,
    /// one last drain, then force the teardown.
    fn sweep(&mut self) {
        let live: Vec<Conn> = self.arena.values().cloned().collect();
        for conn in live {
            conn.close(CloseCode::GoingAway, "server shutting down");
            let _ = write_batch(&conn);
            conn.close_transport(CloseCode::GoingAway, "server shutting down");
        }
        self.arena.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdStream;
    use std::time::Duration;

    struct Echo;

    impl Listener for Echo {
        fn on_message(&self, conn: &Conn, text: &str) {
            let _ = conn.send_text(text);
        }
    }

    struct Doorman;

    impl Listener for Doorman {
        fn on_handshake_received(
            &self,
            _conn: &Conn,
            _variant: Variant,
            _request: &Request,
        ) -> std::result::Result<Response, Rejection> {
            Err(Rejection::new(CloseCode::Policy, "members only"))
        }
    }

    fn bind_echo() -> Server {
        Server::bind("127.0.0.1:0".parse().unwrap(), Arc::new(Echo)).unwrap()
    }

    fn connect(server: &Server) -> StdStream {
        let stream = StdStream::connect(server.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn upgrade(stream: &mut StdStream) {
        stream
            .write_all(
                b"GET /chat HTTP/1.1\r\n\
                  Host: localhost\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Version: 13\r\n\r\n",
            )
            .unwrap();
        read_head(stream);
    }

    /// Read and discard the handshake response head.
    fn read_head(stream: &mut StdStream) -> Vec<u8> {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut byte).unwrap();
            assert!(n > 0, "eof inside the handshake response");
            head.push(byte[0]);
        }
        head
    }

    fn read_exactly(stream: &mut StdStream, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        stream.read_exact(&mut out).unwrap();
        out
    }

    /// A masked client frame with a fixed key.
    fn masked(opcode: u8, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() <= 125);
        let key = [0x11, 0x22, 0x33, 0x44];
        let mut out = vec![0x80 | opcode, 0x80 | payload.len() as u8];
        out.extend_from_slice(&key);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        out
    }

    #[test]
    fn echoes_a_text_message_over_loopback() {
        let mut server = bind_echo();
        let mut client = connect(&server);
        upgrade(&mut client);

        client.write_all(&masked(0x1, b"hello")).unwrap();
        assert_eq!(
            read_exactly(&mut client, 7),
            [0x81, 0x05, b'h', b'e', b'l', b'l', b'o']
        );
        server.stop();
    }

    #[test]
    fn close_handshake_completes_and_drops_the_transport() {
        let mut server = bind_echo();
        let mut client = connect(&server);
        upgrade(&mut client);

        client
            .write_all(&masked(0x8, &1000u16.to_be_bytes()))
            .unwrap();
        // the answering close frame, then a clean eof
        assert_eq!(read_exactly(&mut client, 4), [0x88, 0x02, 0x03, 0xe8]);
        let mut rest = [0u8; 1];
        assert_eq!(client.read(&mut rest).unwrap(), 0);
        server.stop();
    }

    #[test]
    fn each_connection_keeps_its_own_order() {
        let mut server = bind_echo();
        let mut alice = connect(&server);
        let mut bob = connect(&server);
        upgrade(&mut alice);
        upgrade(&mut bob);

        for round in 0..8 {
            let a = format!("alice-{round}");
            let b = format!("bob-{round}");
            alice.write_all(&masked(0x1, a.as_bytes())).unwrap();
            bob.write_all(&masked(0x1, b.as_bytes())).unwrap();

            let echoed = read_exactly(&mut alice, 2 + a.len());
            assert_eq!(&echoed[2..], a.as_bytes());
            let echoed = read_exactly(&mut bob, 2 + b.len());
            assert_eq!(&echoed[2..], b.as_bytes());
        }
        server.stop();
    }

    #[test]
    fn legacy_clients_get_delimited_echoes() {
        let mut server = bind_echo();
        let mut client = connect(&server);
        client
            .write_all(
                b"GET / HTTP/1.1\r\n\
                  Host: localhost\r\n\
                  Upgrade: WebSocket\r\n\
                  Connection: Upgrade\r\n\
                  Origin: http://localhost\r\n\r\n",
            )
            .unwrap();
        let head = read_head(&mut client);
        let head = String::from_utf8_lossy(&head).into_owned();
        assert!(head.contains("WebSocket-Location: ws://localhost/\r\n"));

        client.write_all(&[0x00, b'h', b'i', 0xFF]).unwrap();
        assert_eq!(read_exactly(&mut client, 4), [0x00, b'h', b'i', 0xFF]);
        server.stop();
    }

    #[test]
    fn rejected_handshakes_get_no_response() {
        let mut server =
            Server::bind("127.0.0.1:0".parse().unwrap(), Arc::new(Doorman)).unwrap();
        let mut client = connect(&server);
        client
            .write_all(
                b"GET / HTTP/1.1\r\n\
                  Host: localhost\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Version: 13\r\n\r\n",
            )
            .unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty(), "a rejected peer gets nothing back");
        server.stop();
    }

    #[test]
    fn stop_announces_going_away_and_is_idempotent() {
        let mut server = bind_echo();
        let mut client = connect(&server);
        upgrade(&mut client);
        // one round trip so the connection is certainly registered open
        client.write_all(&masked(0x1, b"hi")).unwrap();
        read_exactly(&mut client, 4);

        server.stop();
        server.stop();

        let frame = read_exactly(&mut client, 4);
        assert_eq!(frame[0], 0x88);
        assert_eq!(&frame[2..4], &1001u16.to_be_bytes());
        // reason text, then eof
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert_eq!(&rest, b"server shutting down");
    }

    #[test]
    fn config_setters_override_the_defaults() {
        let config = ServerConfig::default()
            .with_workers(3)
            .with_read_buffer_size(1024)
            .with_limits(Limits::default().with_max_payload_len(64));
        assert_eq!(config.workers, 3);
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.limits.max_payload_len, 64);
    }

    #[test]
    fn a_retired_worker_queue_returns_the_buffer_to_the_pool() {
        let pool = BufferPool::new(16, 1);
        let (tx, rx) = unbounded::<Job>();
        drop(rx);

        let conn = Session::new(Role::Server, Arc::new(Echo), Limits::default());
        let buf = pool.acquire().unwrap();
        assert!(!dispatch_job(&tx, &pool, conn, buf));

        // the pool kept its only buffer; a shrunken pool would block here
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn connections_lists_open_sessions() {
        let mut server = bind_echo();
        let mut client = connect(&server);
        upgrade(&mut client);
        client.write_all(&masked(0x1, b"hi")).unwrap();
        read_exactly(&mut client, 4);

        let connections = server.connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].resource(), "/chat");
        assert!(connections[0].peer_addr().is_some());
        server.stop();
    }
}
