//! A broadcast chat server.
//!
//! Every text message a client sends is forwarded to every connected
//! client, and lines typed on stdin are broadcast too. Clients speaking
//! either framing generation can join.
//!
//! ```sh
//! cargo run --example chat
//! websocat ws://127.0.0.1:9001/
//! ```
//!
//! Type `exit` to stop the server.

use std::io::BufRead;
use std::sync::{Arc, Mutex};

use wsmill::{CloseSignal, Conn, Listener, Server, WsError};

struct Chat {
    peers: Mutex<Vec<Conn>>,
}

impl Chat {
    fn broadcast(&self, text: &str) {
        for peer in self.peers.lock().unwrap().iter() {
            // a peer mid-close simply misses the message
            let _ = peer.send_text(text);
        }
    }
}

impl Listener for Chat {
    fn on_open(&self, conn: &Conn) {
        log::info!(
            "{:?} joined on {:?}",
            conn.peer_addr(),
            conn.resource()
        );
        self.peers.lock().unwrap().push(conn.clone());
        self.broadcast("someone joined the room");
    }

    fn on_close(&self, conn: &Conn, signal: &CloseSignal) {
        self.peers.lock().unwrap().retain(|p| !Arc::ptr_eq(p, conn));
        log::info!(
            "{:?} left: {} {:?}",
            conn.peer_addr(),
            signal.code,
            signal.reason
        );
        self.broadcast("someone left the room");
    }

    fn on_message(&self, _conn: &Conn, text: &str) {
        self.broadcast(text);
    }

    fn on_error(&self, conn: Option<&Conn>, error: &WsError) {
        log::warn!(
            "error on {:?}: {error}",
            conn.and_then(|c| c.peer_addr())
        );
    }
}

fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Info)?;

    let chat = Arc::new(Chat {
        peers: Mutex::new(Vec::new()),
    });
    let mut server = Server::bind("127.0.0.1:9001".parse()?, chat.clone())?;
    log::info!("chat server listening on {}", server.local_addr());
    log::info!("type a message to broadcast it, or \"exit\" to stop");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line == "exit" {
            break;
        }
        chat.broadcast(&line);
    }
    server.stop();
    Ok(())
}
