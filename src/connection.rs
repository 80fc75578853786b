//! One client link and its outgoing half.
//!
//! A [`Connection`] is shared between the thread reading from the client and the match it
//! plays in, which writes game events from its own thread. Writes therefore go through a
//! per-connection lock and always carry a whole line.

use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

use crate::lock;
use crate::protocol::ServerMessage;
use crate::session::Session;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outgoing half of a transport.
pub type LineWriter = Box<dyn Write + Send>;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected, no name yet.
    Unauthenticated,
    /// Named and queued for matchmaking.
    Waiting,
    /// Named, back from a finished match and not queued. `HELLO` queues it again.
    Idle,
    /// Playing a match.
    InSession,
    /// Gone. Nothing is read from or written to it anymore.
    Terminated,
}

/// A client link.
pub struct Connection {
    id: u64,
    peer: Option<SocketAddr>,
    name: Mutex<Option<String>>,
    ready: AtomicBool,
    alive: AtomicBool,
    writer: Mutex<LineWriter>,
    transport: Option<TcpStream>,
    session: Mutex<Option<Arc<Session>>>,
}

impl Connection {
    /// Wraps an arbitrary writer. Terminating such a connection only stops further writes.
    pub fn new(writer: LineWriter) -> Connection {
        Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer: None,
            name: Mutex::new(None),
            ready: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            writer: Mutex::new(writer),
            transport: None,
            session: Mutex::new(None),
        }
    }

    /// Wraps an accepted TCP stream. Terminating the connection shuts the socket down, which
    /// also wakes up whoever is blocked reading from it.
    pub fn from_stream(stream: &TcpStream) -> io::Result<Connection> {
        let mut connection = Connection::new(Box::new(stream.try_clone()?));
        connection.peer = stream.peer_addr().ok();
        connection.transport = Some(stream.try_clone()?);
        Ok(connection)
    }

    /// Process-unique id, used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address, if this is a TCP connection.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Name given at login.
    pub fn name(&self) -> Option<String> {
        lock(&self.name).clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *lock(&self.name) = Some(name);
    }

    /// True while logged in and either queued or playing.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// False once [`terminate`](Self::terminate) was called.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Match this connection currently plays in.
    pub fn session(&self) -> Option<Arc<Session>> {
        lock(&self.session).clone()
    }

    pub(crate) fn set_session(&self, session: Option<Arc<Session>>) {
        *lock(&self.session) = session;
    }

    /// Clears the session slot if it still points at the match with id `session_id`.
    pub(crate) fn leave_session(&self, session_id: u64) -> bool {
        let mut slot = lock(&self.session);
        if slot.as_ref().is_some_and(|s| s.id() == session_id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        if !self.is_alive() {
            ConnectionState::Terminated
        } else if self.session().is_some() {
            ConnectionState::InSession
        } else if self.name().is_none() {
            ConnectionState::Unauthenticated
        } else if self.is_ready() {
            ConnectionState::Waiting
        } else {
            ConnectionState::Idle
        }
    }

    /// Writes one line. Failures are logged and otherwise ignored: a broken transport shows
    /// up on the reading side, which handles it as a disconnection.
    pub fn send(&self, message: &ServerMessage) {
        if !self.is_alive() {
            trace!(connection = self.id, %message, "dropping message for terminated connection");
            return;
        }

        let line = format!("{message}\n");
        let mut writer = lock(&self.writer);
        let result = writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.flush());
        match result {
            Ok(()) => debug!(connection = self.id, %message, "sent"),
            Err(e) => warn!(connection = self.id, %message, error = %e, "could not send message"),
        }
    }

    /// Marks the connection as gone without touching its transport. Returns false if it
    /// already was.
    pub(crate) fn close(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Marks the connection as gone and closes its transport. Idempotent.
    pub fn terminate(&self) {
        let was_alive = self.close();
        self.set_ready(false);
        self.set_session(None);
        if let Some(stream) = &self.transport {
            // the peer may already be gone
            let _ = stream.shutdown(Shutdown::Both);
        }
        if was_alive {
            debug!(connection = self.id, name = ?self.name(), "terminated");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}#{}", self.id),
            None => write!(f, "#{}", self.id),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    use super::Connection;

    /// Collects everything written to a connection.
    #[derive(Clone, Default)]
    pub struct MemoryWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for MemoryWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl MemoryWriter {
        /// Lines written so far, emptying the buffer.
        pub fn take_lines(&self) -> Vec<String> {
            let bytes = std::mem::take(&mut *self.0.lock().unwrap());
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(str::to_owned)
                .collect()
        }
    }

    pub fn connection() -> (Arc<Connection>, MemoryWriter) {
        let writer = MemoryWriter::default();
        let connection = Arc::new(Connection::new(Box::new(writer.clone())));
        (connection, writer)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::testing::connection;
    use super::*;

    #[test]
    fn lifecycle_states() {
        let (conn, _out) = connection();
        assert_eq!(conn.state(), ConnectionState::Unauthenticated);
        conn.set_name("Alice".to_string());
        conn.set_ready(true);
        assert_eq!(conn.state(), ConnectionState::Waiting);
        conn.set_ready(false);
        assert_eq!(conn.state(), ConnectionState::Idle);
        conn.terminate();
        assert_eq!(conn.state(), ConnectionState::Terminated);
        assert!(!conn.is_ready());
    }

    #[test]
    fn send_writes_whole_lines_until_terminated() {
        let (conn, out) = connection();
        conn.send(&ServerMessage::Welcome("Alice".into()));
        conn.send(&ServerMessage::Draw);
        assert_eq!(out.take_lines(), vec!["WELCOME Alice", "DRAW"]);

        conn.terminate();
        conn.terminate();
        conn.send(&ServerMessage::Draw);
        assert!(out.take_lines().is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let (a, _) = connection();
        let (b, _) = connection();
        assert_ne!(a.id(), b.id());
        assert_eq!(format!("{a}"), format!("#{}", a.id()));
    }

    #[test]
    fn concurrent_sends_never_interleave() {
        let (conn, out) = connection();
        let senders: Vec<_> = (0..8)
            .map(|t| {
                let conn = Arc::clone(&conn);
                thread::spawn(move || {
                    for i in 0..200 {
                        conn.send(&ServerMessage::Move {
                            name: format!("player{t}"),
                            row: i % 3,
                            col: t % 3,
                        });
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }

        let lines = out.take_lines();
        assert_eq!(lines.len(), 8 * 200);
        for line in &lines {
            let parts: Vec<&str> = line.split(' ').collect();
            assert_eq!(parts.len(), 4, "torn line '{line}'");
            assert_eq!(parts[0], "MOVE");
            let t: usize = parts[1].strip_prefix("player").unwrap().parse().unwrap();
            assert!(parts[2].parse::<usize>().unwrap() < 3);
            assert_eq!(parts[3].parse::<usize>().unwrap(), t % 3);
        }
    }
}
