//! # Tic Tac Toe Server
//!
//! A threaded TCP server that pairs remote players and referees tic-tac-toe matches over a
//! line based text protocol.
//!
//! It provides:
//! - A [`Registry`](crate::registry::Registry) of logged in players and running matches, with
//!   unique player names
//! - A background [`Matchmaker`](crate::matchmaker::Matchmaker) that pairs waiting players
//! - A per-match [`Session`](crate::session::Session) that validates moves, detects wins and
//!   draws, and announces turns
//! - A [`Server`](crate::server::Server) that accepts TCP connections and runs one
//!   [`ClientHandler`](crate::client_handler::ClientHandler) per client
//!
//! Every client gets its own OS thread, every match gets one more thread that announces
//! turns, and a single matchmaking thread wakes up on a fixed interval. All shared state is
//! guarded by `std::sync` locks.
//!
//! # Documentation Overview
//!
//! - For the wire format, see the [`protocol`] module.
//! - For server options and their environment variables, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For the rules of a match and the turn announcements, see the [`session`] module.
//! - For what a client receives when a command is refused, see the [`error`] module.
//!
//! # Usage Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tic_tac_toe_server::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new()
//!         .with_port(8080)
//!         .with_matchmaking_interval(Duration::from_millis(500));
//!
//!     // Blocks until the process is killed
//!     Server::new(config)?.run()
//! }
//! ```
//!
//! # Example Client
//!
//! ```no_run
//! use std::io::{BufRead, BufReader, Write};
//! use std::net::TcpStream;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut stream = TcpStream::connect("127.0.0.1:8080")?;
//!     let mut lines = BufReader::new(stream.try_clone()?).lines();
//!
//!     writeln!(stream, "HELLO Alice")?;
//!     while let Some(line) = lines.next() {
//!         let line = line?;
//!         println!("{line}");
//!         if line == "YOUR_TURN Alice" {
//!             writeln!(stream, "MOVE 1 1")?;
//!         }
//!         if line.starts_with("WINNER") || line == "DRAW" {
//!             writeln!(stream, "QUIT")?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use anyhow;
pub mod board;
pub mod client_handler;
pub mod configuration;
pub mod connection;
pub mod error;
mod logger;
pub mod matchmaker;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

/// Commonly used types for quick access.
///
/// ```rust
/// use tic_tac_toe_server::prelude::*;
/// ```
pub mod prelude {
    pub use crate::board::{Board, Mark};
    pub use crate::configuration::Configuration;
    pub use crate::connection::{Connection, ConnectionState};
    pub use crate::error::{ErrorKind, GameError, ProtocolError};
    pub use crate::protocol::{Command, ServerMessage};
    pub use crate::registry::Registry;
    pub use crate::server::{Server, ServerHandle};
    pub use crate::session::{Outcome, Session, SessionOptions};
}

/// Locks `mutex`, ignoring poisoning. A panicking client thread leaves shared state usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
