//! Per-client read loop.
//!
//! A [`ClientHandler`] reads one line at a time, decodes it into a [`Command`] and fully
//! processes it, reply included, before reading the next one. Refused commands are answered
//! with `ERROR <detail>` and leave the connection open. `QUIT`, end of stream and read errors
//! all end the loop.

use std::io::BufRead;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::connection::Connection;
use crate::error::GameError;
use crate::protocol::{Command, ServerMessage};
use crate::registry::Registry;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Drives one [`Connection`] from its incoming lines.
pub struct ClientHandler {
    connection: Arc<Connection>,
    registry: Arc<Registry>,
}

impl ClientHandler {
    /// Handler for `connection`, logging in through `registry`.
    pub fn new(connection: Arc<Connection>, registry: Arc<Registry>) -> ClientHandler {
        ClientHandler {
            connection,
            registry,
        }
    }

    /// The handled connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Reads and handles lines until the client quits or the stream ends. On return the
    /// connection is terminated and gone from the registry.
    #[instrument(skip_all, fields(connection = self.connection.id(), peer = ?self.connection.peer()))]
    pub fn run<R: BufRead>(&self, reader: R) {
        info!("client connected");
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!(error = %e, "read failed");
                    break;
                }
            };
            if !self.connection.is_alive() || !self.handle_line(&line) {
                break;
            }
        }
        self.disconnect();
        info!(name = ?self.connection.name(), "client gone");
    }

    /// Handles a single line as if it had been read from the client. Returns false once the
    /// connection is closed.
    pub fn handle_line(&self, line: &str) -> bool {
        debug!(line, "received");
        let result = line
            .parse::<Command>()
            .map_err(GameError::from)
            .and_then(|command| self.dispatch(command));

        let flow = match result {
            Ok(flow) => flow,
            Err(e) => {
                debug!(error = %e, kind = ?e.kind(), "command refused");
                self.connection.send(&ServerMessage::Error(e.to_string()));
                Flow::Continue
            }
        };
        flow == Flow::Continue
    }

    fn dispatch(&self, command: Command) -> Result<Flow, GameError> {
        match command {
            Command::Hello { name } => {
                self.registry.register(&self.connection, name)?;
                Ok(Flow::Continue)
            }
            Command::Ready => {
                self.current_session()?.player_ready(&self.connection)?;
                Ok(Flow::Continue)
            }
            Command::Move { row, col } => {
                self.current_session()?
                    .player_move(&self.connection, row, col)?;
                Ok(Flow::Continue)
            }
            Command::Quit => {
                info!(name = ?self.connection.name(), "client quit");
                self.connection.send(&ServerMessage::Disconnect);
                self.disconnect();
                Ok(Flow::Close)
            }
        }
    }

    fn current_session(&self) -> Result<Arc<Session>, GameError> {
        self.connection.session().ok_or(GameError::NotInSession)
    }

    /// Leaves whatever the connection is part of and terminates it. Idempotent.
    fn disconnect(&self) {
        if let Some(session) = self.registry.retire(&self.connection) {
            session.quit(&self.connection, &self.registry);
        }
        self.connection.terminate();
    }
}
