//! Errors reported back to a client as `ERROR <detail>`.
//!
//! None of these end a connection. The [`Display`](std::fmt::Display) text of each variant is
//! the exact detail written on the wire, so keep it short and lower case.

use thiserror::Error;

/// A line that could not be decoded into a [`Command`](crate::protocol::Command).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Blank line.
    #[error("empty command")]
    Empty,

    /// First token is not a known keyword.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Known keyword with too few arguments.
    #[error("{command} requires {expected}")]
    MissingArgument {
        /// Keyword that was sent.
        command: &'static str,
        /// Human readable description of what is missing.
        expected: &'static str,
    },

    /// `MOVE` argument that is not a non-negative integer.
    #[error("invalid coordinate '{0}'")]
    InvalidCoordinate(String),

    /// `HELLO` argument that is not an acceptable player name.
    #[error("invalid name '{0}'")]
    InvalidName(String),
}

/// Everything that can go wrong while handling a decoded command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
    /// The line itself was malformed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Coordinates outside the board.
    #[error("position ({row}, {col}) is outside the board")]
    OutOfBounds {
        /// Requested row.
        row: usize,
        /// Requested column.
        col: usize,
    },

    /// Target cell already carries a mark.
    #[error("cell ({row}, {col}) is already occupied")]
    Occupied {
        /// Requested row.
        row: usize,
        /// Requested column.
        col: usize,
    },

    /// The sender is not the turn holder.
    #[error("not your move")]
    NotYourTurn,

    /// Login with a name held by another waiting or playing connection.
    #[error("name '{0}' is already in use")]
    DuplicateName(String),

    /// Login from a connection that is already queued or playing.
    #[error("already logged in")]
    AlreadyLoggedIn,

    /// Game command sent while not part of a match.
    #[error("not in a game")]
    NotInSession,

    /// Move sent before both players acknowledged the start of the match.
    #[error("game has not started")]
    NotStarted,

    /// Move sent to a match that already has an outcome.
    #[error("game is over")]
    GameOver,
}

/// Coarse classification of a [`GameError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecognized or malformed command.
    Protocol,
    /// Illegal move: bounds, occupied cell or out of turn.
    Validation,
    /// Name collision at login.
    Identity,
    /// Command not allowed in the connection's current state.
    State,
}

impl GameError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::Protocol(_) => ErrorKind::Protocol,
            GameError::OutOfBounds { .. } | GameError::Occupied { .. } | GameError::NotYourTurn => {
                ErrorKind::Validation
            }
            GameError::DuplicateName(_) => ErrorKind::Identity,
            GameError::AlreadyLoggedIn
            | GameError::NotInSession
            | GameError::NotStarted
            | GameError::GameOver => ErrorKind::State,
        }
    }
}
