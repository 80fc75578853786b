//! Line protocol spoken between clients and the server.
//!
//! Every message is one UTF-8 line. The first whitespace separated token is the keyword, the
//! remaining tokens are positional arguments. Keywords are case-sensitive.
//!
//! Client to server:
//! - `HELLO <name>`: log in and join the waiting queue
//! - `OK`: acknowledge the start of a match
//! - `MOVE <row> <col>`: place a mark, zero based
//! - `QUIT`: leave, the server answers `DISCONNECT` and closes the connection
//!
//! Server to client: see [`ServerMessage`].

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Longest accepted player name.
pub const MAX_NAME_LEN: usize = 32;

/// A decoded client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `HELLO <name>`
    Hello {
        /// Requested player name.
        name: String,
    },
    /// `OK`
    Ready,
    /// `MOVE <row> <col>`
    Move {
        /// Zero based row.
        row: usize,
        /// Zero based column.
        col: usize,
    },
    /// `QUIT`
    Quit,
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let keyword = tokens.next().ok_or(ProtocolError::Empty)?;

        match keyword {
            "HELLO" => {
                let name = tokens.next().ok_or(ProtocolError::MissingArgument {
                    command: "HELLO",
                    expected: "a name",
                })?;
                if !is_valid_name(name) {
                    return Err(ProtocolError::InvalidName(name.to_string()));
                }
                Ok(Command::Hello {
                    name: name.to_string(),
                })
            }
            "OK" => Ok(Command::Ready),
            "MOVE" => {
                let missing = ProtocolError::MissingArgument {
                    command: "MOVE",
                    expected: "a row and a column",
                };
                let row = tokens.next().ok_or(missing.clone())?;
                let col = tokens.next().ok_or(missing)?;
                Ok(Command::Move {
                    row: parse_coordinate(row)?,
                    col: parse_coordinate(col)?,
                })
            }
            "QUIT" => Ok(Command::Quit),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

fn parse_coordinate(token: &str) -> Result<usize, ProtocolError> {
    token
        .parse()
        .map_err(|_| ProtocolError::InvalidCoordinate(token.to_string()))
}

fn is_valid_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A line sent by the server.
///
/// The [`Display`](fmt::Display) implementation produces the wire text without the trailing
/// newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Login accepted.
    Welcome(String),
    /// Match found. First name plays cross and moves first.
    Start(String, String),
    /// The named player must move now.
    YourTurn(String),
    /// A move was accepted.
    Move {
        /// Player who moved.
        name: String,
        /// Row of the move.
        row: usize,
        /// Column of the move.
        col: usize,
    },
    /// The match is won by the named player.
    Winner(String),
    /// The board is full without a winner.
    Draw,
    /// The last command was refused.
    Error(String),
    /// The connection or the opponent is gone.
    Disconnect,
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Welcome(name) => write!(f, "WELCOME {name}"),
            ServerMessage::Start(cross, circle) => write!(f, "START {cross} {circle}"),
            ServerMessage::YourTurn(name) => write!(f, "YOUR_TURN {name}"),
            ServerMessage::Move { name, row, col } => write!(f, "MOVE {name} {row} {col}"),
            ServerMessage::Winner(name) => write!(f, "WINNER {name}"),
            ServerMessage::Draw => write!(f, "DRAW"),
            ServerMessage::Error(detail) => write!(f, "ERROR {detail}"),
            ServerMessage::Disconnect => write!(f, "DISCONNECT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_commands() {
        assert_eq!(
            "HELLO Alice".parse::<Command>(),
            Ok(Command::Hello {
                name: "Alice".to_string()
            })
        );
        assert_eq!("OK".parse::<Command>(), Ok(Command::Ready));
        assert_eq!(
            "MOVE 2 0\r".parse::<Command>(),
            Ok(Command::Move { row: 2, col: 0 })
        );
        assert_eq!("QUIT".parse::<Command>(), Ok(Command::Quit));
    }

    #[test]
    fn keywords_are_case_sensitive() {
        assert_eq!(
            "hello Alice".parse::<Command>(),
            Err(ProtocolError::UnknownCommand("hello".to_string()))
        );
    }

    #[test]
    fn missing_arguments() {
        assert!(matches!(
            "HELLO".parse::<Command>(),
            Err(ProtocolError::MissingArgument { command: "HELLO", .. })
        ));
        assert!(matches!(
            "MOVE 1".parse::<Command>(),
            Err(ProtocolError::MissingArgument { command: "MOVE", .. })
        ));
        assert_eq!("   ".parse::<Command>(), Err(ProtocolError::Empty));
    }

    #[test]
    fn malformed_coordinates() {
        assert_eq!(
            "MOVE -1 0".parse::<Command>(),
            Err(ProtocolError::InvalidCoordinate("-1".to_string()))
        );
        assert_eq!(
            "MOVE 1 x".parse::<Command>(),
            Err(ProtocolError::InvalidCoordinate("x".to_string()))
        );
    }

    #[test]
    fn invalid_names() {
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            format!("HELLO {long}").parse::<Command>(),
            Err(ProtocolError::InvalidName(_))
        ));
        assert!(matches!(
            "HELLO b@d".parse::<Command>(),
            Err(ProtocolError::InvalidName(_))
        ));
        assert!("HELLO under_score-ok".parse::<Command>().is_ok());
    }

    #[test]
    fn encode_messages() {
        assert_eq!(
            ServerMessage::Start("Alice".into(), "Bob".into()).to_string(),
            "START Alice Bob"
        );
        assert_eq!(
            ServerMessage::Move {
                name: "Bob".into(),
                row: 1,
                col: 2
            }
            .to_string(),
            "MOVE Bob 1 2"
        );
        assert_eq!(ServerMessage::YourTurn("Bob".into()).to_string(), "YOUR_TURN Bob");
        assert_eq!(ServerMessage::Draw.to_string(), "DRAW");
        assert_eq!(ServerMessage::Disconnect.to_string(), "DISCONNECT");
        assert_eq!(
            ServerMessage::Error("not your move".into()).to_string(),
            "ERROR not your move"
        );
    }
}
