//! A single match between two connected players.
//!
//! A [`Session`] owns the board and the turn order. Moves and readiness acknowledgements are
//! applied by the players' own client threads under the session lock, so they are strictly
//! serialized. A dedicated announcer thread, started by [`Session::start`], waits on a
//! condition variable and tells the turn holder to play every time a move was accepted.
//!
//! # Rules
//!
//! - Marks are assigned at random. Cross moves first.
//! - A move is refused, without any side effect, when it is outside the board, targets an
//!   occupied cell or does not come from the turn holder.
//! - An accepted move is broadcast to both players as `MOVE <name> <row> <col>`.
//! - Completing a row, a column or a diagonal wins (`WINNER <name>` to both players). Filling
//!   the board without a line is a draw (`DRAW` to both players).
//! - A player leaving an unfinished match loses it. The opponent receives `WINNER <name>`
//!   then `DISCONNECT`.
//!
//! Moves are refused until [`Session::start`] sent `START`. With
//! [`SessionOptions::ready_handshake`] enabled, the first turn is only announced once both
//! players acknowledged `START` with `OK`, and moves sent before that are refused as well.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use tracing::{debug, info, instrument};

use crate::board::{Board, Mark, Placement};
use crate::connection::Connection;
use crate::error::GameError;
use crate::lock;
use crate::protocol::ServerMessage;
use crate::registry::Registry;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// How a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The player holding this mark completed a line.
    Win(Mark),
    /// The board is full.
    Draw,
    /// The match was interrupted, by the player holding `quitter` or by a server shutdown.
    Aborted {
        /// Mark of the player who left, `None` when the server stopped the match.
        quitter: Option<Mark>,
    },
}

/// Per-match behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Wait for `OK` from both players before announcing the first turn.
    pub ready_handshake: bool,
}

struct SessionState {
    board: Board,
    turn: Mark,
    ready: [bool; 2],
    opened: bool,
    started: bool,
    announce_pending: bool,
    outcome: Option<Outcome>,
}

/// A match between two connections.
pub struct Session {
    id: u64,
    players: [Arc<Connection>; 2],
    names: [String; 2],
    options: SessionOptions,
    state: Mutex<SessionState>,
    wake: Condvar,
}

impl Session {
    /// Creates a match between `first` and `second`, drawing marks at random, and points both
    /// connections at it. Nothing is sent before [`start`](Self::start).
    pub fn new(
        first: Arc<Connection>,
        second: Arc<Connection>,
        options: SessionOptions,
    ) -> Arc<Session> {
        if rand::random::<bool>() {
            Self::with_marks(first, second, options)
        } else {
            Self::with_marks(second, first, options)
        }
    }

    /// Same as [`new`](Self::new) with a fixed assignment: `cross` moves first.
    pub fn with_marks(
        cross: Arc<Connection>,
        circle: Arc<Connection>,
        options: SessionOptions,
    ) -> Arc<Session> {
        let names = [
            cross.name().unwrap_or_default(),
            circle.name().unwrap_or_default(),
        ];
        let session = Arc::new(Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            players: [cross, circle],
            names,
            options,
            state: Mutex::new(SessionState {
                board: Board::new(),
                turn: Mark::Cross,
                ready: [false; 2],
                opened: false,
                started: false,
                announce_pending: false,
                outcome: None,
            }),
            wake: Condvar::new(),
        });
        for player in &session.players {
            player.set_session(Some(Arc::clone(&session)));
        }
        session
    }

    /// Process-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Both players, cross first.
    pub fn players(&self) -> &[Arc<Connection>; 2] {
        &self.players
    }

    /// The player holding `mark`.
    pub fn player(&self, mark: Mark) -> &Arc<Connection> {
        &self.players[mark.index()]
    }

    /// Name of the player holding `mark`, as it was when the match was created.
    pub fn name(&self, mark: Mark) -> &str {
        &self.names[mark.index()]
    }

    /// Mark held by `connection`, `None` if it does not play in this match.
    pub fn mark_of(&self, connection: &Connection) -> Option<Mark> {
        [Mark::Cross, Mark::Circle]
            .into_iter()
            .find(|mark| std::ptr::eq(self.player(*mark).as_ref(), connection))
    }

    /// Mark allowed to move next.
    pub fn turn(&self) -> Mark {
        lock(&self.state).turn
    }

    /// Copy of the board.
    pub fn board(&self) -> Board {
        lock(&self.state).board.clone()
    }

    /// `None` while the match is running.
    pub fn outcome(&self) -> Option<Outcome> {
        lock(&self.state).outcome
    }

    /// True once the match has an outcome.
    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    /// True once moves are accepted.
    pub fn is_started(&self) -> bool {
        lock(&self.state).started
    }

    /// Sends `START` to both players, announces the first turn unless a ready handshake is
    /// still pending, and spawns the announcer thread.
    ///
    /// Moves are refused until this is called. A match that already ended, because a player
    /// left in the meantime, sends nothing.
    pub fn start(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        {
            let mut state = lock(&self.state);
            if state.outcome.is_some() {
                debug!(session = self.id, "match over before it started");
            } else {
                info!(
                    session = self.id,
                    cross = self.name(Mark::Cross),
                    circle = self.name(Mark::Circle),
                    "match started"
                );
                self.broadcast(&ServerMessage::Start(
                    self.name(Mark::Cross).to_string(),
                    self.name(Mark::Circle).to_string(),
                ));
                state.opened = true;
                if !self.options.ready_handshake || state.ready.iter().all(|ready| *ready) {
                    state.started = true;
                    self.announce_turn(state.turn);
                }
            }
        }

        let session = Arc::clone(self);
        thread::Builder::new()
            .name(format!("session-{}", self.id))
            .spawn(move || session.run_announcer())
            .context("could not spawn announcer thread")
    }

    /// Applies a move from `connection`.
    ///
    /// # Errors
    /// [`GameError::OutOfBounds`], [`GameError::Occupied`] or [`GameError::NotYourTurn`]
    /// when the move is illegal, [`GameError::NotInSession`], [`GameError::NotStarted`] or
    /// [`GameError::GameOver`] when no move is expected from this connection. Nothing is
    /// changed or sent in any of these cases.
    #[instrument(skip(self, connection), fields(session = self.id, player = %connection))]
    pub fn player_move(
        &self,
        connection: &Connection,
        row: usize,
        col: usize,
    ) -> Result<(), GameError> {
        let mut state = lock(&self.state);
        if state.outcome.is_some() {
            return Err(GameError::GameOver);
        }
        let mark = self.mark_of(connection).ok_or(GameError::NotInSession)?;
        if !state.started {
            return Err(GameError::NotStarted);
        }
        state.board.check(row, col)?;
        if mark != state.turn {
            return Err(GameError::NotYourTurn);
        }

        let placement = state.board.place(row, col, mark)?;
        let name = self.name(mark).to_string();
        debug!(moves = state.board.move_count(), "move accepted");
        self.broadcast(&ServerMessage::Move {
            name: name.clone(),
            row,
            col,
        });

        match placement {
            Placement::Win => {
                info!(session = self.id, winner = name, "match won");
                self.broadcast(&ServerMessage::Winner(name));
                self.finish(&mut state, Outcome::Win(mark));
            }
            Placement::Draw => {
                info!(session = self.id, "match drawn");
                self.broadcast(&ServerMessage::Draw);
                self.finish(&mut state, Outcome::Draw);
            }
            Placement::Continue => {
                state.turn = mark.opponent();
                state.announce_pending = true;
                self.wake.notify_all();
            }
        }
        Ok(())
    }

    /// Records that `connection` acknowledged the start of the match. The first turn is
    /// announced once both players did so and a handshake is required.
    pub fn player_ready(&self, connection: &Connection) -> Result<(), GameError> {
        let mut state = lock(&self.state);
        if state.outcome.is_some() {
            return Err(GameError::GameOver);
        }
        let mark = self.mark_of(connection).ok_or(GameError::NotInSession)?;
        state.ready[mark.index()] = true;

        if state.opened && !state.started && state.ready.iter().all(|ready| *ready) {
            info!(session = self.id, "both players ready");
            state.started = true;
            state.announce_pending = true;
            self.wake.notify_all();
        }
        Ok(())
    }

    /// Ends the match because `connection` left it. The opponent, if still there, wins.
    ///
    /// The leaving connection is unregistered and terminated, and the match is removed from
    /// `registry`. Returns false, doing nothing, if the match was already over or
    /// `connection` does not play in it.
    pub fn quit(&self, connection: &Arc<Connection>, registry: &Registry) -> bool {
        {
            let mut state = lock(&self.state);
            if state.outcome.is_some() {
                debug!(session = self.id, "match already over, nothing to quit");
                return false;
            }
            let Some(mark) = self.mark_of(connection) else {
                return false;
            };

            let opponent = self.player(mark.opponent());
            let opponent_active = opponent.is_ready() && opponent.is_alive();
            info!(session = self.id, quitter = self.name(mark), "player left the match");
            self.finish(&mut state, Outcome::Aborted { quitter: Some(mark) });

            if opponent_active {
                opponent.send(&ServerMessage::Winner(self.name(mark.opponent()).to_string()));
                opponent.send(&ServerMessage::Disconnect);
            }
        }

        registry.remove_session(self);
        registry.unregister(connection);
        connection.terminate();
        true
    }

    /// Stops an unfinished match without a winner. Used on server shutdown.
    pub fn abort(&self) {
        let mut state = lock(&self.state);
        if state.outcome.is_none() {
            info!(session = self.id, "match aborted");
            self.finish(&mut state, Outcome::Aborted { quitter: None });
        }
    }

    /// Announcer loop. Returns once the match is over.
    fn run_announcer(&self) {
        debug!(session = self.id, "announcer running");
        loop {
            let state = lock(&self.state);
            let mut state = self
                .wake
                .wait_while(state, |s| !s.announce_pending && s.outcome.is_none())
                .unwrap_or_else(PoisonError::into_inner);

            if state.outcome.is_some() {
                break;
            }
            state.announce_pending = false;
            self.announce_turn(state.turn);
        }
        self.release_players();
        debug!(session = self.id, "announcer finished");
    }

    fn announce_turn(&self, mark: Mark) {
        self.player(mark)
            .send(&ServerMessage::YourTurn(self.name(mark).to_string()));
    }

    fn broadcast(&self, message: &ServerMessage) {
        for player in &self.players {
            player.send(message);
        }
    }

    /// Must be called with the state lock held.
    fn finish(&self, state: &mut SessionState, outcome: Outcome) {
        debug!(session = self.id, ?outcome, board = %state.board, "final board");
        state.outcome = Some(outcome);
        self.wake.notify_all();
        self.release_players();
    }

    /// Detaches both players from this match. Idempotent.
    pub(crate) fn release_players(&self) {
        for player in &self.players {
            if player.leave_session(self.id) {
                player.set_ready(false);
            }
        }
    }
}
