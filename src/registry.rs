//! Process-wide bookkeeping of logged in players and running matches.
//!
//! The [`Registry`] holds the waiting queue and the set of matches behind a single lock, so a
//! login can never race a matchmaking pass: a name is checked, reserved and queued in one
//! critical section, and two players leave the queue and enter their match in another.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::GameError;
use crate::lock;
use crate::protocol::ServerMessage;
use crate::session::{Session, SessionOptions};

#[derive(Default)]
struct Inner {
    waiting: Vec<Arc<Connection>>,
    sessions: Vec<Arc<Session>>,
}

impl Inner {
    fn is_waiting(&self, connection: &Connection) -> bool {
        self.waiting
            .iter()
            .any(|c| std::ptr::eq(c.as_ref(), connection))
    }

    fn remove_waiting(&mut self, connection: &Connection) {
        self.waiting.retain(|c| !std::ptr::eq(c.as_ref(), connection));
    }

    /// Finished matches do not hold their players' names anymore.
    fn holders(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.waiting.iter().chain(
            self.sessions
                .iter()
                .filter(|session| !session.is_finished())
                .flat_map(|session| session.players().iter()),
        )
    }

    fn name_in_use(&self, name: &str, except: Option<&Connection>) -> bool {
        self.holders()
            .filter(|c| except.map_or(true, |e| !std::ptr::eq(c.as_ref(), e)))
            .any(|c| c.name().as_deref() == Some(name))
    }
}

/// Waiting queue and running matches.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Logs `connection` in as `name` and queues it for matchmaking.
    ///
    /// `WELCOME <name>` is written before the connection becomes visible to the matchmaker,
    /// so a client always sees it before `START`. A connection coming back from a finished
    /// match registers again the same way.
    ///
    /// # Errors
    /// [`GameError::AlreadyLoggedIn`] if the connection is queued or playing,
    /// [`GameError::DuplicateName`] if another queued or playing connection holds `name`.
    /// The registry is left unchanged in both cases.
    pub fn register(&self, connection: &Arc<Connection>, name: String) -> Result<(), GameError> {
        let mut inner = lock(&self.inner);
        if inner.is_waiting(connection) || connection.session().is_some() {
            return Err(GameError::AlreadyLoggedIn);
        }
        if inner.name_in_use(&name, Some(connection)) {
            debug!(connection = connection.id(), name, "name already in use");
            return Err(GameError::DuplicateName(name));
        }

        connection.set_name(name.clone());
        connection.set_ready(true);
        connection.send(&ServerMessage::Welcome(name.clone()));
        inner.waiting.push(Arc::clone(connection));
        info!(connection = connection.id(), name, waiting = inner.waiting.len(), "player queued");
        Ok(())
    }

    /// Removes `connection` from the waiting queue, if present.
    pub fn unregister(&self, connection: &Connection) {
        lock(&self.inner).remove_waiting(connection);
    }

    /// Takes a leaving connection out of matchmaking for good and returns the match it was
    /// put into, if any.
    ///
    /// The connection is closed and dequeued under the registry lock, so
    /// [`start_match`](Self::start_match) either completed before, and the returned match must
    /// be quit, or never picks it up.
    pub fn retire(&self, connection: &Connection) -> Option<Arc<Session>> {
        let mut inner = lock(&self.inner);
        inner.remove_waiting(connection);
        if connection.close() {
            debug!(connection = connection.id(), "retired");
        }
        connection.session()
    }

    /// Tracks a running match.
    pub fn add_session(&self, session: Arc<Session>) {
        lock(&self.inner).sessions.push(session);
    }

    /// Stops tracking a match.
    pub fn remove_session(&self, session: &Session) {
        lock(&self.inner)
            .sessions
            .retain(|s| s.id() != session.id());
    }

    /// True if a queued connection or a player of an unfinished match is called `name`.
    pub fn name_in_use(&self, name: Option<&str>) -> bool {
        match name {
            Some(name) => lock(&self.inner).name_in_use(name, None),
            None => false,
        }
    }

    /// Queued connections that are ready and not playing, oldest first.
    pub fn snapshot_waiting(&self) -> Vec<Arc<Connection>> {
        lock(&self.inner)
            .waiting
            .iter()
            .filter(|c| c.is_ready() && c.is_alive() && c.session().is_none())
            .cloned()
            .collect()
    }

    /// Moves `first` and `second` from the queue into a new match, in one step.
    ///
    /// Returns `None`, changing nothing, if either of them left the queue or got matched since
    /// it was seen waiting. The returned session still has to be [started](Session::start).
    pub fn start_match(
        &self,
        first: &Arc<Connection>,
        second: &Arc<Connection>,
        options: SessionOptions,
    ) -> Option<Arc<Session>> {
        if Arc::ptr_eq(first, second) {
            return None;
        }
        let mut inner = lock(&self.inner);
        let available = |c: &Arc<Connection>| {
            inner.is_waiting(c) && c.is_alive() && c.name().is_some() && c.session().is_none()
        };
        if !available(first) || !available(second) {
            return None;
        }

        inner.remove_waiting(first);
        inner.remove_waiting(second);
        let session = Session::new(Arc::clone(first), Arc::clone(second), options);
        inner.sessions.push(Arc::clone(&session));
        Some(session)
    }

    /// Drops finished matches and detaches their players. Returns how many were dropped.
    pub fn prune_finished(&self) -> usize {
        let mut inner = lock(&self.inner);
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.sessions)
            .into_iter()
            .partition(|session| session.is_finished());
        inner.sessions = running;
        drop(inner);

        for session in &finished {
            session.release_players();
        }
        if !finished.is_empty() {
            debug!(count = finished.len(), "pruned finished matches");
        }
        finished.len()
    }

    /// Number of queued connections.
    pub fn waiting_count(&self) -> usize {
        lock(&self.inner).waiting.len()
    }

    /// Number of tracked matches, finished ones included until pruned.
    pub fn session_count(&self) -> usize {
        lock(&self.inner).sessions.len()
    }

    /// Aborts every match and terminates every connection known to the registry.
    pub fn shutdown(&self) {
        let Inner { waiting, sessions } = std::mem::take(&mut *lock(&self.inner));
        for session in &sessions {
            session.abort();
            for player in session.players() {
                player.terminate();
            }
        }
        for connection in &waiting {
            connection.terminate();
        }
        info!(
            sessions = sessions.len(),
            waiting = waiting.len(),
            "registry cleared"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::connection;

    fn login(registry: &Registry, name: &str) -> Arc<Connection> {
        let (conn, _) = connection();
        registry.register(&conn, name.to_string()).unwrap();
        conn
    }

    #[test]
    fn register_queues_and_welcomes() {
        let registry = Registry::new();
        let (conn, out) = connection();
        registry.register(&conn, "Alice".to_string()).unwrap();

        assert_eq!(out.take_lines(), vec!["WELCOME Alice"]);
        assert!(conn.is_ready());
        assert!(registry.name_in_use(Some("Alice")));
        assert_eq!(registry.snapshot_waiting().len(), 1);
    }

    #[test]
    fn duplicate_names_are_refused_and_change_nothing() {
        let registry = Registry::new();
        let _alice = login(&registry, "Alice");

        let (other, out) = connection();
        assert_eq!(
            registry.register(&other, "Alice".to_string()),
            Err(GameError::DuplicateName("Alice".to_string()))
        );
        assert!(out.take_lines().is_empty());
        assert!(other.name().is_none());
        assert_eq!(registry.waiting_count(), 1);
    }

    #[test]
    fn registering_twice_is_refused() {
        let registry = Registry::new();
        let alice = login(&registry, "Alice");
        assert_eq!(
            registry.register(&alice, "Alicia".to_string()),
            Err(GameError::AlreadyLoggedIn)
        );
        assert_eq!(alice.name().as_deref(), Some("Alice"));
    }

    #[test]
    fn unknown_names_are_never_in_use() {
        let registry = Registry::new();
        assert!(!registry.name_in_use(None));
        assert!(!registry.name_in_use(Some("Bob")));
    }

    #[test]
    fn unregister_is_idempotent_and_frees_the_name() {
        let registry = Registry::new();
        let alice = login(&registry, "Alice");
        registry.unregister(&alice);
        registry.unregister(&alice);
        assert_eq!(registry.waiting_count(), 0);
        assert!(!registry.name_in_use(Some("Alice")));
        let _again = login(&registry, "Alice");
    }

    #[test]
    fn matched_players_keep_their_names_and_leave_the_snapshot() {
        let registry = Registry::new();
        let alice = login(&registry, "Alice");
        let bob = login(&registry, "Bob");

        let session = registry
            .start_match(&alice, &bob, SessionOptions::default())
            .unwrap();
        assert!(registry.snapshot_waiting().is_empty());
        assert_eq!(registry.waiting_count(), 0);
        assert!(registry.name_in_use(Some("Alice")));
        assert!(registry.name_in_use(Some("Bob")));

        let (late, _) = connection();
        assert!(registry.register(&late, "Bob".to_string()).is_err());
        assert!(registry
            .start_match(&alice, &bob, SessionOptions::default())
            .is_none());

        session.abort();
        assert!(!registry.name_in_use(Some("Bob")));
        assert_eq!(registry.prune_finished(), 1);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn players_can_queue_again_after_a_match() {
        let registry = Registry::new();
        let alice = login(&registry, "Alice");
        let bob = login(&registry, "Bob");
        let session = registry
            .start_match(&alice, &bob, SessionOptions::default())
            .unwrap();
        assert_eq!(
            registry.register(&alice, "Alice".to_string()),
            Err(GameError::AlreadyLoggedIn)
        );

        session.abort();
        registry.register(&alice, "Alice".to_string()).unwrap();
        assert_eq!(registry.waiting_count(), 1);
    }

    #[test]
    fn retired_connections_are_never_matched() {
        let registry = Registry::new();
        let alice = login(&registry, "Alice");
        let bob = login(&registry, "Bob");

        assert!(registry.retire(&alice).is_none());
        assert!(!alice.is_alive());
        assert!(registry
            .start_match(&alice, &bob, SessionOptions::default())
            .is_none());
        assert_eq!(registry.waiting_count(), 1);
        assert!(!registry.name_in_use(Some("Alice")));
    }

    #[test]
    fn retire_hands_back_the_match_to_quit() {
        let registry = Registry::new();
        let alice = login(&registry, "Alice");
        let bob = login(&registry, "Bob");
        let session = registry
            .start_match(&alice, &bob, SessionOptions::default())
            .unwrap();

        let retired = registry.retire(&alice).unwrap();
        assert_eq!(retired.id(), session.id());
    }

    #[test]
    fn shutdown_terminates_everyone() {
        let registry = Registry::new();
        let alice = login(&registry, "Alice");
        let bob = login(&registry, "Bob");
        let carol = login(&registry, "Carol");
        let session = registry
            .start_match(&alice, &bob, SessionOptions::default())
            .unwrap();

        registry.shutdown();
        assert!(session.is_finished());
        assert!(!alice.is_alive());
        assert!(!carol.is_alive());
        assert_eq!(registry.waiting_count(), 0);
        assert_eq!(registry.session_count(), 0);
    }
}
