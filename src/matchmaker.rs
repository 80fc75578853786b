//! Periodic pairing of waiting players.
//!
//! Every pass takes a snapshot of the waiting queue, oldest first, and pairs neighbours: the
//! first with the second, the third with the fourth, and so on. An odd player out stays queued
//! for the next pass. Finished matches are pruned at the end of every pass.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::lock;
use crate::registry::Registry;
use crate::session::{Session, SessionOptions};

/// Pairs waiting players into new matches.
pub struct Matchmaker {
    registry: Arc<Registry>,
    options: SessionOptions,
}

impl Matchmaker {
    /// Matchmaker drawing players from `registry`. Every match it creates uses `options`.
    pub fn new(registry: Arc<Registry>, options: SessionOptions) -> Matchmaker {
        Matchmaker { registry, options }
    }

    /// Runs one pairing pass and returns the matches it started.
    pub fn run_cycle(&self) -> Vec<Arc<Session>> {
        let waiting = self.registry.snapshot_waiting();
        let mut started = vec![];

        if waiting.len() >= 2 {
            for pair in waiting.chunks(2) {
                let [first, second] = pair else {
                    debug!(player = %pair[0], "odd player out, waits for the next pass");
                    break;
                };
                if first.name().is_none() || second.name().is_none() {
                    warn!(%first, %second, "unnamed connection in the queue");
                    continue;
                }
                if first.session().is_some() || second.session().is_some() {
                    continue;
                }

                // None when one of them left between the snapshot and now
                let Some(session) = self.registry.start_match(first, second, self.options) else {
                    debug!(%first, %second, "pair no longer available");
                    continue;
                };
                match session.start() {
                    Ok(_announcer) => started.push(session),
                    Err(e) => {
                        error!(session = session.id(), error = ?e, "could not start match");
                        session.abort();
                    }
                }
            }
        }

        self.registry.prune_finished();
        if !started.is_empty() {
            info!(count = started.len(), "matches created");
        }
        started
    }

    /// Runs a pass every `interval` on a dedicated thread until the returned handle is
    /// terminated or dropped.
    pub fn spawn(self, interval: Duration) -> anyhow::Result<MatchmakerHandle> {
        let keep_running = Arc::new((Mutex::new(true), Condvar::new()));
        let flag = Arc::clone(&keep_running);

        let thread = thread::Builder::new()
            .name("matchmaker".to_string())
            .spawn(move || {
                info!(interval = ?interval, "matchmaker running");
                let (running, wake) = &*flag;
                loop {
                    self.run_cycle();
                    let guard = wake
                        .wait_timeout_while(lock(running), interval, |running| *running)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                    if !*guard {
                        break;
                    }
                }
                info!("matchmaker stopped");
            })
            .context("could not spawn matchmaker thread")?;

        Ok(MatchmakerHandle {
            keep_running,
            thread: Some(thread),
        })
    }
}

/// Stops the matchmaker thread when terminated or dropped.
pub struct MatchmakerHandle {
    keep_running: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl MatchmakerHandle {
    /// Stops the thread and waits for the current pass to end.
    pub fn terminate(&mut self) {
        let (running, wake) = &*self.keep_running;
        *lock(running) = false;
        wake.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("matchmaker thread panicked");
            }
        }
    }
}

impl Drop for MatchmakerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}
