//! TCP front end.
//!
//! A [`Server`] binds the configured address, starts the [`Matchmaker`] and accepts clients on
//! a dedicated thread. Every accepted socket becomes a [`Connection`] served by its own
//! [`ClientHandler`] thread. [`Server::spawn`] returns a [`ServerHandle`] that can stop all of
//! it, [`Server::run`] blocks instead.
//!
//! # Threads
//!
//! - `acceptor`: accepts sockets and spawns the client threads
//! - `matchmaker`: pairs waiting players on the configured interval
//! - `client-<id>`: reads and handles the lines of one client
//! - `session-<id>`: announces the turns of one match

use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::client_handler::ClientHandler;
use crate::configuration::Configuration;
use crate::connection::Connection;
use crate::lock;
use crate::logger::init_logger;
use crate::matchmaker::{Matchmaker, MatchmakerHandle};
use crate::registry::Registry;

type Connections = Arc<Mutex<Vec<Weak<Connection>>>>;

/// The matchmaking server.
pub struct Server {
    config: Configuration,
    registry: Arc<Registry>,
}

impl Server {
    /// Create a [`Server`] from `config`. Installs the global logger when logging is enabled.
    ///
    /// # Errors
    /// Fails if the logger cannot be installed, for instance because another global
    /// subscriber is already set.
    #[instrument(skip_all)]
    pub fn new(config: Configuration) -> anyhow::Result<Server> {
        if config.log || config.verbose {
            init_logger(config.log)?;
        }
        trace!(?config);

        Ok(Server {
            config,
            registry: Arc::new(Registry::new()),
        })
    }

    /// Players and matches of this server.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Serves clients until the process exits.
    ///
    /// # Errors
    /// Fails if the address cannot be bound or a server thread cannot be spawned.
    pub fn run(self) -> anyhow::Result<()> {
        self.spawn()?.join()
    }

    /// Starts serving in the background.
    ///
    /// # Errors
    /// Fails if the address cannot be bound or a server thread cannot be spawned.
    pub fn spawn(self) -> anyhow::Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.socket_addr())
            .with_context(|| format!("could not bind {}", self.config.socket_addr()))?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening");

        let matchmaker = Matchmaker::new(Arc::clone(&self.registry), self.config.session_options())
            .spawn(self.config.matchmaking_interval())?;

        let keep_running = Arc::new(AtomicBool::new(true));
        let connections = Connections::default();
        let acceptor = {
            let registry = Arc::clone(&self.registry);
            let keep_running = Arc::clone(&keep_running);
            let connections = Arc::clone(&connections);
            thread::Builder::new()
                .name("acceptor".to_string())
                .spawn(move || accept_loop(listener, registry, keep_running, connections))
                .context("could not spawn acceptor thread")?
        };

        Ok(ServerHandle {
            local_addr,
            registry: self.registry,
            keep_running,
            acceptor: Some(acceptor),
            matchmaker: Some(matchmaker),
            connections,
        })
    }
}

fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    keep_running: Arc<AtomicBool>,
    connections: Connections,
) {
    for stream in listener.incoming() {
        if !keep_running.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        if let Err(e) = spawn_client(stream, &registry, &connections) {
            error!(error = ?e, "could not serve client");
        }
    }
    debug!("acceptor stopped");
}

fn spawn_client(
    stream: TcpStream,
    registry: &Arc<Registry>,
    connections: &Connections,
) -> anyhow::Result<()> {
    let connection = Arc::new(
        Connection::from_stream(&stream).context("could not set up connection")?,
    );
    {
        let mut tracked = lock(connections);
        tracked.retain(|c| c.strong_count() > 0);
        tracked.push(Arc::downgrade(&connection));
    }

    let id = connection.id();
    let handler = ClientHandler::new(connection, Arc::clone(registry));
    thread::Builder::new()
        .name(format!("client-{id}"))
        .spawn(move || handler.run(BufReader::new(stream)))
        .context("could not spawn client thread")?;
    Ok(())
}

/// Handle on a running [`Server`]. Dropping it shuts the server down.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    keep_running: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
    matchmaker: Option<MatchmakerHandle>,
    connections: Connections,
}

impl ServerHandle {
    /// Address the server actually listens on. Useful when bound to port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Players and matches of this server.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Blocks until the acceptor stops, which only happens on [`shutdown`](Self::shutdown).
    pub fn join(mut self) -> anyhow::Result<()> {
        match self.acceptor.take() {
            Some(acceptor) => acceptor
                .join()
                .map_err(|_| anyhow!("acceptor thread panicked")),
            None => Ok(()),
        }
    }

    /// Stops accepting clients and pairing players, aborts running matches and closes every
    /// connection. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.keep_running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(addr = %self.local_addr, "shutting down");

        // unblock accept() with a throwaway connection
        if let Err(e) = TcpStream::connect(self.wake_addr()) {
            warn!(error = %e, "could not wake the acceptor");
        } else if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                error!("acceptor thread panicked");
            }
        }

        if let Some(mut matchmaker) = self.matchmaker.take() {
            matchmaker.terminate();
        }
        self.registry.shutdown();
        // connections that never logged in are unknown to the registry
        for connection in lock(&self.connections).drain(..) {
            if let Some(connection) = connection.upgrade() {
                connection.terminate();
            }
        }
    }

    fn wake_addr(&self) -> SocketAddr {
        let ip = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        SocketAddr::new(ip, self.local_addr.port())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
