//! Config for the server behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional. Flags are case-insensitive: set the value to `"true"` to enable one.
//!
//! - `TTT_HOST`: Address to listen on (default: `0.0.0.0`)
//! - `TTT_PORT`: TCP port to listen on (default: `8080`)
//! - `TTT_MATCHMAKING_INTERVAL_MS`: Pause between two matchmaking passes (default: `500`)
//! - `TTT_READY_HANDSHAKE`: Wait for `OK` from both players before the first turn (default: `false`)
//! - `TTT_LOG`: Log to a timestamped file in the working directory (default: `false`)
//! - `TTT_VERBOSE`: Log to stderr when not logging to a file (default: `true`)

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::session::SessionOptions;

/// Configuration for server behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) host: IpAddr,
    pub(crate) port: u16,
    pub(crate) matchmaking_interval: Duration,
    pub(crate) ready_handshake: bool,
    pub(crate) log: bool,
    pub(crate) verbose: bool,
}

impl Configuration {
    /// Default port of the reference deployment.
    pub const DEFAULT_PORT: u16 = 8080;
    /// Default pause between two matchmaking passes.
    pub const DEFAULT_MATCHMAKING_INTERVAL: Duration = Duration::from_millis(500);

    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The server listens on every interface, port 8080.
    /// - Waiting players are paired every 500ms.
    /// - The first turn is announced as soon as a match starts (no `OK` handshake).
    /// - Logs go to stderr, not to a file.
    pub fn new() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: Self::DEFAULT_PORT,
            matchmaking_interval: Self::DEFAULT_MATCHMAKING_INTERVAL,
            ready_handshake: false,
            log: false,
            verbose: true,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the recognized variables. Unset or
    /// unparsable variables keep their default value.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn parse_env<T: std::str::FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.trim().parse().ok()
        }

        let defaults = Self::new();
        Self {
            host: parse_env("TTT_HOST").unwrap_or(defaults.host),
            port: parse_env("TTT_PORT").unwrap_or(defaults.port),
            matchmaking_interval: parse_env("TTT_MATCHMAKING_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.matchmaking_interval),
            ready_handshake: get_env_flag("TTT_READY_HANDSHAKE", defaults.ready_handshake),
            log: get_env_flag("TTT_LOG", defaults.log),
            verbose: get_env_flag("TTT_VERBOSE", defaults.verbose),
        }
    }

    /// Set the address to listen on.
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Set the port to listen on. `0` picks a free port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the pause between two matchmaking passes.
    pub fn with_matchmaking_interval(mut self, interval: Duration) -> Self {
        self.matchmaking_interval = interval;
        self
    }

    /// Enable or disable the `OK` handshake before the first turn.
    pub fn with_ready_handshake(mut self, value: bool) -> Self {
        self.ready_handshake = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Enable or disable logging to stderr.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Address the server binds to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Pause between two matchmaking passes.
    pub fn matchmaking_interval(&self) -> Duration {
        self.matchmaking_interval
    }

    pub(crate) fn session_options(&self) -> SessionOptions {
        SessionOptions {
            ready_handshake: self.ready_handshake,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Configuration::default();
        assert_eq!(config.socket_addr().port(), 8080);
        assert_eq!(config.matchmaking_interval(), Duration::from_millis(500));
        assert!(!config.session_options().ready_handshake);
    }

    #[test]
    fn builder_overrides() {
        let config = Configuration::new()
            .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_port(0)
            .with_ready_handshake(true)
            .with_matchmaking_interval(Duration::from_millis(20));
        assert_eq!(config.socket_addr(), "127.0.0.1:0".parse::<SocketAddr>().unwrap());
        assert!(config.session_options().ready_handshake);
        assert_eq!(config.matchmaking_interval(), Duration::from_millis(20));
    }
}
