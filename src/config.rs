//! Configuration for Tessera
//!
//! Centralized configuration with sensible defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TesseraError};

/// Default TCP port of the server
pub const DEFAULT_PORT: u16 = 2605;

/// Main configuration for a Tessera server
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Prefix of the local (Unix domain) socket path. The port is appended,
    /// so the default yields `/var/run/tessera_2605`. `None` disables it.
    pub local_socket_prefix: Option<String>,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds, 0 = wait forever)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = wait forever)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Backpressure Configuration
    // -------------------------------------------------------------------------
    /// Queued outbound bytes above which a session reports itself as too busy
    pub pending_send_high_watermark: usize,

    /// Queued outbound bytes below which resume callbacks fire
    pub pending_send_low_watermark: usize,

    // -------------------------------------------------------------------------
    // Container Configuration
    // -------------------------------------------------------------------------
    /// Container type aliases (`alias`, `real type`)
    pub aliases: Vec<(String, String)>,

    /// Users stored in `__meta__/users` at start-up (`user`, `password`)
    pub users: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            local_socket_prefix: Some("/var/run/tessera_".to_string()),
            max_connections: 1024,
            read_timeout_ms: 0,
            write_timeout_ms: 5000,
            pending_send_high_watermark: 4 * 1024 * 1024, // 4 MB
            pending_send_low_watermark: 1024 * 1024,      // 1 MB
            aliases: Vec::new(),
            users: Vec::new(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Port part of `listen_addr`
    pub fn port(&self) -> Result<u16> {
        self.listen_addr
            .parse::<SocketAddr>()
            .map(|a| a.port())
            .map_err(|e| TesseraError::Config(format!("bad listen address {}: {}", self.listen_addr, e)))
    }

    /// Path of the local socket endpoint, derived from the port
    pub fn local_socket_path(&self) -> Option<PathBuf> {
        let prefix = self.local_socket_prefix.as_ref()?;
        let port = self.port().ok()?;
        Some(PathBuf::from(format!("{}{}", prefix, port)))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }

    /// Check the relations between fields that the builder cannot enforce
    pub fn validate(&self) -> Result<()> {
        self.port()?;
        if self.pending_send_low_watermark > self.pending_send_high_watermark {
            return Err(TesseraError::Config(format!(
                "low watermark ({}) above high watermark ({})",
                self.pending_send_low_watermark, self.pending_send_high_watermark
            )));
        }
        if self.max_connections == 0 {
            return Err(TesseraError::Config("max_connections must be positive".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the local socket path prefix (`None` disables the local endpoint)
    pub fn local_socket_prefix(mut self, prefix: Option<String>) -> Self {
        self.config.local_socket_prefix = prefix;
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set both backpressure thresholds (in bytes)
    pub fn pending_send_watermarks(mut self, low: usize, high: usize) -> Self {
        self.config.pending_send_low_watermark = low;
        self.config.pending_send_high_watermark = high;
        self
    }

    /// Register a container type alias
    pub fn alias(mut self, alias: impl Into<String>, real_type: impl Into<String>) -> Self {
        self.config.aliases.push((alias.into(), real_type.into()));
        self
    }

    /// Register a user stored in `__meta__/users`
    pub fn user(mut self, name: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.users.push((name.into(), password.into()));
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Options for a client [`Connection`](crate::client::Connection)
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Maximum time spent establishing a TCP connection
    pub connect_timeout: Duration,

    /// Maximum time between a frame header and the end of its payload
    pub payload_timeout: Duration,

    /// Maximum time to wait for an answer (`None` = forever)
    pub answer_timeout: Option<Duration>,

    /// Open `__meta__/clusters` after connecting to enable cluster routing
    pub open_cluster_map: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            payload_timeout: Duration::from_secs(10),
            answer_timeout: None,
            open_cluster_map: true,
        }
    }
}
