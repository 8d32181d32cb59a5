// ABOUTME: Server configuration with defaults and fluent setters
// ABOUTME: Covers the listener, session policy and periodic statistics

use crate::codec::MAX_PDU_SIZE;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port the server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 2776;

/// Configuration for the SMPP server.
///
/// # Example
///
/// ```rust
/// use smpp_server::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::default()
///     .with_bind_address("127.0.0.1:2775".parse().unwrap())
///     .with_idle_timeout(Duration::from_secs(30))
///     .with_violation_budget(5);
/// assert_eq!(config.max_sessions, 50_000);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listening address (default: 0.0.0.0:2776)
    pub bind_address: SocketAddr,

    /// Concurrent sessions allowed before new connections are refused
    pub max_sessions: usize,

    /// A session with no inbound traffic for this long is closed. Clients
    /// keep idle sessions alive with enquire_link.
    pub idle_timeout: Duration,

    /// Longest a single response write or flush may wait on a peer that is
    /// not reading before the session is closed
    pub write_timeout: Duration,

    /// Largest command_length accepted or produced
    pub max_frame_size: u32,

    /// Protocol violations a session may commit before it is closed
    pub violation_budget: u32,

    /// Close the connection after a rejected bind instead of letting the
    /// client retry
    pub close_on_bind_failure: bool,

    /// system_id returned in bind responses
    pub system_id: String,

    /// Log a counters snapshot at this interval
    pub stats_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_sessions: 50_000,
            idle_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            max_frame_size: MAX_PDU_SIZE,
            violation_budget: 3,
            close_on_bind_failure: false,
            system_id: "smpp-server".to_string(),
            stats_interval: None,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_address(mut self, address: SocketAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_violation_budget(mut self, budget: u32) -> Self {
        self.violation_budget = budget;
        self
    }

    pub fn with_close_on_bind_failure(mut self, close: bool) -> Self {
        self.close_on_bind_failure = close;
        self
    }

    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = system_id.into();
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = Some(interval);
        self
    }
}
