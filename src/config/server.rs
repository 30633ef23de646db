//! Server configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1080
}

fn default_auth_list() -> Vec<u8> {
    vec![crate::socks::consts::SOCKS5_AUTH_METHOD_NONE]
}

fn default_max_connections() -> usize {
    10_000
}

fn default_rate_burst() -> u32 {
    1000
}

fn default_rate_interval_ms() -> u64 {
    100
}

fn default_handshake_secs() -> u64 {
    30
}

fn default_request_secs() -> u64 {
    10
}

fn default_connect_secs() -> u64 {
    10
}

fn default_reply_secs() -> u64 {
    10
}

fn default_bind_accept_secs() -> u64 {
    30
}

/// SOCKS5 server configuration, immutable after start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seed username (may be empty when no password auth is configured)
    #[serde(default)]
    pub user: String,

    /// Seed password
    #[serde(default)]
    pub password: String,

    /// Destination hosts to refuse, matched exactly against the
    /// requested host string before resolution
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Accepted auth methods in server priority order
    #[serde(default = "default_auth_list")]
    pub auth_list: Vec<u8>,

    /// Drop UDP datagrams whose source IP differs from the TCP control
    /// connection's peer
    #[serde(default)]
    pub restrict_udp_source: bool,

    /// Admission limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Per-stage deadlines
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
            user: String::new(),
            password: String::new(),
            blacklist: Vec::new(),
            auth_list: default_auth_list(),
            restrict_udp_source: false,
            limits: LimitsConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ServerConfig {
    /// The `host:port` string to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The seed credential pair, when both halves are present
    pub fn seed_credentials(&self) -> Option<(&str, &str)> {
        if self.user.is_empty() {
            None
        } else {
            Some((self.user.as_str(), self.password.as_str()))
        }
    }

    /// Whether a destination host is blacklisted
    pub fn is_blacklisted(&self, host: &str) -> bool {
        self.blacklist.iter().any(|entry| entry == host)
    }
}

/// Admission limits: session rate and concurrency cap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Token bucket capacity for new-session bursts
    #[serde(default = "default_rate_burst")]
    pub rate_burst: u32,

    /// Milliseconds per replenished token
    #[serde(default = "default_rate_interval_ms")]
    pub rate_interval_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_connections: default_max_connections(),
            rate_burst: default_rate_burst(),
            rate_interval_ms: default_rate_interval_ms(),
        }
    }
}

impl LimitsConfig {
    /// Refill interval as a `Duration`
    pub fn rate_interval(&self) -> Duration {
        Duration::from_millis(self.rate_interval_ms)
    }
}

/// Per-stage deadlines for a session (relaying itself has none)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Negotiation plus authentication, combined
    #[serde(default = "default_handshake_secs")]
    pub handshake_secs: u64,

    /// Reading the command request
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,

    /// Dialling the target (CONNECT) or binding (BIND/UDP)
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,

    /// Writing a reply
    #[serde(default = "default_reply_secs")]
    pub reply_secs: u64,

    /// Waiting for the single inbound BIND connection
    #[serde(default = "default_bind_accept_secs")]
    pub bind_accept_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            handshake_secs: default_handshake_secs(),
            request_secs: default_request_secs(),
            connect_secs: default_connect_secs(),
            reply_secs: default_reply_secs(),
            bind_accept_secs: default_bind_accept_secs(),
        }
    }
}

impl TimeoutConfig {
    /// Handshake deadline
    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    /// Request-read deadline
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    /// Target-dial deadline
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// Reply-write deadline
    pub fn reply(&self) -> Duration {
        Duration::from_secs(self.reply_secs)
    }

    /// BIND accept deadline
    pub fn bind_accept(&self) -> Duration {
        Duration::from_secs(self.bind_accept_secs)
    }
}
