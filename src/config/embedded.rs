//! Embedded-client configuration

use serde::{Deserialize, Serialize};

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_embedded_auth_list() -> Vec<u8> {
    vec![crate::socks::consts::SOCKS5_AUTH_METHOD_PASSWORD]
}

/// Configuration for the embedded mode: a local SOCKS5 server on a
/// random high port with freshly generated credentials, advertised to an
/// external controller by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedConfig {
    /// Interface the local server listens on
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Controller endpoint the advertisement is reported to; the
    /// reporting itself happens outside this crate
    pub http_server: String,

    /// Accepted auth methods in priority order
    #[serde(default = "default_embedded_auth_list")]
    pub auth_list: Vec<u8>,
}
