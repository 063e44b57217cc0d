//! Configuration.
//!
//! Loads relay configuration from JSON strings/files (file IO left to the app).

use serde::{Deserialize, Serialize};

/// Default TCP+UDP port used when a hosting request specifies none.
pub const DEFAULT_PORT: u16 = 6121;

/// Protocol version literal clients must present at Connect.
pub const PROTOCOL_VERSION: &str = "revision 2";

/// Liveness tick period.
pub const PING_INTERVAL_MS: u64 = 5000;

/// Root relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Listen address, e.g. `0.0.0.0:6121`.
    pub bind_addr: String,
    /// String sent in the Connect success response.
    #[serde(default = "default_welcome")]
    pub welcome_message: String,
    /// Liveness tick period, in milliseconds.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Per-connection outbound-frame channel capacity.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_welcome() -> String {
    format!("Lacewing Relay Server ({})", PROTOCOL_VERSION)
}

fn default_ping_interval_ms() -> u64 {
    PING_INTERVAL_MS
}

fn default_outbound_capacity() -> usize {
    64
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            welcome_message: default_welcome(),
            ping_interval_ms: default_ping_interval_ms(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl RelayConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
