//! Runtime configuration
//!
//! Loading from disk is the embedder's job; the struct round-trips through
//! TOML and every field has a default.

use serde::{Deserialize, Serialize};

use crate::dht::retry::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bootstrap directory server (`host[:port]`), if any.
    #[serde(default)]
    pub bootstrap_server: Option<String>,

    /// Multi-address advertised in bootstrap posts.
    #[serde(default = "default_advertise_addr")]
    pub advertise_addr: String,

    /// Timeout for a single peer request, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Retry policy for receives whose precondition record is missing.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_advertise_addr() -> String {
    "/ip4/127.0.0.1/tcp/4141".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bootstrap_server: None,
            advertise_addr: default_advertise_addr(),
            request_timeout_ms: default_request_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}
