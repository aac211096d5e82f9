//! Client configuration.

use std::time::Duration;

use tracing::warn;

use crate::ipc::framing::MAX_MESSAGE_SIZE;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Environment variable overriding the request timeout (whole seconds).
pub const TIMEOUT_ENV: &str = "JRPC_PIPE_TIMEOUT_SECS";

/// Environment variable overriding the maximum message size (bytes).
pub const MAX_MESSAGE_SIZE_ENV: &str = "JRPC_PIPE_MAX_MESSAGE_SIZE";

/// Per-client settings.
///
/// The timeout applies to every call issued by one client; there is no
/// per-call override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long `invoke` waits for a reply. Default 20 seconds.
    pub timeout: Duration,
    /// Largest message accepted in either direction. Default 100MB.
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Defaults, overridden by `JRPC_PIPE_TIMEOUT_SECS` and
    /// `JRPC_PIPE_MAX_MESSAGE_SIZE` when set. Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = parse_var(&lookup, TIMEOUT_ENV) {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parse_var(&lookup, MAX_MESSAGE_SIZE_ENV) {
            config.max_message_size = size;
        }

        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}
