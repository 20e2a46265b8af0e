//! Bridge configuration.
//!
//! All knobs have conservative defaults; embedders typically construct a
//! [`BridgeConfig`] with the builder methods or load one from a TOML
//! fragment.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::Dimensions;

/// Default bound on transport connect attempts.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default readiness-poll interval for both pumps. This is a contract bound:
/// disconnects on either side are observed within one interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default transport read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Default capacity of the pump/relay event queues.
pub const DEFAULT_EVENT_CAPACITY: usize = 32;

/// Default TERM value requested for the SSH pseudo-terminal.
pub const DEFAULT_TERM: &str = "xterm";

/// Default program used for the exec-style attach.
pub const DEFAULT_ATTACH_PROGRAM: &str = "kubectl";

/// Configuration for a [`SessionBridge`](crate::bridge::SessionBridge).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bound on the whole connect attempt (dial, auth, shell setup).
    pub connect_timeout: Duration,

    /// Readiness-poll interval for the inbound pump and the shutdown checks
    /// of both pumps.
    pub poll_interval: Duration,

    /// Transport read buffer size in bytes.
    pub read_buffer_size: usize,

    /// Capacity of the internal event queues between pumps and orchestrator.
    pub event_capacity: usize,

    /// TERM value for the SSH pseudo-terminal.
    pub term: String,

    /// Fixed terminal geometry for SSH sessions.
    pub dimensions: Dimensions,

    /// Program spawned for exec-style attaches. The attach argument list
    /// itself is fixed; only the program path is configurable.
    pub attach_program: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            term: DEFAULT_TERM.to_string(),
            dimensions: Dimensions::default(),
            attach_program: DEFAULT_ATTACH_PROGRAM.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the transport read buffer size.
    #[must_use]
    pub const fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the TERM value.
    #[must_use]
    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    /// Set the SSH terminal geometry.
    #[must_use]
    pub const fn dimensions(mut self, cols: u16, rows: u16) -> Self {
        self.dimensions = Dimensions::new(cols, rows);
        self
    }

    /// Set the attach program path.
    #[must_use]
    pub fn attach_program(mut self, program: impl Into<String>) -> Self {
        self.attach_program = program.into();
        self
    }

    /// Parse a configuration from a TOML fragment. Absent keys keep their
    /// defaults.
    ///
    /// ```
    /// use shell_bridge::config::BridgeConfig;
    ///
    /// let config = BridgeConfig::from_toml_str(
    ///     "connect_timeout_secs = 5\npoll_interval_ms = 50\n",
    /// )
    /// .unwrap();
    /// assert_eq!(config.connect_timeout.as_secs(), 5);
    /// ```
    pub fn from_toml_str(input: &str) -> std::result::Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(input)?;
        let mut config = Self::default();
        if let Some(secs) = file.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = file.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(size) = file.read_buffer_size {
            config.read_buffer_size = size;
        }
        if let Some(capacity) = file.event_capacity {
            config.event_capacity = capacity;
        }
        if let Some(term) = file.term {
            config.term = term;
        }
        if let Some(cols) = file.cols {
            config.dimensions.cols = cols;
        }
        if let Some(rows) = file.rows {
            config.dimensions.rows = rows;
        }
        if let Some(program) = file.attach_program {
            config.attach_program = program;
        }
        Ok(config)
    }
}

/// On-disk representation accepted by [`BridgeConfig::from_toml_str`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    connect_timeout_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    read_buffer_size: Option<usize>,
    event_capacity: Option<usize>,
    term: Option<String>,
    cols: Option<u16>,
    rows: Option<u16>,
    attach_program: Option<String>,
}

/// A configuration fragment that could not be parsed.
#[derive(Debug, Error)]
#[error("failed to parse bridge config: {0}")]
pub struct ConfigError(#[from] toml::de::Error);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.term, "xterm");
        assert_eq!((config.dimensions.cols, config.dimensions.rows), (120, 40));
        assert_eq!(config.attach_program, "kubectl");
    }

    #[test]
    fn builder() {
        let config = BridgeConfig::new()
            .connect_timeout(Duration::from_secs(3))
            .poll_interval(Duration::from_millis(20))
            .term("vt100")
            .dimensions(80, 24)
            .attach_program("/usr/local/bin/kubectl");

        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.term, "vt100");
        assert_eq!(config.dimensions, Dimensions::new(80, 24));
        assert_eq!(config.attach_program, "/usr/local/bin/kubectl");
    }

    #[test]
    fn from_toml_partial() {
        let config = BridgeConfig::from_toml_str("rows = 50\nterm = \"screen\"\n").unwrap();
        assert_eq!(config.dimensions.rows, 50);
        assert_eq!(config.dimensions.cols, 120);
        assert_eq!(config.term, "screen");
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn from_toml_rejects_unknown_keys() {
        assert!(BridgeConfig::from_toml_str("shell = \"/bin/zsh\"\n").is_err());
    }

    #[test]
    fn from_toml_empty_is_default() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }
}
