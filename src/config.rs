//! Client configuration.

use std::time::Duration;

use crate::core::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_DATAGRAM_BUFFER, DEFAULT_STREAM_BUFFER};

/// Session client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on waiting for readiness in `connect`.
    pub connect_timeout: Duration,

    /// Capacity of the decoded-datagram broadcast channel.
    pub datagram_buffer: usize,

    /// Capacity of the stream-message broadcast channel.
    pub stream_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            datagram_buffer: DEFAULT_DATAGRAM_BUFFER,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the datagram broadcast capacity. Zero is raised to one.
    pub fn datagram_buffer(mut self, capacity: usize) -> Self {
        self.config.datagram_buffer = capacity.max(1);
        self
    }

    /// Set the stream-message broadcast capacity. Zero is raised to one.
    pub fn stream_buffer(mut self, capacity: usize) -> Self {
        self.config.stream_buffer = capacity.max(1);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.datagram_buffer, 64);
        assert_eq!(config.stream_buffer, 256);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder()
            .connect_timeout(Duration::from_millis(250))
            .datagram_buffer(0)
            .stream_buffer(8)
            .build();
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.datagram_buffer, 1);
        assert_eq!(config.stream_buffer, 8);
    }
}
