//! Blockd Client Configuration
//!
//! This module provides configuration structures for clients talking to
//! one or more blockd lock servers.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::protocol::{CodecKind, GREETING, MAX_MESSAGE_BYTES};

/// Main blockd client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockdConfig {
    /// Lock server nodes, in registration order
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    /// Per-connection client settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One lock server node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Host name or IP address
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Per-connection client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Wire encoding (text or json)
    #[serde(default)]
    pub codec: CodecKind,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long QUIT waits for the server's acknowledgement
    #[serde(default = "default_quit_ack_timeout_ms")]
    pub quit_ack_timeout_ms: u64,

    /// Upper bound on the wait after LOCKPENDING (unset = wait for the server)
    #[serde(default)]
    pub pending_wait_ms: Option<u64>,

    /// Token the server must send first
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Maximum inbound message size in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_port() -> u16 {
    11311
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_quit_ack_timeout_ms() -> u64 {
    1000
}

fn default_greeting() -> String {
    GREETING.to_string()
}

fn default_max_message_bytes() -> usize {
    MAX_MESSAGE_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            quit_ack_timeout_ms: default_quit_ack_timeout_ms(),
            pending_wait_ms: None,
            greeting: default_greeting(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl NodeConfig {
    /// Create a node entry
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Parse `host:port`; a bare host gets the default port
    pub fn parse(address: &str) -> crate::Result<Self> {
        match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    crate::Error::Config(format!("invalid port in node address {:?}", address))
                })?;
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(address, default_port())),
        }
    }

    /// `host:port` form used for dialing and logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn quit_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.quit_ack_timeout_ms)
    }

    pub fn pending_wait(&self) -> Option<Duration> {
        self.pending_wait_ms.map(Duration::from_millis)
    }
}

impl BlockdConfig {
    /// Build a configuration for the given nodes with default settings
    pub fn with_nodes(nodes: Vec<NodeConfig>) -> Self {
        Self {
            nodes,
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: BlockdConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.nodes.is_empty() {
            return Err(crate::Error::Config("at least one node is required".into()));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.host.is_empty() {
                return Err(crate::Error::Config("node host cannot be empty".into()));
            }
            if node.port == 0 {
                return Err(crate::Error::Config(format!("node {} has port 0", node.host)));
            }
            if !seen.insert(node.address()) {
                return Err(crate::Error::Config(format!(
                    "node {} is listed more than once",
                    node.address()
                )));
            }
        }

        if self.client.greeting.is_empty() {
            return Err(crate::Error::Config("client.greeting cannot be empty".into()));
        }

        if self.client.max_message_bytes == 0 {
            return Err(crate::Error::Config("client.max_message_bytes must be positive".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let config = BlockdConfig::from_str(
            r#"
            [[nodes]]
            host = "10.0.0.1"
            port = 11311

            [[nodes]]
            host = "10.0.0.2"

            [client]
            codec = "json"
            pending_wait_ms = 2500

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1].port, 11311);
        assert_eq!(config.client.codec, CodecKind::Json);
        assert_eq!(config.client.pending_wait(), Some(Duration::from_millis(2500)));
        assert_eq!(config.client.greeting, GREETING);
        assert_eq!(config.client.max_message_bytes, 1024);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_validation_rejects_bad_nodes() {
        assert!(BlockdConfig::from_str("").is_err());

        let duplicate = r#"
            [[nodes]]
            host = "a"
            [[nodes]]
            host = "a"
        "#;
        assert!(matches!(
            BlockdConfig::from_str(duplicate),
            Err(crate::Error::Config(_))
        ));

        let zero_port = BlockdConfig::with_nodes(vec![NodeConfig::new("a", 0)]);
        assert!(zero_port.validate().is_err());
    }

    #[test]
    fn test_node_address_parsing() {
        let node = NodeConfig::parse("localhost:4000").unwrap();
        assert_eq!(node, NodeConfig::new("localhost", 4000));
        assert_eq!(node.address(), "localhost:4000");

        assert_eq!(NodeConfig::parse("localhost").unwrap().port, 11311);
        assert!(NodeConfig::parse("localhost:notaport").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[nodes]]\nhost = \"127.0.0.1\"\nport = 9999").unwrap();

        let config = BlockdConfig::from_file(file.path()).unwrap();
        assert_eq!(config.nodes, vec![NodeConfig::new("127.0.0.1", 9999)]);
        assert_eq!(config.client.codec, CodecKind::Text);
    }
}
