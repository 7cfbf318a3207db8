//! Configuration file support for twinlink CLI tools

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use twinlink::protocol::config::{
    DROP_PROBABILITY, LISTEN_BACKLOG, MAX_RETRIES, REASSEMBLY_CAPACITY, RETRANSMISSION_TIMEOUT,
};
use twinlink::protocol::PACKET_SIZE;
use twinlink::ProtocolConfig;

/// Default receiver port
pub const DEFAULT_PORT: u16 = 12500;

/// Default receiver address
pub fn default_address() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

/// Sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Input file, or "-" for stdin
    #[serde(default = "default_input")]
    pub input: String,
    /// Receiver address both channels connect to
    #[serde(default = "default_address")]
    pub address: SocketAddr,
}

fn default_input() -> String {
    "input.txt".to_string()
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            input: default_input(),
            address: default_address(),
        }
    }
}

/// Receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Output file, or "-" for stdout
    #[serde(default = "default_output")]
    pub output: String,
    /// Listen address
    #[serde(default = "default_address")]
    pub listen: SocketAddr,
}

fn default_output() -> String {
    "output.txt".to_string()
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            output: default_output(),
            listen: default_address(),
        }
    }
}

/// Protocol parameters as written in the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSection {
    /// Payload bytes per packet; both peers must agree
    pub payload_size: usize,
    /// Retransmission timeout in milliseconds
    pub timeout_ms: u64,
    /// Transmissions of one packet before giving up
    pub max_retries: u32,
    /// Out-of-order packets the receiver holds
    pub reassembly_capacity: usize,
    /// Simulated drop probability at the receiver
    pub drop_probability: f64,
    /// Listen backlog
    pub listen_backlog: i32,
    /// Seed for loss simulation and timer tie-breaks
    pub seed: Option<u64>,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        ProtocolSection {
            payload_size: PACKET_SIZE,
            timeout_ms: RETRANSMISSION_TIMEOUT.as_millis() as u64,
            max_retries: MAX_RETRIES,
            reassembly_capacity: REASSEMBLY_CAPACITY,
            drop_probability: DROP_PROBABILITY,
            listen_backlog: LISTEN_BACKLOG,
            seed: None,
        }
    }
}

impl ProtocolSection {
    /// Get retransmission timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Convert to a validated protocol configuration
    pub fn to_protocol_config(&self) -> Result<ProtocolConfig, ConfigError> {
        let config = ProtocolConfig {
            payload_size: self.payload_size,
            retransmission_timeout: self.timeout(),
            max_retries: self.max_retries,
            reassembly_capacity: self.reassembly_capacity,
            drop_probability: self.drop_probability,
            listen_backlog: self.listen_backlog,
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sender configuration
    pub sender: Option<SenderConfig>,
    /// Receiver configuration
    pub receiver: Option<ReceiverConfig>,
    /// Protocol parameters
    #[serde(default)]
    pub protocol: ProtocolSection,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Config::from_file(path),
            None => Ok(Config::default()),
        }
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Create example sender configuration
    pub fn example_sender() -> Self {
        Config {
            sender: Some(SenderConfig::default()),
            receiver: None,
            protocol: ProtocolSection::default(),
        }
    }

    /// Create example receiver configuration
    pub fn example_receiver() -> Self {
        Config {
            sender: None,
            receiver: Some(ReceiverConfig::default()),
            protocol: ProtocolSection {
                seed: Some(42),
                ..ProtocolSection::default()
            },
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] twinlink::protocol::ConfigError),
}
