//! Protocol tuning parameters
//!
//! Both peers must agree on `payload_size`; every other knob is local to the
//! side that uses it.

use crate::packet::PACKET_SIZE;
use std::time::Duration;
use thiserror::Error;

/// Default retransmission timeout
pub const RETRANSMISSION_TIMEOUT: Duration = Duration::from_secs(2);

/// Default number of transmissions of one packet before the channel is
/// presumed broken
pub const MAX_RETRIES: u32 = 10;

/// Default receiver reassembly capacity in packets
pub const REASSEMBLY_CAPACITY: usize = 4;

/// Default simulated drop probability
pub const DROP_PROBABILITY: f64 = 0.10;

/// Default listen backlog
pub const LISTEN_BACKLOG: i32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolConfig {
    /// Payload capacity of one frame in bytes
    pub payload_size: usize,
    /// Time to wait for an acknowledgement before retransmitting
    pub retransmission_timeout: Duration,
    /// Transmissions of one packet (initial send included) before giving up
    pub max_retries: u32,
    /// Out-of-order packets the receiver holds
    pub reassembly_capacity: usize,
    /// Probability that the receiver discards an inbound packet
    pub drop_probability: f64,
    /// Pending-connection queue length of the receiver's listener
    pub listen_backlog: i32,
    /// Seed for the loss simulator and timer tie-break (entropy if `None`)
    pub seed: Option<u64>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            payload_size: PACKET_SIZE,
            retransmission_timeout: RETRANSMISSION_TIMEOUT,
            max_retries: MAX_RETRIES,
            reassembly_capacity: REASSEMBLY_CAPACITY,
            drop_probability: DROP_PROBABILITY,
            listen_backlog: LISTEN_BACKLOG,
            seed: None,
        }
    }
}

impl ProtocolConfig {
    /// Check that the parameters describe a workable protocol
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payload_size == 0 || u32::try_from(self.payload_size).is_err() {
            return Err(ConfigError::PayloadSize(self.payload_size));
        }
        if self.retransmission_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.reassembly_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !(0.0..=1.0).contains(&self.drop_probability) {
            return Err(ConfigError::DropProbability(self.drop_probability));
        }
        if self.listen_backlog <= 0 {
            return Err(ConfigError::Backlog(self.listen_backlog));
        }
        Ok(())
    }
}

/// Invalid protocol parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Payload size must be between 1 and {max} bytes, got {0}", max = u32::MAX)]
    PayloadSize(usize),

    #[error("Retransmission timeout must be non-zero")]
    ZeroTimeout,

    #[error("Max retries must be at least 1")]
    ZeroRetries,

    #[error("Reassembly capacity must be at least 1")]
    ZeroCapacity,

    #[error("Drop probability must be within [0, 1], got {0}")]
    DropProbability(f64),

    #[error("Listen backlog must be positive, got {0}")]
    Backlog(i32),
}
