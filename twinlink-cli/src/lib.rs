//! twinlink CLI Library
//!
//! Shared functionality for the twinlink command-line tools.

pub mod config;
pub mod logging;
pub mod stats;

pub use config::{Config, ConfigError, ProtocolSection, ReceiverConfig, SenderConfig};
pub use logging::init_logging;
pub use stats::{display_receiver_report, display_sender_report, format_bandwidth, format_bytes};
