//! twinlink I/O and Platform Abstraction
//!
//! This crate provides the transport collaborators of the protocol: TCP
//! channel establishment, fixed-size frame reading and writing, and the
//! readiness wait that multiplexes both channels for the control loops.

pub mod link;
pub mod socket;

pub use link::{FrameReader, FrameWriter, LinkError, LinkEvent, LinkFailure, LinkSet, Readiness};
pub use socket::{connect_channels, ChannelListener, SocketError};
