//! twinlink - dual-channel reliable file transfer
//!
//! A sender splits a byte stream into fixed-size fragments keyed by their
//! global byte offset and spreads them over two TCP channels, each running
//! its own stop-and-wait ARQ. The receiver reassembles the fragments in
//! offset order, tolerating a small amount of cross-channel reordering.
//!
//! ```no_run
//! use twinlink::{ProtocolConfig, SenderSession};
//! use std::fs::File;
//!
//! let input = File::open("payload.bin")?;
//! let session = SenderSession::connect("127.0.0.1:9000".parse()?, input, ProtocolConfig::default())?;
//! let report = session.run()?;
//! println!("sent {} bytes", report.bytes_sent);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use twinlink_io as io;
pub use twinlink_protocol as protocol;

pub mod error;
pub mod receiver;
pub mod sender;

pub use error::TransferError;
pub use receiver::{ReceiverReport, ReceiverSession};
pub use sender::{SenderReport, SenderSession};

// Re-export commonly used types
pub use protocol::{ChannelId, Packet, PacketCodec, ProtocolConfig};
