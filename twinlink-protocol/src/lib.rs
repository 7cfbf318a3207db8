//! twinlink Protocol Core
//!
//! This crate implements the transfer protocol that moves one file over two
//! parallel byte-stream channels: the fixed-size packet codec, the shared
//! byte-offset source, the per-channel stop-and-wait ARQ machine, the
//! cross-channel timer multiplexer, receiver reassembly and loss simulation.
//!
//! Nothing here performs network I/O; the orchestrators in the `twinlink`
//! crate drive these state machines from their control loops.

pub mod arq;
pub mod config;
pub mod loss;
pub mod packet;
pub mod reassembly;
pub mod source;
pub mod timer;

pub use arq::{AckOutcome, ArqError, ArqState, ArqStats, ChannelArq};
pub use config::{ConfigError, ProtocolConfig};
pub use loss::{LossSimulator, LossStats};
pub use packet::{
    ChannelId, Packet, PacketCodec, PacketError, PacketKind, CHANNEL_COUNT, HEADER_SIZE,
    PACKET_SIZE,
};
pub use reassembly::{
    Arrival, BufferError, Insertion, ReassemblyBuffer, ReassemblyContext, ReassemblyError,
    ReassemblyStats,
};
pub use source::{ChunkSource, SourceError};
pub use timer::{Deadline, TimerMux, Wakeup};
