//! Transfer-level errors
//!
//! Every failure below is fatal to the transfer. Retransmission timeouts are
//! not errors; only running out of retries is.

use std::io;
use thiserror::Error;
use twinlink_io::{LinkError, LinkFailure, SocketError};
use twinlink_protocol::{
    ArqError, ChannelId, ConfigError, PacketError, ReassemblyError, SourceError,
};

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transport setup failed: {0}")]
    Setup(#[from] SocketError),

    #[error("Transport I/O failed on channel {channel}: {source}")]
    TransportIo { channel: ChannelId, source: io::Error },

    #[error("Peer closed channel {channel}")]
    PeerClosed { channel: ChannelId },

    #[error("Retries exhausted on channel {channel}: seq {sequence} sent {attempts} times")]
    RetryExhausted {
        channel: ChannelId,
        sequence: u32,
        attempts: u32,
    },

    #[error("Malformed packet on channel {channel}: {source}")]
    MalformedPacket {
        channel: ChannelId,
        source: PacketError,
    },

    #[error("Input read failed: {0}")]
    Source(#[from] SourceError),

    #[error("Output write failed: {0}")]
    Sink(#[source] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid packet layout: {0}")]
    Codec(#[from] PacketError),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransferError {
    /// Channel the failure is attributed to, if any
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            TransferError::TransportIo { channel, .. }
            | TransferError::PeerClosed { channel }
            | TransferError::RetryExhausted { channel, .. }
            | TransferError::MalformedPacket { channel, .. } => Some(*channel),
            _ => None,
        }
    }
}

impl From<LinkFailure> for TransferError {
    fn from(failure: LinkFailure) -> Self {
        let channel = failure.channel;
        match failure.source {
            LinkError::Io(source) => TransferError::TransportIo { channel, source },
            LinkError::PeerClosed => TransferError::PeerClosed { channel },
            LinkError::Malformed(source) => TransferError::MalformedPacket { channel, source },
        }
    }
}

impl From<ArqError> for TransferError {
    fn from(err: ArqError) -> Self {
        match err {
            ArqError::RetryExhausted {
                channel,
                sequence,
                attempts,
            } => TransferError::RetryExhausted {
                channel,
                sequence,
                attempts,
            },
            ArqError::Source(source) => TransferError::Source(source),
            other @ ArqError::InvalidState { .. } => TransferError::Protocol(other.to_string()),
        }
    }
}

impl From<ReassemblyError> for TransferError {
    fn from(err: ReassemblyError) -> Self {
        match err {
            ReassemblyError::Io(source) => TransferError::Sink(source),
            other @ ReassemblyError::UnexpectedAck(_) => TransferError::Protocol(other.to_string()),
        }
    }
}
