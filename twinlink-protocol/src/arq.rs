//! Per-channel stop-and-wait ARQ state machine (sender side)
//!
//! ```text
//!            draw + transmit
//!  Sending ------------------> AwaitingAck --timeout--> AwaitingAck (retransmit)
//!     ^                             |
//!     +------ matching ack ---------+----- ack of last / source exhausted ---> Done
//! ```
//!
//! `Sending` is momentary. The machine only manages state; transmitting the
//! packets it returns and arming the channel's deadline is the caller's job.

use crate::packet::{ChannelId, Packet};
use crate::source::{ChunkSource, SourceError};
use std::io::Read;
use thiserror::Error;
use tracing::debug;

/// ARQ state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqState {
    /// About to draw and send the next packet
    Sending,
    /// Packet in flight, waiting for its acknowledgement or timeout
    AwaitingAck,
    /// No further packets on this channel
    Done,
}

/// ARQ errors
#[derive(Error, Debug)]
pub enum ArqError {
    #[error("Channel {channel}: no acknowledgement after {attempts} transmissions of seq {sequence}")]
    RetryExhausted {
        channel: ChannelId,
        sequence: u32,
        attempts: u32,
    },

    #[error("Channel {channel}: {event} not valid in state {state:?}")]
    InvalidState {
        channel: ChannelId,
        state: ArqState,
        event: &'static str,
    },

    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

/// Outcome of feeding an acknowledgement to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Acknowledged; this next packet must be transmitted
    Next(Packet),
    /// Acknowledged; the channel is done
    Finished,
    /// Does not acknowledge the packet in flight; ignored
    Stale,
}

/// Per-channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArqStats {
    /// Distinct packets sent
    pub packets_sent: u64,
    /// Retransmissions after a timeout
    pub retransmissions: u64,
    /// Matching acknowledgements
    pub acks: u64,
    /// Acknowledgements that matched nothing in flight
    pub stale_acks: u64,
    /// Payload bytes acknowledged
    pub bytes_acked: u64,
}

/// Stop-and-wait state for one channel
#[derive(Debug)]
pub struct ChannelArq {
    channel: ChannelId,
    state: ArqState,
    retry_count: u32,
    max_retries: u32,
    current: Option<Packet>,
    stats: ArqStats,
}

impl ChannelArq {
    pub fn new(channel: ChannelId, max_retries: u32) -> Self {
        ChannelArq {
            channel,
            state: ArqState::Sending,
            retry_count: 0,
            max_retries,
            current: None,
            stats: ArqStats::default(),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn state(&self) -> ArqState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == ArqState::Done
    }

    /// Transmissions of the packet in flight so far
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Last packet sent, retained for retransmission
    pub fn current_packet(&self) -> Option<&Packet> {
        self.current.as_ref()
    }

    pub fn stats(&self) -> ArqStats {
        self.stats
    }

    /// Perform the `Sending` transition
    ///
    /// Draws the next fragment from the shared source and returns it for
    /// transmission, or moves to `Done` when the source is exhausted.
    pub fn send_next<R: Read>(
        &mut self,
        source: &mut ChunkSource<R>,
    ) -> Result<Option<Packet>, ArqError> {
        if self.state != ArqState::Sending {
            return Err(self.invalid("send"));
        }

        match source.next_packet(self.channel)? {
            Some(packet) => {
                self.retry_count = 1;
                self.state = ArqState::AwaitingAck;
                self.stats.packets_sent += 1;
                self.current = Some(packet.clone());
                Ok(Some(packet))
            }
            None => {
                debug!("Channel {}: source exhausted, done", self.channel);
                self.finish();
                Ok(None)
            }
        }
    }

    /// The channel's deadline elapsed without an acknowledgement
    ///
    /// Returns the unchanged packet to retransmit, or `RetryExhausted` once it
    /// has been transmitted `max_retries` times.
    pub fn on_timeout(&mut self) -> Result<Packet, ArqError> {
        if self.state != ArqState::AwaitingAck {
            return Err(self.invalid("timeout"));
        }
        let packet = self.current.clone().ok_or_else(|| self.invalid("timeout"))?;

        if self.retry_count >= self.max_retries {
            return Err(ArqError::RetryExhausted {
                channel: self.channel,
                sequence: packet.sequence,
                attempts: self.retry_count,
            });
        }

        self.retry_count += 1;
        self.stats.retransmissions += 1;
        Ok(packet)
    }

    /// An acknowledgement arrived on this channel
    ///
    /// Only an ack echoing the sequence in flight counts; anything else is
    /// reported as `Stale`. After a matching ack the channel either finishes
    /// (the packet was last, or the shared source has nothing left) or
    /// immediately sends the next packet.
    pub fn on_ack<R: Read>(
        &mut self,
        ack: &Packet,
        source: &mut ChunkSource<R>,
    ) -> Result<AckOutcome, ArqError> {
        let matches = self.state == ArqState::AwaitingAck
            && ack.is_ack()
            && ack.channel == self.channel
            && self
                .current
                .as_ref()
                .map_or(false, |current| current.sequence == ack.sequence);

        if !matches {
            self.stats.stale_acks += 1;
            return Ok(AckOutcome::Stale);
        }

        self.stats.acks += 1;
        let acked_last = match &self.current {
            Some(current) => {
                self.stats.bytes_acked += current.payload.len() as u64;
                current.is_last
            }
            None => false,
        };

        if acked_last {
            self.finish();
            return Ok(AckOutcome::Finished);
        }

        self.retry_count = 0;
        self.state = ArqState::Sending;
        match self.send_next(source)? {
            Some(packet) => Ok(AckOutcome::Next(packet)),
            None => Ok(AckOutcome::Finished),
        }
    }

    fn finish(&mut self) {
        self.state = ArqState::Done;
        self.retry_count = 0;
    }

    fn invalid(&self, event: &'static str) -> ArqError {
        ArqError::InvalidState {
            channel: self.channel,
            state: self.state,
            event,
        }
    }
}
