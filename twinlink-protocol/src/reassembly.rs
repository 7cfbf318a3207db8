//! Receiver-side reassembly
//!
//! Fragments from both channels share one global byte offset. A fragment that
//! starts exactly at `expected_offset` is written straight to the output sink;
//! one that starts further ahead waits in a small sorted buffer until the gap
//! before it has been filled. Fragments below `expected_offset` are
//! retransmissions of data already written and are discarded.

use crate::packet::Packet;
use std::io::{self, Write};
use thiserror::Error;
use tracing::debug;

/// Buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Reassembly buffer is full ({capacity} packets)")]
    Full { capacity: usize },
}

/// Reassembly errors
#[derive(Error, Debug)]
pub enum ReassemblyError {
    #[error("Output write failed: {0}")]
    Io(#[from] io::Error),

    #[error("Expected a data packet, got an acknowledgement for seq {0}")]
    UnexpectedAck(u32),
}

/// Result of a buffer insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// Packet stored at its sorted position
    Stored,
    /// A packet with the same sequence is already held
    AlreadyBuffered,
}

/// Bounded holding area for fragments that arrived ahead of the write offset
///
/// Kept sorted by sequence, ascending.
#[derive(Debug, Clone)]
pub struct ReassemblyBuffer {
    packets: Vec<Packet>,
    capacity: usize,
}

impl ReassemblyBuffer {
    pub fn new(capacity: usize) -> Self {
        ReassemblyBuffer {
            packets: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.packets.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a fragment starting at `sequence` is held
    pub fn contains(&self, sequence: u32) -> bool {
        self.packets
            .binary_search_by_key(&sequence, |p| p.sequence)
            .is_ok()
    }

    /// Sequences currently held, ascending
    pub fn sequences(&self) -> Vec<u32> {
        self.packets.iter().map(|p| p.sequence).collect()
    }

    /// Insert a fragment at its sorted position
    pub fn insert(&mut self, packet: Packet) -> Result<Insertion, BufferError> {
        match self
            .packets
            .binary_search_by_key(&packet.sequence, |p| p.sequence)
        {
            Ok(_) => Ok(Insertion::AlreadyBuffered),
            Err(_) if self.is_full() => Err(BufferError::Full {
                capacity: self.capacity,
            }),
            Err(pos) => {
                self.packets.insert(pos, packet);
                Ok(Insertion::Stored)
            }
        }
    }

    /// Remove and return the run of fragments contiguous from `offset`
    ///
    /// Only the fragments actually consumed are removed; anything still
    /// separated from the run by a gap stays buffered for a later drain.
    /// Fragments that start below the final offset of the run can never be
    /// written and are discarded.
    pub fn drain_contiguous(&mut self, offset: u64) -> Vec<Packet> {
        let mut next = offset;
        let mut run = Vec::new();

        while let Some(pos) = self
            .packets
            .iter()
            .position(|p| p.sequence as u64 == next)
        {
            let packet = self.packets.remove(pos);
            next = packet.end_offset();
            let is_last = packet.is_last;
            run.push(packet);
            if is_last {
                break;
            }
        }

        let before = self.packets.len();
        self.packets.retain(|p| p.sequence as u64 >= next);
        if self.packets.len() != before {
            debug!(
                "Discarded {} stale buffered fragments below offset {}",
                before - self.packets.len(),
                next
            );
        }

        run
    }
}

/// What happened to an inbound data packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    /// Already written; discarded without acknowledgement
    Duplicate,
    /// Written in order, together with `flushed` buffered fragments
    Delivered {
        ack: Packet,
        flushed: usize,
        complete: bool,
    },
    /// Held for later; acknowledged
    Buffered { ack: Packet },
    /// Ahead of the write offset but the buffer is full; not acknowledged
    Rejected,
}

impl Arrival {
    /// Acknowledgement to send back, if any
    pub fn ack(&self) -> Option<&Packet> {
        match self {
            Arrival::Delivered { ack, .. } | Arrival::Buffered { ack } => Some(ack),
            Arrival::Duplicate | Arrival::Rejected => None,
        }
    }
}

/// Reassembly counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Fragments written directly on arrival
    pub delivered_in_order: u64,
    /// Fragments written from the buffer
    pub delivered_from_buffer: u64,
    /// Fragments stored in the buffer
    pub buffered: u64,
    /// Retransmissions discarded (already written or already buffered)
    pub duplicates: u64,
    /// Fragments refused because the buffer was full
    pub rejected_full: u64,
    /// Bytes written to the sink
    pub bytes_written: u64,
    /// Highest simultaneous buffer occupancy
    pub peak_buffered: usize,
}

/// Receiver reassembly state: write offset, buffer and output sink
pub struct ReassemblyContext<W> {
    sink: W,
    buffer: ReassemblyBuffer,
    expected_offset: u64,
    last_offset: Option<u64>,
    complete: bool,
    stats: ReassemblyStats,
}

impl<W: Write> ReassemblyContext<W> {
    pub fn new(sink: W, capacity: usize) -> Self {
        ReassemblyContext {
            sink,
            buffer: ReassemblyBuffer::new(capacity),
            expected_offset: 0,
            last_offset: None,
            complete: false,
            stats: ReassemblyStats::default(),
        }
    }

    /// Offset of the next byte to be written
    pub fn expected_offset(&self) -> u64 {
        self.expected_offset
    }

    /// Sequence of the last fragment, once it has been written
    pub fn last_offset(&self) -> Option<u64> {
        self.last_offset
    }

    /// True once the last fragment has been written
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn buffer(&self) -> &ReassemblyBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    /// Flush and recover the output sink
    pub fn into_sink(mut self) -> io::Result<W> {
        self.sink.flush()?;
        Ok(self.sink)
    }

    /// Process one data packet that survived loss simulation
    pub fn accept(&mut self, packet: Packet) -> Result<Arrival, ReassemblyError> {
        if packet.is_ack() {
            return Err(ReassemblyError::UnexpectedAck(packet.sequence));
        }

        let sequence = packet.sequence as u64;

        if self.complete || sequence < self.expected_offset {
            self.stats.duplicates += 1;
            return Ok(Arrival::Duplicate);
        }

        if sequence > self.expected_offset {
            let ack = packet.ack_for();
            return match self.buffer.insert(packet) {
                Ok(Insertion::Stored) => {
                    self.stats.buffered += 1;
                    self.stats.peak_buffered = self.stats.peak_buffered.max(self.buffer.len());
                    Ok(Arrival::Buffered { ack })
                }
                Ok(Insertion::AlreadyBuffered) => {
                    self.stats.duplicates += 1;
                    Ok(Arrival::Buffered { ack })
                }
                Err(BufferError::Full { .. }) => {
                    self.stats.rejected_full += 1;
                    Ok(Arrival::Rejected)
                }
            };
        }

        let mut ack = packet.ack_for();
        self.write(&packet)?;
        self.stats.delivered_in_order += 1;

        let run = if self.complete {
            Vec::new()
        } else {
            self.buffer.drain_contiguous(self.expected_offset)
        };
        let flushed = run.len();
        for buffered in &run {
            self.write(buffered)?;
            self.stats.delivered_from_buffer += 1;
        }

        if self.complete {
            self.sink.flush()?;
            ack.is_last = true;
        }

        Ok(Arrival::Delivered {
            ack,
            flushed,
            complete: self.complete,
        })
    }

    fn write(&mut self, packet: &Packet) -> io::Result<()> {
        self.sink.write_all(&packet.payload)?;
        self.expected_offset = packet.end_offset();
        self.stats.bytes_written += packet.payload.len() as u64;
        if packet.is_last {
            self.last_offset = Some(packet.sequence as u64);
            self.complete = true;
        }
        Ok(())
    }
}
