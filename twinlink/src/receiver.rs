//! Receiver orchestrator
//!
//! Accepts fragments from both channels, runs each through the loss
//! simulator, feeds survivors to the reassembly context and acknowledges on
//! the channel the fragment arrived on. The receiver has no timers: it waits
//! until a channel is readable.

use crate::error::TransferError;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use twinlink_io::{ChannelListener, LinkEvent, LinkFailure, LinkSet, Readiness};
use twinlink_protocol::{
    Arrival, LossSimulator, LossStats, PacketCodec, ProtocolConfig,
    ReassemblyContext, ReassemblyStats,
};

/// Summary of a completed receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverReport {
    /// Bytes written to the output, equal to the input size
    pub bytes_written: u64,
    /// Frames read from both channels, dropped ones included
    pub packets_received: u64,
    pub acks_sent: u64,
    pub reassembly: ReassemblyStats,
    pub loss: LossStats,
    pub elapsed: Duration,
}

/// One file transfer, receiving side
pub struct ReceiverSession<W> {
    context: ReassemblyContext<W>,
    loss: LossSimulator,
    links: LinkSet,
    packets_received: u64,
    acks_sent: u64,
}

impl<W: Write> ReceiverSession<W> {
    /// Accept both channels of one sender on `listener`
    pub fn accept(
        listener: &ChannelListener,
        output: W,
        config: ProtocolConfig,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        let codec = PacketCodec::new(config.payload_size)?;
        let streams = listener.accept_channels()?;
        let links = LinkSet::from_tcp(streams, codec).map_err(twinlink_io::SocketError::from)?;
        ReceiverSession::new(output, links, config)
    }

    /// Create a session over already established links
    pub fn new(output: W, links: LinkSet, config: ProtocolConfig) -> Result<Self, TransferError> {
        config.validate()?;
        let loss = match config.seed {
            Some(seed) => LossSimulator::seeded(config.drop_probability, seed),
            None => LossSimulator::from_entropy(config.drop_probability),
        };

        Ok(ReceiverSession {
            context: ReassemblyContext::new(output, config.reassembly_capacity),
            loss,
            links,
            packets_received: 0,
            acks_sent: 0,
        })
    }

    /// Run until the last fragment has been written
    ///
    /// Returns the report together with the flushed output.
    pub fn run(mut self) -> Result<(ReceiverReport, W), TransferError> {
        let started = Instant::now();
        info!(
            "Receiving (drop probability {:.2}, reassembly capacity {})",
            self.loss.probability(),
            self.context.buffer().capacity()
        );

        while !self.context.is_complete() {
            match self.links.wait(None) {
                Readiness::Ready(events) => {
                    for event in events {
                        self.handle_event(event)?;
                        if self.context.is_complete() {
                            break;
                        }
                    }
                }
                Readiness::TimedOut => {}
                Readiness::Closed { last } => {
                    return Err(TransferError::PeerClosed { channel: last })
                }
            }
        }

        let report = ReceiverReport {
            bytes_written: self.context.stats().bytes_written,
            packets_received: self.packets_received,
            acks_sent: self.acks_sent,
            reassembly: self.context.stats(),
            loss: self.loss.stats(),
            elapsed: started.elapsed(),
        };
        info!(
            "Transfer complete: {} bytes written, {} simulated drops",
            report.bytes_written, report.loss.dropped
        );

        let output = self.context.into_sink().map_err(TransferError::Sink)?;
        Ok((report, output))
    }

    fn handle_event(&mut self, event: LinkEvent) -> Result<(), TransferError> {
        let channel = event.channel;
        let packet = event
            .inbound
            .map_err(|source| LinkFailure { channel, source })?;
        self.packets_received += 1;

        if self.loss.should_drop() {
            debug!("Simulated drop of seq {} on channel {}", packet.sequence, channel);
            return Ok(());
        }

        if !packet.is_data() {
            warn!(
                "Channel {}: ignoring {} packet seq {}",
                channel, packet.kind, packet.sequence
            );
            return Ok(());
        }
        if packet.channel != channel {
            warn!(
                "Data seq {} marked channel {} arrived on channel {}",
                packet.sequence, packet.channel, channel
            );
            return Ok(());
        }

        let sequence = packet.sequence;
        info!(
            "Received seq {} on channel {} ({} bytes{})",
            sequence,
            channel,
            packet.payload.len(),
            if packet.is_last { ", last" } else { "" }
        );

        let arrival = self.context.accept(packet)?;
        match &arrival {
            Arrival::Duplicate => debug!("Duplicate seq {} discarded", sequence),
            Arrival::Rejected => debug!(
                "Reassembly buffer full, seq {} dropped (expecting {})",
                sequence,
                self.context.expected_offset()
            ),
            Arrival::Buffered { .. } => info!(
                "Buffered seq {} (expecting {}, {} held)",
                sequence,
                self.context.expected_offset(),
                self.context.buffer().len()
            ),
            Arrival::Delivered { flushed, .. } if *flushed > 0 => info!(
                "Wrote seq {} and {} buffered, next offset {}",
                sequence,
                flushed,
                self.context.expected_offset()
            ),
            Arrival::Delivered { .. } => {}
        }

        if let Some(ack) = arrival.ack() {
            self.links.send(channel, ack)?;
            self.acks_sent += 1;
            info!(
                "Acknowledged seq {} on channel {}{}",
                ack.sequence,
                channel,
                if ack.is_last { " (last)" } else { "" }
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::{self, Cursor};
    use crossbeam::channel::{unbounded, Receiver, Sender};
    use twinlink_io::{FrameReader, LinkError};
    use twinlink_protocol::{ChannelId, Packet};

    /// Collects whatever the session writes back, per channel
    struct Capture(Sender<Vec<u8>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let _ = self.0.send(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn encode(packets: &[Packet]) -> Vec<u8> {
        let codec = PacketCodec::default();
        packets
            .iter()
            .flat_map(|p| codec.encode(p).unwrap().to_vec())
            .collect()
    }

    fn lossless() -> ProtocolConfig {
        ProtocolConfig {
            drop_probability: 0.0,
            seed: Some(1),
            ..ProtocolConfig::default()
        }
    }

    fn acks(rx: Receiver<Vec<u8>>) -> Vec<Packet> {
        let bytes: Vec<u8> = rx.try_iter().flatten().collect();
        let mut frames = FrameReader::new(Cursor::new(bytes), PacketCodec::default());
        let mut packets = Vec::new();
        loop {
            match frames.read_packet() {
                Ok(packet) => packets.push(packet),
                Err(LinkError::PeerClosed) => break,
                Err(e) => panic!("bad ack stream: {}", e),
            }
        }
        packets
    }

    #[test]
    fn test_reordered_fragments_reassembled() {
        let data: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let p0 = Packet::data(0, ChannelId::ZERO, Bytes::copy_from_slice(&data[..100]), false);
        let p1 = Packet::data(100, ChannelId::ONE, Bytes::copy_from_slice(&data[100..200]), false);
        let p2 = Packet::data(200, ChannelId::ONE, Bytes::copy_from_slice(&data[200..]), true);

        // Channel 1 delivers ahead of channel 0; duplicate of 0 at the end
        let zero = encode(&[p0.clone(), p0.clone()]);
        let one = encode(&[p1.clone(), p2.clone()]);

        let (tx0, rx0) = unbounded();
        let (tx1, rx1) = unbounded();
        let links = LinkSet::new(
            [
                (Cursor::new(zero), Capture(tx0)),
                (Cursor::new(one), Capture(tx1)),
            ],
            PacketCodec::default(),
        )
        .unwrap();

        let (report, output) = ReceiverSession::new(Vec::new(), links, lossless())
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(output, data);
        assert_eq!(report.bytes_written, 250);

        let acks0 = acks(rx0);
        let acks1 = acks(rx1);
        assert_eq!(acks0.first().map(|a| a.sequence), Some(0));
        let mut sequences: Vec<u32> = acks1.iter().map(|a| a.sequence).collect();
        sequences.sort();
        assert_eq!(sequences, vec![100, 200]);
        assert!(acks0.iter().chain(&acks1).any(|a| a.is_last));
    }

    #[test]
    fn test_peer_closing_early_is_fatal() {
        let partial = encode(&[Packet::data(
            0,
            ChannelId::ZERO,
            Bytes::from(vec![0u8; 100]),
            false,
        )]);
        let links = LinkSet::new(
            [
                (Cursor::new(partial), Vec::new()),
                (Cursor::new(Vec::new()), Vec::new()),
            ],
            PacketCodec::default(),
        )
        .unwrap();

        let err = ReceiverSession::new(Vec::new(), links, lossless())
            .unwrap()
            .run()
            .unwrap_err();
        assert!(matches!(err, TransferError::PeerClosed { .. }));
    }
}
