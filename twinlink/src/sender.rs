//! Sender orchestrator
//!
//! Owns the shared chunk source, one ARQ machine per channel, the timer
//! multiplexer and both links. The control loop blocks only in the links'
//! readiness wait, bounded by the nearest retransmission deadline.

use crate::error::TransferError;
use std::io::Read;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use twinlink_io::{connect_channels, LinkError, LinkEvent, LinkFailure, LinkSet, Readiness};
use twinlink_protocol::{
    AckOutcome, ArqStats, ChannelArq, ChannelId, ChunkSource, Packet, PacketCodec,
    ProtocolConfig, TimerMux, CHANNEL_COUNT,
};

/// Summary of a completed send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    /// Input bytes drawn and acknowledged
    pub bytes_sent: u64,
    /// Per-channel ARQ counters, index = channel id
    pub channels: [ArqStats; CHANNEL_COUNT],
    /// Deadline ties broken at random
    pub timer_ties: u64,
    pub elapsed: Duration,
}

impl SenderReport {
    pub fn packets_sent(&self) -> u64 {
        self.channels.iter().map(|c| c.packets_sent).sum()
    }

    pub fn retransmissions(&self) -> u64 {
        self.channels.iter().map(|c| c.retransmissions).sum()
    }

    pub fn acks(&self) -> u64 {
        self.channels.iter().map(|c| c.acks).sum()
    }

    pub fn stale_acks(&self) -> u64 {
        self.channels.iter().map(|c| c.stale_acks).sum()
    }
}

/// One file transfer, sending side
pub struct SenderSession<R> {
    config: ProtocolConfig,
    source: ChunkSource<R>,
    arqs: [ChannelArq; CHANNEL_COUNT],
    timers: TimerMux,
    links: LinkSet,
}

impl<R: Read> SenderSession<R> {
    /// Connect both channels to a listening receiver
    pub fn connect(
        addr: SocketAddr,
        input: R,
        config: ProtocolConfig,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        let codec = PacketCodec::new(config.payload_size)?;
        let streams = connect_channels(addr)?;
        let links = LinkSet::from_tcp(streams, codec).map_err(twinlink_io::SocketError::from)?;
        SenderSession::new(input, links, config)
    }

    /// Create a session over already established links
    pub fn new(input: R, links: LinkSet, config: ProtocolConfig) -> Result<Self, TransferError> {
        config.validate()?;
        let timers = match config.seed {
            Some(seed) => TimerMux::seeded(seed),
            None => TimerMux::from_entropy(),
        };

        Ok(SenderSession {
            source: ChunkSource::new(input, config.payload_size),
            arqs: [
                ChannelArq::new(ChannelId::ZERO, config.max_retries),
                ChannelArq::new(ChannelId::ONE, config.max_retries),
            ],
            timers,
            links,
            config,
        })
    }

    /// Run the transfer until both channels are done
    pub fn run(mut self) -> Result<SenderReport, TransferError> {
        let started = Instant::now();
        info!(
            "Sending with {} byte payloads, timeout {:?}, {} transmissions max",
            self.config.payload_size, self.config.retransmission_timeout, self.config.max_retries
        );

        for channel in ChannelId::ALL {
            self.send_next(channel)?;
        }

        while !self.is_done() {
            let wakeup = self.timers.next_wakeup();
            let waited = Instant::now();
            let readiness = self.links.wait(wakeup.map(|w| w.wait));
            let elapsed = waited.elapsed();

            let mut rearmed = [false; CHANNEL_COUNT];
            match readiness {
                Readiness::TimedOut => {
                    if let Some(wakeup) = wakeup {
                        self.retransmit(wakeup.channel)?;
                        rearmed[wakeup.channel.index()] = true;
                    }
                }
                Readiness::Ready(events) => {
                    for event in events {
                        if let Some(channel) = self.handle_event(event)? {
                            rearmed[channel.index()] = true;
                        }
                    }
                }
                Readiness::Closed { .. } => {
                    let channel = self.pending_channel();
                    return Err(TransferError::PeerClosed { channel });
                }
            }

            self.timers.advance(elapsed, rearmed);
        }

        let report = SenderReport {
            bytes_sent: self.source.offset(),
            channels: [self.arqs[0].stats(), self.arqs[1].stats()],
            timer_ties: self.timers.ties(),
            elapsed: started.elapsed(),
        };
        info!(
            "Transfer complete: {} bytes in {} packets ({} retransmissions)",
            report.bytes_sent,
            report.packets_sent(),
            report.retransmissions()
        );
        Ok(report)
    }

    fn is_done(&self) -> bool {
        self.arqs.iter().all(ChannelArq::is_done)
    }

    fn pending_channel(&self) -> ChannelId {
        self.arqs
            .iter()
            .find(|arq| !arq.is_done())
            .map_or(ChannelId::ZERO, ChannelArq::channel)
    }

    fn send_next(&mut self, channel: ChannelId) -> Result<(), TransferError> {
        match self.arqs[channel.index()].send_next(&mut self.source)? {
            Some(packet) => self.transmit(channel, &packet),
            None => {
                self.timers.disarm(channel);
                Ok(())
            }
        }
    }

    fn transmit(&mut self, channel: ChannelId, packet: &Packet) -> Result<(), TransferError> {
        self.links.send(channel, packet)?;
        self.timers.arm(channel, self.config.retransmission_timeout);
        info!(
            "Sent seq {} on channel {} ({} bytes{})",
            packet.sequence,
            channel,
            packet.payload.len(),
            if packet.is_last { ", last" } else { "" }
        );
        Ok(())
    }

    fn retransmit(&mut self, channel: ChannelId) -> Result<(), TransferError> {
        let packet = self.arqs[channel.index()].on_timeout()?;
        self.links.send(channel, &packet)?;
        self.timers.arm(channel, self.config.retransmission_timeout);
        info!(
            "Retransmitted seq {} on channel {} (attempt {})",
            packet.sequence,
            channel,
            self.arqs[channel.index()].retry_count()
        );
        Ok(())
    }

    /// Returns the channel whose deadline was re-armed, if any
    fn handle_event(&mut self, event: LinkEvent) -> Result<Option<ChannelId>, TransferError> {
        let channel = event.channel;
        let packet = match event.inbound {
            Ok(packet) => packet,
            Err(LinkError::PeerClosed) if self.arqs[channel.index()].is_done() => {
                debug!("Channel {} closed by peer after finishing", channel);
                return Ok(None);
            }
            Err(source) => return Err(LinkFailure { channel, source }.into()),
        };

        if !packet.is_ack() {
            warn!(
                "Channel {}: ignoring {} packet seq {}",
                channel, packet.kind, packet.sequence
            );
            return Ok(None);
        }
        if packet.channel != channel {
            warn!(
                "Ack for seq {} marked channel {} arrived on channel {}",
                packet.sequence, packet.channel, channel
            );
            return Ok(None);
        }

        let arq = &mut self.arqs[channel.index()];
        match arq.on_ack(&packet, &mut self.source)? {
            AckOutcome::Next(next) => {
                info!("Acknowledged seq {} on channel {}", packet.sequence, channel);
                self.transmit(channel, &next)?;
                Ok(Some(channel))
            }
            AckOutcome::Finished => {
                info!(
                    "Acknowledged seq {} on channel {}, channel done",
                    packet.sequence, channel
                );
                self.timers.disarm(channel);
                Ok(None)
            }
            AckOutcome::Stale => {
                debug!("Stale ack for seq {} on channel {}", packet.sequence, channel);
                Ok(None)
            }
        }
    }
}
