//! Framed links and the readiness wait
//!
//! Every channel carries fixed-size frames in both directions. A dedicated
//! pump thread per channel reads whole frames off the stream and forwards them
//! over a crossbeam channel, so the control loop can wait on both channels
//! and an optional timeout at a single suspension point.

use bytes::BytesMut;
use crossbeam::channel::{never, select, unbounded, Receiver, Sender, TryRecvError};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};
use twinlink_protocol::{ChannelId, Packet, PacketCodec, PacketError, CHANNEL_COUNT};

/// Per-channel transport errors
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("Malformed frame: {0}")]
    Malformed(#[from] PacketError),
}

/// A link error attributed to its channel
#[derive(Error, Debug)]
#[error("Channel {channel}: {source}")]
pub struct LinkFailure {
    pub channel: ChannelId,
    #[source]
    pub source: LinkError,
}

/// Reads exactly one frame per call
pub struct FrameReader<R> {
    reader: R,
    codec: PacketCodec,
    buf: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, codec: PacketCodec) -> Self {
        FrameReader {
            reader,
            buf: vec![0u8; codec.wire_size()],
            codec,
        }
    }

    /// Read and decode the next frame
    ///
    /// End of stream on a frame boundary is `PeerClosed`; inside a frame it is
    /// a truncated, malformed frame.
    pub fn read_packet(&mut self) -> Result<Packet, LinkError> {
        let mut filled = 0;
        while filled < self.buf.len() {
            match self.reader.read(&mut self.buf[filled..]) {
                Ok(0) if filled == 0 => return Err(LinkError::PeerClosed),
                Ok(0) => {
                    return Err(LinkError::Malformed(PacketError::InsufficientData {
                        expected: self.buf.len(),
                        actual: filled,
                    }))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
        Ok(self.codec.decode(&self.buf)?)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Encodes and writes whole frames
pub struct FrameWriter<W> {
    writer: W,
    codec: PacketCodec,
    buf: BytesMut,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W, codec: PacketCodec) -> Self {
        FrameWriter {
            writer,
            buf: BytesMut::with_capacity(codec.wire_size()),
            codec,
        }
    }

    pub fn write_packet(&mut self, packet: &Packet) -> Result<(), LinkError> {
        self.buf.clear();
        self.codec.encode_into(packet, &mut self.buf)?;
        self.writer.write_all(&self.buf)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

/// One inbound frame, or the error that ended a channel
#[derive(Debug)]
pub struct LinkEvent {
    pub channel: ChannelId,
    pub inbound: Result<Packet, LinkError>,
}

/// Result of a readiness wait
#[derive(Debug)]
pub enum Readiness {
    /// At most one event per channel, in the order they were taken
    Ready(Vec<LinkEvent>),
    /// The timeout passed with nothing readable
    TimedOut,
    /// Every channel has already reported its terminating error; `last` is
    /// the one that closed most recently
    Closed { last: ChannelId },
}

type Inbound = Result<Packet, LinkError>;
type BoxWriter = Box<dyn Write + Send>;

/// Both channels of a transfer
pub struct LinkSet {
    writers: Vec<FrameWriter<BoxWriter>>,
    inbound: [Receiver<Inbound>; CHANNEL_COUNT],
    open: [bool; CHANNEL_COUNT],
    last_closed: ChannelId,
    streams: Vec<TcpStream>,
}

impl LinkSet {
    /// Build a link set from connected TCP streams, index = channel id
    pub fn from_tcp(
        streams: [TcpStream; CHANNEL_COUNT],
        codec: PacketCodec,
    ) -> io::Result<Self> {
        let mut halves = Vec::with_capacity(CHANNEL_COUNT);
        let mut handles = Vec::with_capacity(CHANNEL_COUNT);
        for stream in streams {
            let reader = stream.try_clone()?;
            handles.push(stream.try_clone()?);
            halves.push((reader, stream));
        }

        let mut links = LinkSet::spawn(halves, codec)?;
        links.streams = handles;
        Ok(links)
    }

    /// Build a link set from arbitrary stream halves, index = channel id
    pub fn new<R, W>(channels: [(R, W); CHANNEL_COUNT], codec: PacketCodec) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        LinkSet::spawn(Vec::from(channels), codec)
    }

    fn spawn<R, W>(channels: Vec<(R, W)>, codec: PacketCodec) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let mut writers = Vec::with_capacity(CHANNEL_COUNT);
        let mut receivers = Vec::with_capacity(CHANNEL_COUNT);

        for (index, (reader, writer)) in channels.into_iter().enumerate() {
            let channel = ChannelId::from_index(index)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "too many channels"))?;
            let (tx, rx) = unbounded();
            spawn_pump(channel, FrameReader::new(reader, codec), tx)?;
            writers.push(FrameWriter::new(Box::new(writer) as BoxWriter, codec));
            receivers.push(rx);
        }

        let inbound: [Receiver<Inbound>; CHANNEL_COUNT] = receivers
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "expected two channels"))?;

        Ok(LinkSet {
            writers,
            inbound,
            open: [true; CHANNEL_COUNT],
            last_closed: ChannelId::ZERO,
            streams: Vec::new(),
        })
    }

    /// Whether a channel can still deliver frames
    pub fn is_open(&self, channel: ChannelId) -> bool {
        self.open[channel.index()]
    }

    /// Write one frame on a channel
    pub fn send(&mut self, channel: ChannelId, packet: &Packet) -> Result<(), LinkFailure> {
        trace!("Channel {} -> {}", channel, packet);
        self.writers[channel.index()]
            .write_packet(packet)
            .map_err(|source| LinkFailure { channel, source })
    }

    /// Block until either channel is readable or `timeout` passes
    ///
    /// `None` waits indefinitely. After the first event the other channel is
    /// polled once without blocking, so a single call yields at most one
    /// event per channel. A channel that delivered an error is not waited on
    /// again.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Readiness {
        if !self.open.iter().any(|open| *open) {
            return Readiness::Closed {
                last: self.last_closed,
            };
        }

        let [first_rx, second_rx] = &self.inbound;
        let first = match timeout {
            Some(timeout) => select! {
                recv(first_rx) -> msg => (ChannelId::ZERO, msg.ok()),
                recv(second_rx) -> msg => (ChannelId::ONE, msg.ok()),
                default(timeout) => return Readiness::TimedOut,
            },
            None => select! {
                recv(first_rx) -> msg => (ChannelId::ZERO, msg.ok()),
                recv(second_rx) -> msg => (ChannelId::ONE, msg.ok()),
            },
        };

        let mut events = Vec::with_capacity(CHANNEL_COUNT);
        let (channel, inbound) = first;
        events.push(self.take(channel, inbound.unwrap_or(Err(LinkError::PeerClosed))));

        let other = channel.other();
        match self.inbound[other.index()].try_recv() {
            Ok(inbound) => events.push(self.take(other, inbound)),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) if self.open[other.index()] => {
                events.push(self.take(other, Err(LinkError::PeerClosed)));
            }
            Err(TryRecvError::Disconnected) => {}
        }

        Readiness::Ready(events)
    }

    fn take(&mut self, channel: ChannelId, inbound: Inbound) -> LinkEvent {
        if let Err(e) = &inbound {
            debug!("Channel {} closed: {}", channel, e);
            self.inbound[channel.index()] = never();
            self.open[channel.index()] = false;
            self.last_closed = channel;
        }
        LinkEvent { channel, inbound }
    }
}

impl Drop for LinkSet {
    fn drop(&mut self) {
        // Half-close so the peer's readers see end of stream after our last frame
        for stream in &self.streams {
            if let Err(e) = stream.shutdown(Shutdown::Write) {
                trace!("Shutdown failed: {}", e);
            }
        }
    }
}

fn spawn_pump<R: Read + Send + 'static>(
    channel: ChannelId,
    mut frames: FrameReader<R>,
    tx: Sender<Inbound>,
) -> io::Result<()> {
    thread::Builder::new()
        .name(format!("twinlink-rx-{}", channel))
        .spawn(move || loop {
            let inbound = frames.read_packet();
            let fatal = inbound.is_err();
            if let Err(e) = &inbound {
                if !matches!(e, LinkError::PeerClosed) {
                    warn!("Channel {} read failed: {}", channel, e);
                }
            }
            if tx.send(inbound).is_err() || fatal {
                trace!("Channel {} pump exiting", channel);
                break;
            }
        })?;
    Ok(())
}
