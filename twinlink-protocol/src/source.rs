//! Shared sequential input source
//!
//! Both channels draw fragments from one cursor over the input file. Each draw
//! consumes the next chunk of up to `chunk_size` bytes and stamps it with the
//! offset the cursor had before the read, so the fragments of the two
//! channels interleave but tile the file without gaps or overlap.

use crate::packet::{ChannelId, Packet};
use bytes::BytesMut;
use std::io::{self, ErrorKind, Read};
use thiserror::Error;

/// Input source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Input read failed: {0}")]
    Io(#[from] io::Error),

    #[error("Input exceeds the 32-bit offset space at offset {offset}")]
    OffsetOverflow { offset: u64 },
}

/// Sequential chunk reader shared by both channels
pub struct ChunkSource<R> {
    reader: R,
    chunk_size: usize,
    /// Offset of the next unread byte
    offset: u64,
    /// Set once the chunk marked last has been handed out
    exhausted: bool,
}

impl<R: Read> ChunkSource<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        ChunkSource {
            reader,
            chunk_size,
            offset: 0,
            exhausted: false,
        }
    }

    /// Offset of the next unread byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// True once the final chunk has been drawn; no further packets exist
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Draw the next fragment for `channel`
    ///
    /// Returns `None` once the final fragment has already been handed out. The
    /// fragment is marked last when fewer than `chunk_size` bytes could be
    /// read, which includes an empty read at end of input.
    pub fn next_packet(&mut self, channel: ChannelId) -> Result<Option<Packet>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        let sequence = u32::try_from(self.offset)
            .map_err(|_| SourceError::OffsetOverflow { offset: self.offset })?;

        let mut chunk = BytesMut::zeroed(self.chunk_size);
        let filled = read_full(&mut self.reader, &mut chunk)?;
        chunk.truncate(filled);

        let end = self.offset + filled as u64;
        if filled > 0 && end - 1 > u32::MAX as u64 {
            return Err(SourceError::OffsetOverflow { offset: end });
        }

        let is_last = filled < self.chunk_size;
        self.offset = end;
        self.exhausted = is_last;

        Ok(Some(Packet::data(sequence, channel, chunk.freeze(), is_last)))
    }

    /// Recover the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Read until `buf` is full or the reader reports end of input
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use proptest::prelude::*;
    use std::io::Cursor;

    /// Concatenate payloads of data packets in sequence order (test helper)
    fn concat_payloads<'a, I: IntoIterator<Item = &'a Packet>>(packets: I) -> Vec<u8> {
        let mut sorted: Vec<&Packet> = packets.into_iter().collect();
        sorted.sort_by_key(|p| p.sequence);
        let mut out = BytesMut::new();
        for packet in sorted {
            out.put_slice(&packet.payload);
        }
        out.to_vec()
    }

    fn draw_all(data: &[u8], chunk: usize) -> Vec<Packet> {
        let mut source = ChunkSource::new(Cursor::new(data.to_vec()), chunk);
        let mut packets = Vec::new();
        let mut channel = ChannelId::ZERO;
        while let Some(packet) = source.next_packet(channel).unwrap() {
            packets.push(packet);
            channel = channel.other();
        }
        assert!(source.is_exhausted());
        packets
    }

    #[test]
    fn test_250_bytes() {
        let data: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let packets = draw_all(&data, 100);

        let seqs: Vec<u32> = packets.iter().map(|p| p.sequence).collect();
        assert_eq!(seqs, vec![0, 100, 200]);
        assert_eq!(packets[2].payload.len(), 50);
        assert!(packets[2].is_last);
        assert!(!packets[0].is_last && !packets[1].is_last);
        assert_eq!(concat_payloads(&packets), data);
    }

    #[test]
    fn test_exact_multiple_ends_with_empty_last() {
        let packets = draw_all(&[9u8; 200], 100);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2].sequence, 200);
        assert!(packets[2].payload.is_empty());
        assert!(packets[2].is_last);
    }

    #[test]
    fn test_empty_input() {
        let packets = draw_all(&[], 100);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].sequence, 0);
        assert!(packets[0].is_last);
    }

    #[test]
    fn test_channels_stamped() {
        let packets = draw_all(&[1u8; 150], 100);
        assert_eq!(packets[0].channel, ChannelId::ZERO);
        assert_eq!(packets[1].channel, ChannelId::ONE);
    }

    /// Reader that hands out one byte per call
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(1);
            self.0.read(&mut buf[..len])
        }
    }

    #[test]
    fn test_short_reads_are_coalesced() {
        let mut source = ChunkSource::new(Trickle(Cursor::new(vec![5u8; 120])), 100);
        let first = source.next_packet(ChannelId::ZERO).unwrap().unwrap();
        assert_eq!(first.payload.len(), 100);
        assert!(!first.is_last);
        let second = source.next_packet(ChannelId::ONE).unwrap().unwrap();
        assert_eq!(second.payload.len(), 20);
        assert!(second.is_last);
        assert!(source.next_packet(ChannelId::ZERO).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_fragments_cover_input(data in prop::collection::vec(any::<u8>(), 0..700), chunk in 1usize..160) {
            let packets = draw_all(&data, chunk);

            prop_assert_eq!(packets.len(), data.len() / chunk + 1);
            prop_assert_eq!(packets.iter().filter(|p| p.is_last).count(), 1);
            prop_assert!(packets.last().map_or(false, |p| p.is_last));
            for (i, packet) in packets.iter().enumerate() {
                prop_assert_eq!(packet.sequence as usize, i * chunk);
            }
            prop_assert_eq!(concat_payloads(&packets), data);
        }
    }
}

