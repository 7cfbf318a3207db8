//! End-to-end transfer tests
//!
//! Runs a real sender and receiver over loopback TCP.

use bytes::Bytes;
use std::io::{Cursor, Write};
use std::thread;
use std::time::Duration;
use twinlink::{
    ProtocolConfig, ReceiverReport, ReceiverSession, SenderReport, SenderSession, TransferError,
};
use twinlink_io::{connect_channels, ChannelListener};
use twinlink_protocol::{ChannelId, Packet, PacketCodec};

struct Outcome {
    sent: Result<SenderReport, TransferError>,
    received: Result<(ReceiverReport, Vec<u8>), TransferError>,
}

fn transfer(data: Vec<u8>, sender: ProtocolConfig, receiver: ProtocolConfig) -> Outcome {
    let listener = ChannelListener::bind("127.0.0.1:0".parse().unwrap(), 5).unwrap();
    let addr = listener.local_addr().unwrap();

    let receiving = thread::spawn(move || {
        ReceiverSession::accept(&listener, Vec::new(), receiver)?.run()
    });

    let sent = SenderSession::connect(addr, Cursor::new(data), sender).and_then(|s| s.run());
    let received = receiving.join().unwrap();
    Outcome { sent, received }
}

fn lossless() -> ProtocolConfig {
    ProtocolConfig {
        drop_probability: 0.0,
        seed: Some(11),
        ..ProtocolConfig::default()
    }
}

fn lossy(probability: f64, seed: u64) -> ProtocolConfig {
    ProtocolConfig {
        drop_probability: probability,
        retransmission_timeout: Duration::from_millis(40),
        seed: Some(seed),
        ..ProtocolConfig::default()
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[test]
fn test_boundary_sizes_transfer_exactly() {
    for len in [0usize, 1, 99, 100, 101, 250, 437] {
        let data = pattern(len);
        let outcome = transfer(data.clone(), lossless(), lossless());

        let sent = outcome.sent.unwrap();
        let (report, output) = outcome.received.unwrap();
        assert_eq!(output, data, "size {}", len);
        assert_eq!(sent.bytes_sent, len as u64);
        assert_eq!(report.bytes_written, len as u64);
        assert_eq!(sent.packets_sent(), (len / 100 + 1) as u64, "size {}", len);
    }
}

#[test]
fn test_no_loss_means_no_retransmissions() {
    let outcome = transfer(pattern(50), lossless(), lossless());
    let sent = outcome.sent.unwrap();
    assert_eq!(sent.retransmissions(), 0);
    assert_eq!(sent.packets_sent(), 1);

    let (report, _) = outcome.received.unwrap();
    assert_eq!(report.loss.dropped, 0);
    assert_eq!(report.acks_sent, 1);
}

#[test]
fn test_two_fifty_bytes_uses_both_channels() {
    let data = pattern(250);
    let outcome = transfer(data.clone(), lossless(), lossless());

    let sent = outcome.sent.unwrap();
    assert_eq!(sent.packets_sent(), 3);
    assert!(sent.channels[0].packets_sent >= 1);
    assert!(sent.channels[1].packets_sent >= 1);
    assert_eq!(
        sent.channels[0].bytes_acked + sent.channels[1].bytes_acked,
        250
    );
    assert_eq!(outcome.received.unwrap().1, data);
}

#[test]
fn test_lossy_transfer_recovers() {
    let data = pattern(3000);
    let outcome = transfer(data.clone(), lossy(0.0, 5), lossy(0.25, 5));

    let sent = outcome.sent.unwrap();
    let (report, output) = outcome.received.unwrap();
    assert_eq!(output, data);
    assert!(report.loss.dropped > 0);
    assert!(sent.retransmissions() >= report.loss.dropped.min(1));
    assert_eq!(report.reassembly.bytes_written, 3000);
}

#[test]
fn test_single_slot_reassembly_recovers() {
    let data = pattern(1500);
    let receiver = ProtocolConfig {
        reassembly_capacity: 1,
        ..lossy(0.2, 9)
    };
    let outcome = transfer(data.clone(), lossy(0.0, 9), receiver);

    outcome.sent.unwrap();
    let (report, output) = outcome.received.unwrap();
    assert_eq!(output, data);
    assert!(report.reassembly.peak_buffered <= 1);
}

#[test]
fn test_total_loss_exhausts_retries() {
    let sender = ProtocolConfig {
        retransmission_timeout: Duration::from_millis(10),
        max_retries: 3,
        ..lossless()
    };
    let receiver = ProtocolConfig {
        drop_probability: 1.0,
        ..lossless()
    };
    let outcome = transfer(pattern(250), sender, receiver);

    assert!(matches!(
        outcome.sent,
        Err(TransferError::RetryExhausted { attempts: 3, .. })
    ));
    // The sender's exit closes both channels under the receiver
    assert!(matches!(
        outcome.received,
        Err(TransferError::PeerClosed { .. })
    ));
}

#[test]
fn test_nothing_listening_fails_setup() {
    let addr = {
        let listener = ChannelListener::bind("127.0.0.1:0".parse().unwrap(), 1).unwrap();
        listener.local_addr().unwrap()
    };
    let result = SenderSession::connect(addr, Cursor::new(Vec::new()), lossless());
    assert!(matches!(result, Err(TransferError::Setup(_))));
}

#[test]
fn test_reserved_flag_bits_abort_receiver() {
    let listener = ChannelListener::bind("127.0.0.1:0".parse().unwrap(), 5).unwrap();
    let addr = listener.local_addr().unwrap();
    let receiving = thread::spawn(move || {
        ReceiverSession::accept(&listener, Vec::new(), lossless())?.run()
    });

    let [mut zero, _one] = connect_channels(addr).unwrap();
    let packet = Packet::data(0, ChannelId::ZERO, Bytes::from_static(b"abc"), true);
    let mut frame = PacketCodec::default().encode(&packet).unwrap();
    frame[4] |= 0x80;
    zero.write_all(&frame).unwrap();

    let err = receiving.join().unwrap().unwrap_err();
    assert!(matches!(
        err,
        TransferError::MalformedPacket {
            channel: ChannelId::ZERO,
            ..
        }
    ));
}
