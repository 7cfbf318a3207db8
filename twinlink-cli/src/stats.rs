//! Statistics display and formatting

use std::time::Duration;
use twinlink::{ChannelId, ReceiverReport, SenderReport};

/// Scale `value` by the largest unit it reaches
fn scaled(value: u64, base: u64, units: [&str; 4]) -> String {
    let mut unit = 0;
    let mut divisor = 1u64;
    while unit + 1 < units.len() && value >= divisor * base {
        divisor *= base;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", value, units[0])
    } else {
        format!("{:.2} {}", value as f64 / divisor as f64, units[unit])
    }
}

/// Format bytes in human-readable form (binary units)
pub fn format_bytes(bytes: u64) -> String {
    scaled(bytes, 1024, ["B", "KB", "MB", "GB"])
}

/// Format bandwidth in human-readable form (decimal units)
pub fn format_bandwidth(bps: u64) -> String {
    scaled(bps, 1000, ["bps", "Kbps", "Mbps", "Gbps"])
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else if secs > 0 {
        format!("{}.{:02}s", seconds, duration.subsec_millis() / 10)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Average throughput in bits per second
pub fn throughput_bps(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 * 8.0 / secs) as u64
    } else {
        0
    }
}

/// Display sender statistics
pub fn display_sender_report(report: &SenderReport) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ SENDER STATISTICS                                           │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ Bytes:           {}", format_bytes(report.bytes_sent));
    println!("│ Elapsed:         {}", format_duration(report.elapsed));
    println!(
        "│ Throughput:      {}",
        format_bandwidth(throughput_bps(report.bytes_sent, report.elapsed))
    );
    println!(
        "│ Packets:         {} sent / {} retransmitted",
        report.packets_sent(),
        report.retransmissions()
    );
    println!(
        "│ Acks:            {} matched / {} stale",
        report.acks(),
        report.stale_acks()
    );
    println!("├─────────┬──────────┬──────────┬──────────┬─────────────────┤");
    println!("│ Channel │ Sent     │ Retrans  │ Acked    │ Bytes acked     │");
    println!("├─────────┼──────────┼──────────┼──────────┼─────────────────┤");
    for channel in ChannelId::ALL {
        let stats = &report.channels[channel.index()];
        println!(
            "│ {:7} │ {:8} │ {:8} │ {:8} │ {:15} │",
            channel.to_string(),
            stats.packets_sent,
            stats.retransmissions,
            stats.acks,
            format_bytes(stats.bytes_acked)
        );
    }
    println!("└─────────┴──────────┴──────────┴──────────┴─────────────────┘");
}

/// Display receiver statistics
pub fn display_receiver_report(report: &ReceiverReport) {
    let reassembly = &report.reassembly;
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ RECEIVER STATISTICS                                         │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ Bytes written:   {}", format_bytes(report.bytes_written));
    println!("│ Elapsed:         {}", format_duration(report.elapsed));
    println!(
        "│ Packets:         {} received / {} dropped (simulated)",
        report.packets_received, report.loss.dropped
    );
    println!(
        "│ Delivered:       {} in order / {} from buffer",
        reassembly.delivered_in_order, reassembly.delivered_from_buffer
    );
    println!(
        "│ Buffered:        {} (peak {})",
        reassembly.buffered, reassembly.peak_buffered
    );
    println!(
        "│ Discarded:       {} duplicate / {} buffer full",
        reassembly.duplicates, reassembly.rejected_full
    );
    println!("│ Acks sent:       {}", report.acks_sent);
    println!("└─────────────────────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 * 1024), "3072.00 GB");
    }

    #[test]
    fn test_format_bandwidth() {
        assert_eq!(format_bandwidth(500), "500 bps");
        assert_eq!(format_bandwidth(10_000), "10.00 Kbps");
        assert_eq!(format_bandwidth(10_000_000), "10.00 Mbps");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(350)), "350ms");
        assert_eq!(format_duration(Duration::from_millis(2_500)), "2.50s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 01m 01s");
    }

    #[test]
    fn test_throughput() {
        assert_eq!(throughput_bps(1000, Duration::from_secs(1)), 8000);
        assert_eq!(throughput_bps(1000, Duration::ZERO), 0);
    }
}
