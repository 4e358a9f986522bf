//! Capture report formatting for the CLI.
//!
//! Renders the tracker's statistics views as plain-text tables at the end
//! of a capture run.

use crate::stats::{CaptureStatistics, PortStat, ProtocolStat, TalkerStat};

/// Print the capture-wide summary block.
pub fn print_capture_summary(stats: &CaptureStatistics) {
    println!("{}", "=".repeat(50));
    println!("Capture complete.");
    println!("  Packets:        {}", stats.total_packets);
    println!("  Bytes:          {}", format_bytes(stats.total_bytes));
    println!("  Duration:       {:.3} s", stats.duration_seconds);
    println!(
        "  Throughput:     {:.0} pps / {}/s",
        stats.packets_per_second,
        format_bytes(stats.bytes_per_second as u64)
    );
    println!("  Active flows:   {}", stats.active_flows);
    println!("  Protocols seen: {}", stats.unique_protocols);
    println!(
        "  Unique IPs:     {} src / {} dst",
        stats.unique_src_ips, stats.unique_dst_ips
    );
    println!("{}", "=".repeat(50));
}

/// Print per-protocol traffic share, largest first.
pub fn print_protocol_stats(stats: &[ProtocolStat]) {
    if stats.is_empty() {
        return;
    }
    println!("Protocols:");
    println!("  {:<10} {:>10} {:>12} {:>7}", "protocol", "packets", "bytes", "share");
    for row in stats {
        println!(
            "  {:<10} {:>10} {:>12} {:>6.1}%",
            row.protocol.name(),
            row.packets,
            format_bytes(row.bytes),
            row.percentage
        );
    }
}

/// Print a top-talkers table under the given heading.
pub fn print_top_talkers(title: &str, talkers: &[TalkerStat]) {
    if talkers.is_empty() {
        return;
    }
    println!("{}:", title);
    for (rank, talker) in talkers.iter().enumerate() {
        println!("  {:>2}. {:<16} {} packets", rank + 1, talker.ip, talker.packets);
    }
}

/// Print the port-usage table with service labels where known.
pub fn print_top_ports(ports: &[PortStat]) {
    if ports.is_empty() {
        return;
    }
    println!("Top ports:");
    for (rank, port) in ports.iter().enumerate() {
        println!(
            "  {:>2}. {:<5} {:<10} {} packets",
            rank + 1,
            port.port,
            port.service.unwrap_or(""),
            port.packets
        );
    }
}

/// Format a byte count with a binary unit suffix.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
