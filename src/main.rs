mod cli;

use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use flowscope::{capture, config, display, flow};

/// How often (in capture time) to sweep expired flows from the table.
const CLEANUP_INTERVAL_US: u64 = 10_000_000;

fn main() {
    let args = cli::Cli::parse();

    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    if args.list_interfaces {
        list_interfaces();
        return;
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
        eprintln!("\nInterrupt received, stopping capture...");
    })
    .expect("failed to set Ctrl-C handler");

    if let Err(e) = run_capture(&config, &running) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// List available network interfaces and print them.
fn list_interfaces() {
    match capture::list_interfaces() {
        Ok(devices) => {
            println!("Available network interfaces:");
            println!("{:<20} {:<20} {}", "Name", "Description", "Addresses");
            println!("{}", "-".repeat(70));
            for device in &devices {
                let desc = device.desc.as_deref().unwrap_or("");
                let addrs: Vec<String> = device
                    .addresses
                    .iter()
                    .map(|a| format!("{}", a.addr))
                    .collect();
                println!("{:<20} {:<20} {}", device.name, desc, addrs.join(", "));
            }
            if devices.is_empty() {
                println!("  (no interfaces found — try running with sudo)");
            }
        }
        Err(e) => {
            eprintln!("error listing interfaces: {}", e);
            eprintln!("hint: try running with sudo");
        }
    }
}

/// Main capture loop: open the capture, feed frames to the flow tracker,
/// sweep expired flows, and report at the end.
fn run_capture(
    config: &config::Config,
    running: &Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cap = capture::open_capture(&config.capture)?;
    let tracker = flow::FlowTracker::new(config.tracker.clone());

    let interface_name = config.capture.interface.as_deref().unwrap_or("(default)");
    println!("flowscope v{}", env!("CARGO_PKG_VERSION"));
    println!("Capturing on interface: {}", interface_name);
    if let Some(filter) = &config.capture.filter {
        println!("Filter: {}", filter);
    }
    if config.run.count > 0 {
        println!("Capturing {} packets...", config.run.count);
    } else {
        println!("Capturing packets (Ctrl-C to stop)...");
    }
    println!();

    let mut packet_count: u64 = 0;
    let mut last_cleanup_us: u64 = 0;

    let mut stats_last = Instant::now();
    let mut stats_packets: u64 = 0;
    let mut stats_bytes: u64 = 0;

    while running.load(Ordering::SeqCst) {
        if config.run.count > 0 && packet_count >= config.run.count {
            break;
        }

        let packet = match cap.next_packet() {
            Ok(packet) => Some(packet),
            Err(pcap::Error::TimeoutExpired) => None,
            Err(e) => {
                tracing::error!(error = %e, "capture error");
                return Err(Box::new(e));
            }
        };

        if let Some(packet) = packet {
            packet_count += 1;
            let timestamp_us = capture::timestamp_micros(packet.header);

            tracker.process_packet(packet.data, timestamp_us);

            if timestamp_us.saturating_sub(last_cleanup_us) >= CLEANUP_INTERVAL_US {
                tracker.cleanup_expired(timestamp_us);
                last_cleanup_us = timestamp_us;
            }
        }

        // Stats printing runs on every loop iteration (including capture
        // timeouts) so stats are reported even during traffic lulls.
        let now = Instant::now();
        if config.stats.enabled
            && now.duration_since(stats_last).as_millis() as u64 >= config.stats.interval_ms
        {
            let elapsed = now.duration_since(stats_last).as_secs_f64().max(0.001);
            let packets_now = tracker.packets_processed();
            let bytes_now = tracker.bytes_processed();
            let mbps = (bytes_now - stats_bytes) as f64 * 8.0 / elapsed / 1_000_000.0;
            let pps = (packets_now - stats_packets) as f64 / elapsed;
            println!(
                "[stats] {:.2} Mbps | {:.0} pps | {} flows",
                mbps,
                pps,
                tracker.flow_count()
            );
            stats_last = now;
            stats_packets = packets_now;
            stats_bytes = bytes_now;
        }
    }

    println!();
    let stats = tracker.capture_statistics();
    display::print_capture_summary(&stats);
    println!("  Frames read:    {}", packet_count);
    println!(
        "  Parse drops:    {}",
        packet_count.saturating_sub(stats.total_packets)
    );
    println!();

    if !config.output.quiet {
        let k = config.stats.top_k;
        display::print_protocol_stats(&tracker.protocol_stats(k));
        display::print_top_talkers("Top source IPs", &tracker.top_source_ips(k));
        display::print_top_talkers("Top destination IPs", &tracker.top_dest_ips(k));
        display::print_top_ports(&tracker.top_ports(k));
    }

    if config.output.export_json.is_some() || config.output.export_csv.is_some() {
        let snapshot = tracker.snapshot();
        if let Some(path) = &config.output.export_json {
            flow::write_flow_json(path.as_ref(), &snapshot)?;
            println!("  Flow export (JSON): {}", path.display());
        }
        if let Some(path) = &config.output.export_csv {
            flow::write_flow_csv(path.as_ref(), &snapshot)?;
            println!("  Flow export (CSV):  {}", path.display());
        }
    }

    Ok(())
}

/// Layer CLI flags over the (optional) config file.
fn load_config(args: &cli::Cli) -> Result<config::Config, config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => config::Config::load(path)?,
        None => config::Config::default(),
    };

    if let Some(value) = &args.interface {
        config.capture.interface = Some(value.clone());
    }
    if let Some(value) = &args.filter {
        config.capture.filter = Some(value.clone());
    }
    if let Some(value) = args.count {
        config.run.count = value;
    }
    if let Some(value) = args.snaplen {
        config.capture.snaplen = value;
    }
    if let Some(value) = args.timeout_ms {
        config.capture.timeout_ms = value;
    }
    if args.no_promiscuous {
        config.capture.promiscuous = false;
    }
    if let Some(value) = args.max_flows {
        config.tracker.max_flows = value;
    }
    if let Some(value) = args.flow_timeout_secs {
        config.tracker.flow_timeout_us = (value * 1_000_000.0) as u64;
    }
    if args.payload_capture {
        config.tracker.payload_capture = true;
    }
    if args.stats {
        config.stats.enabled = true;
    }
    if let Some(value) = args.stats_interval_ms {
        config.stats.interval_ms = value;
    }
    if let Some(value) = args.top_k {
        config.stats.top_k = value;
    }
    if let Some(value) = &args.export_json {
        config.output.export_json = Some(value.clone());
    }
    if let Some(value) = &args.export_csv {
        config.output.export_csv = Some(value.clone());
    }
    if args.quiet {
        config.output.quiet = true;
    }

    Ok(config)
}
