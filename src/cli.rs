use clap::Parser;
use std::path::PathBuf;

/// flowscope: passive network flow analyzer
#[derive(Parser, Debug)]
#[command(name = "flowscope", version, about)]
pub struct Cli {
    /// Path to a TOML config file; CLI flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Network interface to capture on (e.g., "en0", "eth0").
    /// If not specified, the default interface is used.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// BPF filter expression (e.g., "tcp port 80", "host 192.168.1.1")
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Maximum number of packets to capture (0 = unlimited)
    #[arg(short = 'c', long)]
    pub count: Option<u64>,

    /// Snapshot length (max bytes per packet to capture)
    #[arg(short, long)]
    pub snaplen: Option<i32>,

    /// Read timeout in milliseconds for the capture handle
    #[arg(short = 't', long)]
    pub timeout_ms: Option<i32>,

    /// Disable promiscuous mode
    #[arg(long)]
    pub no_promiscuous: bool,

    /// Maximum number of concurrently tracked flows
    #[arg(long)]
    pub max_flows: Option<usize>,

    /// Flow idle timeout in seconds
    #[arg(long)]
    pub flow_timeout_secs: Option<f64>,

    /// Collect per-flow application payload (bounded per direction)
    #[arg(long)]
    pub payload_capture: bool,

    /// Print periodic throughput statistics during capture
    #[arg(long)]
    pub stats: bool,

    /// Interval between periodic statistics lines, in milliseconds
    #[arg(long)]
    pub stats_interval_ms: Option<u64>,

    /// Rows to show in top-talker/port/protocol listings
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Write final flow snapshot as JSON to this path
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Write final flow snapshot as CSV to this path
    #[arg(long)]
    pub export_csv: Option<PathBuf>,

    /// Suppress the final report tables
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// List available network interfaces and exit
    #[arg(short, long)]
    pub list_interfaces: bool,
}
