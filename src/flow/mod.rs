//! Flow data model: 5-tuple keys oriented at first sight, per-flow
//! counters, and the tracked entry record.
//!
//! A flow is keyed by the 5-tuple of its *first* packet. The key is never
//! normalized; later packets from the opposite endpoint are matched by
//! probing the reversed tuple, and their direction is recovered by
//! comparing the packet's source tuple against the stored key. "Server"
//! always means the endpoint recorded as `dst_*`.

pub mod table;
pub mod tcp;
pub mod tracker;

pub use table::{FlowTable, TableFull};
pub use tcp::TcpState;
pub use tracker::FlowTracker;

use serde::{Serialize, Serializer};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::Path;

use crate::detect::AppProtocol;
use crate::protocol::ParsedPacket;

fn ser_ipv4<S: Serializer>(ip: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&Ipv4Addr::from(*ip))
}

/// Canonical identifier of a bidirectional conversation, stored in the
/// orientation of the first packet observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FlowKey {
    #[serde(serialize_with = "ser_ipv4")]
    pub src_ip: u32,
    #[serde(serialize_with = "ser_ipv4")]
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    /// IP next-protocol number.
    pub protocol: u8,
}

impl FlowKey {
    /// Key in the orientation of this packet.
    pub fn from_packet(packet: &ParsedPacket<'_>) -> Self {
        FlowKey {
            src_ip: packet.src_ip,
            dst_ip: packet.dst_ip,
            src_port: packet.src_port,
            dst_port: packet.dst_port,
            protocol: packet.protocol,
        }
    }

    /// The same conversation seen from the opposite endpoint.
    pub fn reversed(&self) -> Self {
        FlowKey {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={}",
            Ipv4Addr::from(self.src_ip),
            self.src_port,
            Ipv4Addr::from(self.dst_ip),
            self.dst_port,
            self.protocol
        )
    }
}

/// Per-flow counters and TCP status.
///
/// Directional fields are named from the key's point of view: `client` is
/// the `src_*` endpoint, `server` the `dst_*` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowStats {
    /// Caller-supplied monotonic microseconds.
    pub first_seen_us: u64,
    pub last_seen_us: u64,

    pub packets_to_server: u64,
    pub packets_to_client: u64,
    pub bytes_to_server: u64,
    pub bytes_to_client: u64,

    /// Last-seen TCP header values per direction.
    pub seq_client: u32,
    pub seq_server: u32,
    pub ack_client: u32,
    pub ack_server: u32,
    pub window_client: u16,
    pub window_server: u16,

    /// Sticky flag observations.
    pub has_syn: bool,
    pub has_syn_ack: bool,
    pub has_fin: bool,
    pub has_rst: bool,

    pub tcp_state: TcpState,

    pub app_protocol: AppProtocol,
    /// Detector certainty, 0..=100.
    pub app_confidence: u8,
}

impl FlowStats {
    fn new(timestamp_us: u64) -> Self {
        FlowStats {
            first_seen_us: timestamp_us,
            last_seen_us: timestamp_us,
            packets_to_server: 0,
            packets_to_client: 0,
            bytes_to_server: 0,
            bytes_to_client: 0,
            seq_client: 0,
            seq_server: 0,
            ack_client: 0,
            ack_server: 0,
            window_client: 0,
            window_server: 0,
            has_syn: false,
            has_syn_ack: false,
            has_fin: false,
            has_rst: false,
            tcp_state: TcpState::Closed,
            app_protocol: AppProtocol::Unknown,
            app_confidence: 0,
        }
    }

    pub fn total_packets(&self) -> u64 {
        self.packets_to_server + self.packets_to_client
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_to_server + self.bytes_to_client
    }
}

/// A single tracked flow: key, counters, and optional bounded payload
/// captures for each direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowEntry {
    pub key: FlowKey,
    pub stats: FlowStats,
    pub active: bool,
    #[serde(skip)]
    payload_to_server: Vec<u8>,
    #[serde(skip)]
    payload_to_client: Vec<u8>,
    #[serde(skip)]
    payload_capture: bool,
    #[serde(skip)]
    payload_max_size: usize,
}

impl FlowEntry {
    pub(crate) fn new(
        key: FlowKey,
        timestamp_us: u64,
        payload_capture: bool,
        payload_max_size: usize,
    ) -> Self {
        FlowEntry {
            key,
            stats: FlowStats::new(timestamp_us),
            active: true,
            payload_to_server: Vec::new(),
            payload_to_client: Vec::new(),
            payload_capture,
            payload_max_size,
        }
    }

    /// True when a packet with this key travels toward the server, i.e.
    /// its source tuple matches the flow's first-seen source.
    pub fn is_to_server(&self, probe: &FlowKey) -> bool {
        probe.src_ip == self.key.src_ip && probe.src_port == self.key.src_port
    }

    /// Record a packet: clamp `last_seen_us` monotone (clock regressions
    /// never shorten the flow's idle age) and bump directional counters.
    pub(crate) fn observe(&mut self, timestamp_us: u64, wire_len: u64, to_server: bool) {
        if timestamp_us > self.stats.last_seen_us {
            self.stats.last_seen_us = timestamp_us;
        }
        if to_server {
            self.stats.packets_to_server += 1;
            self.stats.bytes_to_server += wire_len;
        } else {
            self.stats.packets_to_client += 1;
            self.stats.bytes_to_client += wire_len;
        }
    }

    /// Append payload bytes to the per-direction capture buffer,
    /// truncating at the configured cap.
    pub(crate) fn append_payload(&mut self, data: &[u8], to_server: bool) {
        if !self.payload_capture || data.is_empty() {
            return;
        }
        let buffer = if to_server {
            &mut self.payload_to_server
        } else {
            &mut self.payload_to_client
        };
        let remaining = self.payload_max_size.saturating_sub(buffer.len());
        let take = data.len().min(remaining);
        if take > 0 {
            buffer.extend_from_slice(&data[..take]);
        }
    }

    /// Captured payload for one direction (empty unless capture is on).
    pub fn payload(&self, to_server: bool) -> &[u8] {
        if to_server {
            &self.payload_to_server
        } else {
            &self.payload_to_client
        }
    }
}

/// Write flow entries as pretty-printed JSON.
pub fn write_flow_json(path: &Path, flows: &[FlowEntry]) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, flows)?;
    Ok(())
}

/// Write flow entries as CSV.
pub fn write_flow_csv(path: &Path, flows: &[FlowEntry]) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writeln!(
        writer,
        "protocol,src_ip,src_port,dst_ip,dst_port,first_seen_us,last_seen_us,packets_to_server,packets_to_client,bytes_to_server,bytes_to_client,tcp_state,app_protocol,app_confidence"
    )?;
    for flow in flows {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            flow.key.protocol,
            Ipv4Addr::from(flow.key.src_ip),
            flow.key.src_port,
            Ipv4Addr::from(flow.key.dst_ip),
            flow.key.dst_port,
            flow.stats.first_seen_us,
            flow.stats.last_seen_us,
            flow.stats.packets_to_server,
            flow.stats.packets_to_client,
            flow.stats.bytes_to_server,
            flow.stats.bytes_to_client,
            flow.stats.tcp_state,
            flow.stats.app_protocol,
            flow.stats.app_confidence
        )?;
    }
    Ok(())
}
