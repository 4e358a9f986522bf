//! Capture-wide statistics: per-IP and per-port histograms plus the
//! derived report views handed to the host.
//!
//! The aggregator is fed the flow key of every accepted packet. It is
//! protected by its own lock inside the tracker, always acquired after
//! the flow-table lock.

use ahash::AHashMap;
use serde::Serialize;
use std::net::Ipv4Addr;

use crate::detect::{self, AppProtocol};
use crate::flow::FlowKey;

/// Dotted-quad text for a flow-key address.
pub fn format_ipv4(ip: u32) -> String {
    Ipv4Addr::from(ip).to_string()
}

/// Aggregate view of a capture session.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStatistics {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub active_flows: usize,
    pub duration_seconds: f64,
    pub packets_per_second: f64,
    pub bytes_per_second: f64,
    pub unique_protocols: usize,
    pub unique_src_ips: usize,
    pub unique_dst_ips: usize,
}

/// Per-protocol traffic totals and share of all packets.
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolStat {
    pub protocol: AppProtocol,
    pub packets: u64,
    pub bytes: u64,
    pub percentage: f64,
}

/// One endpoint in a top-talkers listing.
#[derive(Debug, Clone, Serialize)]
pub struct TalkerStat {
    /// Dotted-quad address text.
    pub ip: String,
    pub packets: u64,
}

/// One port in a port-usage listing.
#[derive(Debug, Clone, Serialize)]
pub struct PortStat {
    pub port: u16,
    pub service: Option<&'static str>,
    pub packets: u64,
}

/// Source-IP, destination-IP and port histograms over accepted packets.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    src_ips: AHashMap<u32, u64>,
    dst_ips: AHashMap<u32, u64>,
    ports: AHashMap<u16, u64>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        StatsAggregator::default()
    }

    /// Count one accepted packet against its flow's key. Ports with value
    /// 0 (non-TCP/UDP flows) are never recorded.
    pub fn record(&mut self, key: &FlowKey) {
        *self.src_ips.entry(key.src_ip).or_insert(0) += 1;
        *self.dst_ips.entry(key.dst_ip).or_insert(0) += 1;
        if key.src_port > 0 {
            *self.ports.entry(key.src_port).or_insert(0) += 1;
        }
        if key.dst_port > 0 {
            *self.ports.entry(key.dst_port).or_insert(0) += 1;
        }
    }

    pub fn top_source_ips(&self, k: usize) -> Vec<TalkerStat> {
        top_k(&self.src_ips, k)
            .into_iter()
            .map(|(ip, packets)| TalkerStat {
                ip: format_ipv4(ip),
                packets,
            })
            .collect()
    }

    pub fn top_dest_ips(&self, k: usize) -> Vec<TalkerStat> {
        top_k(&self.dst_ips, k)
            .into_iter()
            .map(|(ip, packets)| TalkerStat {
                ip: format_ipv4(ip),
                packets,
            })
            .collect()
    }

    pub fn top_ports(&self, k: usize) -> Vec<PortStat> {
        top_k(&self.ports, k)
            .into_iter()
            .map(|(port, packets)| PortStat {
                port,
                service: detect::service_name(port),
                packets,
            })
            .collect()
    }

    pub fn unique_src_ips(&self) -> usize {
        self.src_ips.len()
    }

    pub fn unique_dst_ips(&self) -> usize {
        self.dst_ips.len()
    }

    pub fn clear(&mut self) {
        self.src_ips.clear();
        self.dst_ips.clear();
        self.ports.clear();
    }
}

/// The k entries with the greatest counts; ties broken by ascending key
/// so repeated reports are deterministic.
fn top_k<K: Ord + Copy>(map: &AHashMap<K, u64>, k: usize) -> Vec<(K, u64)> {
    let mut entries: Vec<(K, u64)> = map.iter().map(|(&key, &count)| (key, count)).collect();
    entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    entries.truncate(k);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(src_ip: u32, dst_ip: u32, src_port: u16, dst_port: u16) -> FlowKey {
        FlowKey {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol: 6,
        }
    }

    #[test]
    fn record_counts_both_endpoints() {
        let mut agg = StatsAggregator::new();
        agg.record(&key(1, 2, 1000, 80));
        agg.record(&key(1, 2, 1000, 80));
        agg.record(&key(3, 2, 1001, 443));

        assert_eq!(agg.unique_src_ips(), 2);
        assert_eq!(agg.unique_dst_ips(), 1);

        let top = agg.top_source_ips(10);
        assert_eq!(top[0].ip, "0.0.0.1");
        assert_eq!(top[0].packets, 2);

        let ports = agg.top_ports(10);
        assert_eq!(ports[0].port, 80);
        assert_eq!(ports[0].packets, 2);
        assert_eq!(ports[0].service, Some("HTTP"));
    }

    #[test]
    fn zero_ports_are_not_recorded() {
        let mut agg = StatsAggregator::new();
        agg.record(&key(1, 2, 0, 0)); // e.g. an ICMP flow
        assert!(agg.top_ports(10).is_empty());
        assert_eq!(agg.unique_src_ips(), 1);
    }

    #[test]
    fn top_k_breaks_ties_by_ascending_key() {
        let mut agg = StatsAggregator::new();
        agg.record(&key(9, 100, 2000, 443));
        agg.record(&key(4, 100, 2001, 443));
        agg.record(&key(7, 100, 2002, 443));

        let top = agg.top_source_ips(3);
        let ips: Vec<&str> = top.iter().map(|t| t.ip.as_str()).collect();
        assert_eq!(ips, ["0.0.0.4", "0.0.0.7", "0.0.0.9"]);
    }

    #[test]
    fn top_k_truncates() {
        let mut agg = StatsAggregator::new();
        for i in 0..10 {
            agg.record(&key(i, 100, 2000 + i as u16, 443));
        }
        assert_eq!(agg.top_source_ips(3).len(), 3);
    }

    #[test]
    fn clear_empties_histograms() {
        let mut agg = StatsAggregator::new();
        agg.record(&key(1, 2, 1000, 80));
        agg.clear();
        assert_eq!(agg.unique_src_ips(), 0);
        assert!(agg.top_ports(10).is_empty());
    }
}
