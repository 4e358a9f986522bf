//! Flow tracking orchestrator.
//!
//! One `FlowTracker` is a self-contained capture session: parse each frame,
//! find or create its flow, update directional counters, advance the TCP
//! state machine, classify the application protocol, and feed the
//! capture-wide histograms.
//!
//! Locking: one mutex protects the flow table together with the cumulative
//! counters, a second protects the histogram aggregator. When both are
//! needed they are taken in that order, and never across a caller-supplied
//! closure. `packets_processed`, `bytes_processed` and `flow_count` are
//! mirrored into atomics so polling readers (e.g. a UI thread) never touch
//! a lock; mirrored values are consistent per field, not across fields.

use ahash::{AHashMap, AHashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::table::{FlowTable, TableFull};
use super::{FlowEntry, FlowKey};
use crate::config::TrackerConfig;
use crate::detect::{self, AppProtocol, TERMINAL_CONFIDENCE};
use crate::protocol;
use crate::stats::{CaptureStatistics, PortStat, ProtocolStat, StatsAggregator, TalkerStat};

struct TrackerInner {
    table: FlowTable,
    packets_processed: u64,
    bytes_processed: u64,
    /// Timestamp of the first accepted packet (0 = none yet).
    capture_start_us: u64,
    last_packet_us: u64,
}

/// Passive flow analyzer for one capture session.
pub struct FlowTracker {
    config: TrackerConfig,
    inner: Mutex<TrackerInner>,
    aggregator: Mutex<StatsAggregator>,
    // Lock-free mirrors, written under the main lock.
    packets_processed: AtomicU64,
    bytes_processed: AtomicU64,
    flow_count: AtomicUsize,
    enabled: AtomicBool,
}

impl FlowTracker {
    pub fn new(config: TrackerConfig) -> Self {
        FlowTracker {
            inner: Mutex::new(TrackerInner {
                table: FlowTable::new(&config),
                packets_processed: 0,
                bytes_processed: 0,
                capture_start_us: 0,
                last_packet_us: 0,
            }),
            aggregator: Mutex::new(StatsAggregator::new()),
            packets_processed: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            flow_count: AtomicUsize::new(0),
            enabled: AtomicBool::new(true),
            config,
        }
    }

    /// Gate packet processing. While disabled, `process_packet` returns
    /// `None` without touching any state.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Process one raw Ethernet frame. Returns the key of the updated flow,
    /// or `None` on parse failure, a full table, or a disabled tracker.
    ///
    /// Parse failures leave all counters untouched. A full table still
    /// counts the packet into the capture-wide totals.
    pub fn process_packet(&self, data: &[u8], timestamp_us: u64) -> Option<FlowKey> {
        if !self.enabled.load(Ordering::Relaxed) {
            return None;
        }

        let parsed = match protocol::parse_packet(data) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::trace!(error = %err, len = data.len(), "dropping unparseable frame");
                return None;
            }
        };
        let probe = FlowKey::from_packet(&parsed);

        let mut inner = self.inner.lock().unwrap();

        inner.packets_processed += 1;
        inner.bytes_processed += data.len() as u64;
        if inner.capture_start_us == 0 {
            inner.capture_start_us = timestamp_us;
        }
        if timestamp_us > inner.last_packet_us {
            inner.last_packet_us = timestamp_us;
        }
        self.packets_processed
            .store(inner.packets_processed, Ordering::Relaxed);
        self.bytes_processed
            .store(inner.bytes_processed, Ordering::Relaxed);

        let canonical = {
            let (entry, created) = match inner.table.lookup_or_create(probe, timestamp_us) {
                Ok(hit) => hit,
                Err(TableFull) => {
                    tracing::trace!(flow = %probe, "flow table full, packet counted but untracked");
                    return None;
                }
            };
            if created {
                tracing::debug!(flow = %entry.key, "new flow");
            }

            let to_server = entry.is_to_server(&probe);
            entry.observe(timestamp_us, data.len() as u64, to_server);

            if let Some(tcp) = &parsed.tcp {
                entry
                    .stats
                    .apply_tcp_segment(tcp.flags, tcp.seq, tcp.ack, tcp.window, to_server);
                entry.append_payload(parsed.payload, to_server);
            }

            if entry.stats.app_confidence < TERMINAL_CONFIDENCE {
                let verdict = detect::detect(
                    parsed.payload,
                    parsed.is_udp(),
                    to_server,
                    entry.key.dst_port,
                );
                if let Some((proto, confidence)) = verdict {
                    // A new label wins only with strictly higher confidence,
                    // so a port hint never shadows later payload evidence.
                    if confidence > entry.stats.app_confidence {
                        entry.stats.app_protocol = proto;
                        entry.stats.app_confidence = confidence;
                    }
                }
            }

            entry.key
        };

        self.flow_count.store(inner.table.len(), Ordering::Relaxed);
        drop(inner);

        // Aggregator lock strictly after the table lock is released.
        self.aggregator.lock().unwrap().record(&canonical);

        Some(canonical)
    }

    /// Evict flows idle for longer than the configured timeout.
    /// Safe to call concurrently with `process_packet`.
    pub fn cleanup_expired(&self, now_us: u64) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.table.cleanup_expired(now_us, self.config.flow_timeout_us);
        self.flow_count.store(inner.table.len(), Ordering::Relaxed);
        if removed > 0 {
            tracing::debug!(removed, remaining = inner.table.len(), "expired idle flows");
        }
        removed
    }

    /// Reset all flows, counters and histograms. The flow table's
    /// cumulative lookup/insertion counters survive.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.table.clear();
            inner.packets_processed = 0;
            inner.bytes_processed = 0;
            inner.capture_start_us = 0;
            inner.last_packet_us = 0;
            self.packets_processed.store(0, Ordering::Relaxed);
            self.bytes_processed.store(0, Ordering::Relaxed);
            self.flow_count.store(0, Ordering::Relaxed);
        }
        self.aggregator.lock().unwrap().clear();
    }

    /// Lock-free reads for cheap polling.
    pub fn flow_count(&self) -> usize {
        self.flow_count.load(Ordering::Relaxed)
    }

    pub fn packets_processed(&self) -> u64 {
        self.packets_processed.load(Ordering::Relaxed)
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed.load(Ordering::Relaxed)
    }

    /// Seconds between the first and the most recent accepted packet;
    /// 0 unless at least two packets were seen.
    pub fn capture_duration_seconds(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        duration_seconds(&inner)
    }

    /// Run a closure against a live flow under the table lock. The closure
    /// must not call back into the tracker.
    pub fn visit_flow<R>(&self, key: &FlowKey, f: impl FnOnce(&FlowEntry) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        inner.table.lookup(key).map(f)
    }

    /// Owned copy of one flow.
    pub fn flow(&self, key: &FlowKey) -> Option<FlowEntry> {
        self.visit_flow(key, Clone::clone)
    }

    /// Owned copies of all flows, largest by bytes first.
    pub fn snapshot(&self) -> Vec<FlowEntry> {
        let mut flows = self.inner.lock().unwrap().table.snapshot();
        flows.sort_by(|a, b| b.stats.total_bytes().cmp(&a.stats.total_bytes()));
        flows
    }

    /// Aggregate view of the capture session.
    pub fn capture_statistics(&self) -> CaptureStatistics {
        let (total_packets, total_bytes, active_flows, duration_seconds, unique_protocols) = {
            let inner = self.inner.lock().unwrap();
            let mut protocols = AHashSet::new();
            for entry in inner.table.entries() {
                if entry.stats.app_protocol != AppProtocol::Unknown {
                    protocols.insert(entry.stats.app_protocol);
                }
            }
            (
                inner.packets_processed,
                inner.bytes_processed,
                inner.table.len(),
                duration_seconds(&inner),
                protocols.len(),
            )
        };

        let (unique_src_ips, unique_dst_ips) = {
            let agg = self.aggregator.lock().unwrap();
            (agg.unique_src_ips(), agg.unique_dst_ips())
        };

        let (packets_per_second, bytes_per_second) = if duration_seconds > 0.0 {
            (
                total_packets as f64 / duration_seconds,
                total_bytes as f64 / duration_seconds,
            )
        } else {
            (0.0, 0.0)
        };

        CaptureStatistics {
            total_packets,
            total_bytes,
            active_flows,
            duration_seconds,
            packets_per_second,
            bytes_per_second,
            unique_protocols,
            unique_src_ips,
            unique_dst_ips,
        }
    }

    /// Per-protocol traffic totals aggregated over live flows, sorted by
    /// packet count descending (name ascending on ties).
    pub fn protocol_stats(&self, max: usize) -> Vec<ProtocolStat> {
        let mut totals: AHashMap<AppProtocol, (u64, u64)> = AHashMap::new();
        let mut all_packets: u64 = 0;
        {
            let inner = self.inner.lock().unwrap();
            for entry in inner.table.entries() {
                let packets = entry.stats.total_packets();
                let slot = totals.entry(entry.stats.app_protocol).or_insert((0, 0));
                slot.0 += packets;
                slot.1 += entry.stats.total_bytes();
                all_packets += packets;
            }
        }

        let mut stats: Vec<ProtocolStat> = totals
            .into_iter()
            .map(|(protocol, (packets, bytes))| ProtocolStat {
                protocol,
                packets,
                bytes,
                percentage: if all_packets > 0 {
                    packets as f64 / all_packets as f64 * 100.0
                } else {
                    0.0
                },
            })
            .collect();
        stats.sort_by(|a, b| {
            b.packets
                .cmp(&a.packets)
                .then_with(|| a.protocol.name().cmp(b.protocol.name()))
        });
        stats.truncate(max);
        stats
    }

    pub fn top_source_ips(&self, max: usize) -> Vec<TalkerStat> {
        self.aggregator.lock().unwrap().top_source_ips(max)
    }

    pub fn top_dest_ips(&self, max: usize) -> Vec<TalkerStat> {
        self.aggregator.lock().unwrap().top_dest_ips(max)
    }

    pub fn top_ports(&self, max: usize) -> Vec<PortStat> {
        self.aggregator.lock().unwrap().top_ports(max)
    }

    /// Cumulative flow-table probe count (survives `clear`).
    pub fn table_lookups(&self) -> u64 {
        self.inner.lock().unwrap().table.total_lookups()
    }

    /// Cumulative flow-table insertion count (survives `clear`).
    pub fn table_insertions(&self) -> u64 {
        self.inner.lock().unwrap().table.total_insertions()
    }
}

fn duration_seconds(inner: &TrackerInner) -> f64 {
    if inner.packets_processed < 2 || inner.last_packet_us <= inner.capture_start_us {
        return 0.0;
    }
    (inner.last_packet_us - inner.capture_start_us) as f64 / 1_000_000.0
}
