//! Passive TCP connection lifecycle tracking.
//!
//! The state machine is advanced purely from observed flags and packet
//! direction; it covers only the transitions visible to a passive
//! observer. Flows picked up mid-stream stay `Closed` until a
//! recognizable flag pattern appears. The state is advisory and never
//! gates packet acceptance.

use serde::Serialize;
use std::fmt;

use super::FlowStats;
use crate::protocol::tcp_flags;

/// Observable TCP connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TcpState {
    Closed,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    LastAck,
    TimeWait,
    Closing,
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TcpState::Closed => "closed",
            TcpState::SynSent => "syn_sent",
            TcpState::SynReceived => "syn_received",
            TcpState::Established => "established",
            TcpState::FinWait1 => "fin_wait_1",
            TcpState::FinWait2 => "fin_wait_2",
            TcpState::CloseWait => "close_wait",
            TcpState::LastAck => "last_ack",
            TcpState::TimeWait => "time_wait",
            TcpState::Closing => "closing",
        };
        write!(f, "{}", name)
    }
}

impl FlowStats {
    /// Fold one observed TCP segment into the flow: sticky flag bits,
    /// last-seen header values for the sending direction, and the state
    /// transition.
    pub fn apply_tcp_segment(
        &mut self,
        flags_raw: u8,
        seq: u32,
        ack_no: u32,
        window: u16,
        to_server: bool,
    ) {
        let syn = flags_raw & tcp_flags::SYN != 0;
        let ack = flags_raw & tcp_flags::ACK != 0;
        let fin = flags_raw & tcp_flags::FIN != 0;
        let rst = flags_raw & tcp_flags::RST != 0;

        if syn && !ack {
            self.has_syn = true;
        }
        if syn && ack {
            self.has_syn_ack = true;
        }
        if fin {
            self.has_fin = true;
        }
        if rst {
            self.has_rst = true;
        }

        if to_server {
            self.seq_client = seq;
            self.ack_client = ack_no;
            self.window_client = window;
        } else {
            self.seq_server = seq;
            self.ack_server = ack_no;
            self.window_server = window;
        }

        self.tcp_state = next_state(self.tcp_state, syn, ack, fin, rst, to_server);
    }
}

/// One step of the passive transition table. Segments are classified into
/// a single event with priority RST > SYN+ACK > SYN > FIN > ACK (so a
/// FIN+ACK counts as a FIN). Unmatched events leave the state alone.
fn next_state(state: TcpState, syn: bool, ack: bool, fin: bool, rst: bool, to_server: bool) -> TcpState {
    if rst {
        return TcpState::Closed;
    }
    if syn && ack {
        return match (state, to_server) {
            (TcpState::SynSent, false) => TcpState::SynReceived,
            _ => state,
        };
    }
    if syn {
        return match (state, to_server) {
            (TcpState::Closed, true) => TcpState::SynSent,
            _ => state,
        };
    }
    if fin {
        return match (state, to_server) {
            (TcpState::Established, true) => TcpState::FinWait1,
            (TcpState::Established, false) => TcpState::CloseWait,
            (TcpState::FinWait2, false) => TcpState::TimeWait,
            (TcpState::CloseWait, true) => TcpState::LastAck,
            _ => state,
        };
    }
    if ack {
        return match (state, to_server) {
            (TcpState::SynReceived, true) => TcpState::Established,
            (TcpState::FinWait1, false) => TcpState::FinWait2,
            (TcpState::LastAck, false) => TcpState::Closed,
            _ => state,
        };
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowEntry, FlowKey};

    fn entry() -> FlowEntry {
        let key = FlowKey {
            src_ip: 0x0A000001,
            dst_ip: 0x0A000002,
            src_port: 54321,
            dst_port: 80,
            protocol: 6,
        };
        FlowEntry::new(key, 0, false, 0)
    }

    fn establish(stats: &mut FlowStats) {
        stats.apply_tcp_segment(tcp_flags::SYN, 1000, 0, 65535, true);
        stats.apply_tcp_segment(tcp_flags::SYN | tcp_flags::ACK, 5000, 1001, 65535, false);
        stats.apply_tcp_segment(tcp_flags::ACK, 1001, 5001, 65535, true);
    }

    #[test]
    fn handshake_reaches_established() {
        let mut e = entry();
        establish(&mut e.stats);
        assert_eq!(e.stats.tcp_state, TcpState::Established);
        assert!(e.stats.has_syn);
        assert!(e.stats.has_syn_ack);
        assert!(!e.stats.has_fin);
    }

    #[test]
    fn handshake_records_per_direction_values() {
        let mut e = entry();
        establish(&mut e.stats);
        assert_eq!(e.stats.seq_client, 1001);
        assert_eq!(e.stats.ack_client, 5001);
        assert_eq!(e.stats.seq_server, 5000);
        assert_eq!(e.stats.ack_server, 1001);
        assert_eq!(e.stats.window_client, 65535);
    }

    #[test]
    fn client_close_walks_fin_wait_states() {
        let mut e = entry();
        establish(&mut e.stats);
        e.stats.apply_tcp_segment(tcp_flags::FIN | tcp_flags::ACK, 2000, 5001, 100, true);
        assert_eq!(e.stats.tcp_state, TcpState::FinWait1);
        e.stats.apply_tcp_segment(tcp_flags::ACK, 5001, 2001, 100, false);
        assert_eq!(e.stats.tcp_state, TcpState::FinWait2);
        e.stats.apply_tcp_segment(tcp_flags::FIN | tcp_flags::ACK, 5001, 2001, 100, false);
        assert_eq!(e.stats.tcp_state, TcpState::TimeWait);
        assert!(e.stats.has_fin);
    }

    #[test]
    fn server_close_walks_close_wait_states() {
        let mut e = entry();
        establish(&mut e.stats);
        e.stats.apply_tcp_segment(tcp_flags::FIN | tcp_flags::ACK, 5001, 1001, 100, false);
        assert_eq!(e.stats.tcp_state, TcpState::CloseWait);
        e.stats.apply_tcp_segment(tcp_flags::FIN | tcp_flags::ACK, 1001, 5002, 100, true);
        assert_eq!(e.stats.tcp_state, TcpState::LastAck);
        e.stats.apply_tcp_segment(tcp_flags::ACK, 5002, 1002, 100, false);
        assert_eq!(e.stats.tcp_state, TcpState::Closed);
    }

    #[test]
    fn rst_closes_from_any_state() {
        for dir in [true, false] {
            let mut e = entry();
            establish(&mut e.stats);
            e.stats.apply_tcp_segment(tcp_flags::RST, 0, 0, 0, dir);
            assert_eq!(e.stats.tcp_state, TcpState::Closed);
            assert!(e.stats.has_rst);
        }
    }

    #[test]
    fn mid_stream_traffic_stays_closed() {
        let mut e = entry();
        // Data + ACK segments with no visible handshake.
        e.stats.apply_tcp_segment(tcp_flags::ACK | tcp_flags::PSH, 777, 888, 100, true);
        e.stats.apply_tcp_segment(tcp_flags::ACK, 888, 999, 100, false);
        assert_eq!(e.stats.tcp_state, TcpState::Closed);
        assert!(!e.stats.has_syn);
    }

    #[test]
    fn syn_from_server_side_does_not_open() {
        let mut e = entry();
        e.stats.apply_tcp_segment(tcp_flags::SYN, 1, 0, 100, false);
        assert_eq!(e.stats.tcp_state, TcpState::Closed);
        // Sticky flag still records the SYN observation.
        assert!(e.stats.has_syn);
    }
}
