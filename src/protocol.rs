//! Single-pass frame decoding.
//!
//! The parser turns one raw Ethernet II frame into exactly the per-packet
//! facts the flow core consumes: the IPv4 5-tuple in flow-key form, the
//! TCP header values the state machine folds in, and the application
//! payload slice. Headers are decoded in one pass over fixed offsets;
//! nothing is allocated and no header bytes are retained.
//!
//! Walked layout (all multi-byte fields big-endian):
//!   - Ethernet II: 12 bytes of MACs, ethertype at 12 (0x0800 only;
//!     VLAN-tagged frames fail the ethertype check)
//!   - IPv4: IHL-sized header; protocol at byte 9, addresses at 12/16,
//!     total length bounds the transport slice so link-layer trailer
//!     padding never leaks into payloads
//!   - TCP (proto 6): ports, seq/ack, data offset, flags, window
//!   - UDP (proto 17): ports, datagram length
//!   - anything else: ports read as 0, no payload view

use std::fmt;

/// EtherType for IPv4, the only network protocol the analyzer accepts.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// IP next-protocol numbers the transport layer distinguishes.
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Ethernet II header size.
const ETH_LEN: usize = 14;
/// IPv4 header size without options.
const IPV4_MIN_LEN: usize = 20;
/// TCP header size without options.
const TCP_MIN_LEN: usize = 20;
/// UDP header size (fixed).
const UDP_LEN: usize = 8;

/// TCP flag bits.
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
}

/// Errors from frame decoding. Carries no owned data so failing fast on
/// junk frames stays allocation-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// A header claims more bytes than the frame holds.
    Truncated {
        layer: &'static str,
        needed: usize,
        have: usize,
    },
    /// Frame carries something other than IPv4 (includes VLAN tags).
    NotIpv4(u16),
    /// A header field has an impossible value.
    BadHeader(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Truncated { layer, needed, have } => {
                write!(f, "truncated {} header: need {} bytes, have {}", layer, needed, have)
            }
            ParseError::NotIpv4(ethertype) => {
                write!(f, "unsupported ethertype 0x{:04x}", ethertype)
            }
            ParseError::BadHeader(what) => write!(f, "invalid header: {}", what),
        }
    }
}

impl std::error::Error for ParseError {}

/// TCP header values the flow core consumes per segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSegment {
    pub flags: u8,
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
}

/// Per-packet facts extracted from one frame.
///
/// Addresses are big-endian `u32` so they drop straight into a flow key
/// and format consistently through `Ipv4Addr::from`. Ports are 0 for
/// non-TCP/UDP packets.
#[derive(Debug, PartialEq)]
pub struct ParsedPacket<'a> {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    /// IP next-protocol number.
    pub protocol: u8,
    /// TCP header values when `protocol` is TCP.
    pub tcp: Option<TcpSegment>,
    /// Application payload (empty for non-TCP/UDP packets).
    pub payload: &'a [u8],
}

impl ParsedPacket<'_> {
    pub fn is_udp(&self) -> bool {
        self.protocol == IPPROTO_UDP
    }
}

#[inline]
fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

#[inline]
fn be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

#[inline]
fn need(data: &[u8], layer: &'static str, upto: usize) -> Result<(), ParseError> {
    if data.len() < upto {
        return Err(ParseError::Truncated {
            layer,
            needed: upto,
            have: data.len(),
        });
    }
    Ok(())
}

/// Decode one raw Ethernet frame.
///
/// Truncated TCP and UDP headers are parse failures rather than partial
/// results: the flow core must never see a TCP packet without its flags.
pub fn parse_packet(data: &[u8]) -> Result<ParsedPacket<'_>, ParseError> {
    need(data, "ethernet", ETH_LEN)?;
    let ethertype = be16(data, 12);
    if ethertype != ETHERTYPE_IPV4 {
        return Err(ParseError::NotIpv4(ethertype));
    }

    let ip = &data[ETH_LEN..];
    need(ip, "ipv4", IPV4_MIN_LEN)?;
    if ip[0] >> 4 != 4 {
        return Err(ParseError::BadHeader("IP version is not 4"));
    }
    let ihl = usize::from(ip[0] & 0x0F);
    if ihl < 5 {
        return Err(ParseError::BadHeader("IPv4 IHL below 5"));
    }
    let ip_header_len = ihl * 4;
    need(ip, "ipv4 options", ip_header_len)?;

    let protocol = ip[9];
    let src_ip = be32(ip, 12);
    let dst_ip = be32(ip, 16);

    // Transport slice bounded by the IPv4 total length (bogus lengths
    // collapse to an empty slice rather than reading trailer bytes).
    let total_length = usize::from(be16(ip, 2));
    let ip_end = total_length.min(ip.len()).max(ip_header_len);
    let l4 = &ip[ip_header_len..ip_end];

    match protocol {
        IPPROTO_TCP => {
            need(l4, "tcp", TCP_MIN_LEN)?;
            let data_offset = usize::from(l4[12] >> 4);
            if data_offset < 5 {
                return Err(ParseError::BadHeader("TCP data offset below 5"));
            }
            let tcp_header_len = data_offset * 4;
            need(l4, "tcp options", tcp_header_len)?;

            Ok(ParsedPacket {
                src_ip,
                dst_ip,
                src_port: be16(l4, 0),
                dst_port: be16(l4, 2),
                protocol,
                tcp: Some(TcpSegment {
                    flags: l4[13],
                    seq: be32(l4, 4),
                    ack: be32(l4, 8),
                    window: be16(l4, 14),
                }),
                payload: &l4[tcp_header_len..],
            })
        }
        IPPROTO_UDP => {
            need(l4, "udp", UDP_LEN)?;
            // The datagram's own length field caps the payload too.
            let datagram_len = usize::from(be16(l4, 4));
            let payload_end = datagram_len.clamp(UDP_LEN, l4.len());

            Ok(ParsedPacket {
                src_ip,
                dst_ip,
                src_port: be16(l4, 0),
                dst_port: be16(l4, 2),
                protocol,
                tcp: None,
                payload: &l4[UDP_LEN..payload_end],
            })
        }
        _ => Ok(ParsedPacket {
            src_ip,
            dst_ip,
            src_port: 0,
            dst_port: 0,
            protocol,
            tcp: None,
            payload: &[],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    /// Ethernet + IPv4 frame around the given transport bytes. `trailer`
    /// bytes sit beyond the stated IPv4 total length, like capture padding.
    fn frame(protocol: u8, ihl: u8, l4: &[u8], trailer: &[u8]) -> Vec<u8> {
        let ip_header_len = usize::from(ihl) * 4;
        let mut pkt = vec![0u8; ETH_LEN];
        pkt[12] = 0x08;
        pkt[13] = 0x00;

        let mut ip = vec![0u8; ip_header_len];
        ip[0] = (4 << 4) | ihl;
        let total_len = (ip_header_len + l4.len()) as u16;
        ip[2..4].copy_from_slice(&total_len.to_be_bytes());
        ip[8] = 64;
        ip[9] = protocol;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);

        pkt.extend_from_slice(&ip);
        pkt.extend_from_slice(l4);
        pkt.extend_from_slice(trailer);
        pkt
    }

    fn tcp_bytes(src_port: u16, dst_port: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut tcp = vec![0u8; TCP_MIN_LEN];
        tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
        tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
        tcp[4..8].copy_from_slice(&1000u32.to_be_bytes());
        tcp[8..12].copy_from_slice(&2000u32.to_be_bytes());
        tcp[12] = 0x50;
        tcp[13] = flags;
        tcp[14..16].copy_from_slice(&4096u16.to_be_bytes());
        tcp.extend_from_slice(payload);
        tcp
    }

    #[test]
    fn tcp_frame_yields_five_tuple_and_segment() {
        let l4 = tcp_bytes(54321, 80, tcp_flags::SYN, b"hi");
        let raw = frame(IPPROTO_TCP, 5, &l4, &[]);
        let parsed = parse_packet(&raw).unwrap();

        assert_eq!(parsed.src_ip, u32::from(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(parsed.dst_ip, u32::from(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(Ipv4Addr::from(parsed.src_ip).to_string(), "10.0.0.1");
        assert_eq!(parsed.src_port, 54321);
        assert_eq!(parsed.dst_port, 80);
        assert_eq!(parsed.protocol, IPPROTO_TCP);
        assert!(!parsed.is_udp());

        let tcp = parsed.tcp.unwrap();
        assert_eq!(tcp.flags, tcp_flags::SYN);
        assert_eq!(tcp.seq, 1000);
        assert_eq!(tcp.ack, 2000);
        assert_eq!(tcp.window, 4096);
        assert_eq!(parsed.payload, b"hi");
    }

    #[test]
    fn tcp_payload_starts_after_options() {
        let mut l4 = tcp_bytes(1, 2, tcp_flags::ACK, &[]);
        l4[12] = 0x60; // data offset 6: four bytes of options
        l4.extend_from_slice(&[1, 1, 1, 1]);
        l4.extend_from_slice(b"data");

        let raw = frame(IPPROTO_TCP, 5, &l4, &[]);
        let parsed = parse_packet(&raw).unwrap();
        assert_eq!(parsed.payload, b"data");
    }

    #[test]
    fn ipv4_options_shift_the_transport_layer() {
        let l4 = tcp_bytes(1, 2, tcp_flags::ACK, b"x");
        let raw = frame(IPPROTO_TCP, 6, &l4, &[]);
        let parsed = parse_packet(&raw).unwrap();
        assert_eq!(parsed.src_port, 1);
        assert_eq!(parsed.payload, b"x");
    }

    #[test]
    fn trailer_padding_stays_out_of_payload() {
        // Total length covers header + 2 payload bytes; 6 trailer bytes
        // follow in the capture buffer.
        let l4 = tcp_bytes(1, 2, tcp_flags::ACK, b"ok");
        let raw = frame(IPPROTO_TCP, 5, &l4, &[0xEE; 6]);
        let parsed = parse_packet(&raw).unwrap();
        assert_eq!(parsed.payload, b"ok");
    }

    #[test]
    fn udp_frame_yields_ports_and_payload() {
        let mut udp = vec![0u8; UDP_LEN];
        udp[0..2].copy_from_slice(&53u16.to_be_bytes());
        udp[2..4].copy_from_slice(&40000u16.to_be_bytes());
        udp[4..6].copy_from_slice(&((UDP_LEN + 12) as u16).to_be_bytes());
        udp.extend_from_slice(&[0xAB; 12]);

        let raw = frame(IPPROTO_UDP, 5, &udp, &[]);
        let parsed = parse_packet(&raw).unwrap();
        assert!(parsed.is_udp());
        assert!(parsed.tcp.is_none());
        assert_eq!(parsed.src_port, 53);
        assert_eq!(parsed.dst_port, 40000);
        assert_eq!(parsed.payload.len(), 12);
    }

    #[test]
    fn udp_length_field_caps_payload() {
        let mut udp = vec![0u8; UDP_LEN];
        udp[4..6].copy_from_slice(&((UDP_LEN + 4) as u16).to_be_bytes());
        udp.extend_from_slice(&[0xAB; 12]); // 12 on the wire, 4 declared

        let raw = frame(IPPROTO_UDP, 5, &udp, &[]);
        let parsed = parse_packet(&raw).unwrap();
        assert_eq!(parsed.payload.len(), 4);
    }

    #[test]
    fn other_protocols_carry_no_ports_or_payload() {
        let raw = frame(1, 5, &[8, 0, 0, 0], &[]);
        let parsed = parse_packet(&raw).unwrap(); // ICMP echo
        assert_eq!(parsed.protocol, 1);
        assert_eq!(parsed.src_port, 0);
        assert_eq!(parsed.dst_port, 0);
        assert!(parsed.tcp.is_none());
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn reject_short_frame() {
        assert_eq!(
            parse_packet(&[0u8; 13]),
            Err(ParseError::Truncated {
                layer: "ethernet",
                needed: 14,
                have: 13
            })
        );
    }

    #[test]
    fn reject_non_ipv4_ethertype() {
        let mut pkt = vec![0u8; 60];
        pkt[12] = 0x86;
        pkt[13] = 0xDD; // IPv6
        assert_eq!(parse_packet(&pkt), Err(ParseError::NotIpv4(0x86DD)));
    }

    #[test]
    fn reject_vlan_tagged_frame() {
        let mut pkt = vec![0u8; 60];
        pkt[12] = 0x81;
        pkt[13] = 0x00; // 802.1Q
        assert_eq!(parse_packet(&pkt), Err(ParseError::NotIpv4(0x8100)));
    }

    #[test]
    fn reject_wrong_ip_version() {
        let mut pkt = frame(IPPROTO_TCP, 5, &tcp_bytes(1, 2, 0, &[]), &[]);
        pkt[ETH_LEN] = 0x65; // version 6
        assert!(matches!(parse_packet(&pkt), Err(ParseError::BadHeader(_))));
    }

    #[test]
    fn reject_bad_ihl() {
        let mut pkt = frame(IPPROTO_TCP, 5, &tcp_bytes(1, 2, 0, &[]), &[]);
        pkt[ETH_LEN] = 0x43; // version 4, IHL 3
        assert!(matches!(parse_packet(&pkt), Err(ParseError::BadHeader(_))));
    }

    #[test]
    fn reject_truncated_ipv4_options() {
        // IHL 7 claims a 28-byte header but only 20 bytes follow.
        let mut pkt = vec![0u8; ETH_LEN + 20];
        pkt[12] = 0x08;
        pkt[ETH_LEN] = 0x47;
        assert!(matches!(
            parse_packet(&pkt),
            Err(ParseError::Truncated { layer: "ipv4 options", .. })
        ));
    }

    #[test]
    fn reject_truncated_tcp() {
        let pkt = frame(IPPROTO_TCP, 5, &[0u8; 10], &[]);
        assert!(matches!(
            parse_packet(&pkt),
            Err(ParseError::Truncated { layer: "tcp", .. })
        ));
    }

    #[test]
    fn reject_truncated_tcp_options() {
        let mut l4 = tcp_bytes(1, 2, tcp_flags::ACK, &[]);
        l4[12] = 0x80; // data offset 8 claims 32 bytes, only 20 present
        assert!(matches!(
            parse_packet(&frame(IPPROTO_TCP, 5, &l4, &[])),
            Err(ParseError::Truncated { layer: "tcp options", .. })
        ));
    }

    #[test]
    fn reject_truncated_udp() {
        let pkt = frame(IPPROTO_UDP, 5, &[0u8; 7], &[]);
        assert!(matches!(
            parse_packet(&pkt),
            Err(ParseError::Truncated { layer: "udp", .. })
        ));
    }
}
