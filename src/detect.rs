//! Application protocol detection from early payload bytes.
//!
//! The detector is a pure function of one packet's payload plus its
//! direction and the flow's server port. It never mutates flow state;
//! the tracker applies the monotonic confidence rule (a new label wins
//! only with strictly higher confidence) and stops consulting the
//! detector once a flow reaches [`TERMINAL_CONFIDENCE`].

use serde::Serialize;
use std::fmt;

/// Confidence at which classification is final for a flow.
pub const TERMINAL_CONFIDENCE: u8 = 95;

/// Application-layer protocols the detector can label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppProtocol {
    Unknown,
    Http,
    Tls,
    Dns,
    Ssh,
    Smtp,
    Ftp,
    Pop3,
    Imap,
}

impl AppProtocol {
    pub fn name(&self) -> &'static str {
        match self {
            AppProtocol::Unknown => "unknown",
            AppProtocol::Http => "http",
            AppProtocol::Tls => "tls",
            AppProtocol::Dns => "dns",
            AppProtocol::Ssh => "ssh",
            AppProtocol::Smtp => "smtp",
            AppProtocol::Ftp => "ftp",
            AppProtocol::Pop3 => "pop3",
            AppProtocol::Imap => "imap",
        }
    }
}

impl fmt::Display for AppProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Inspect one packet and return a protocol label with its confidence.
///
/// `to_server` is the packet's direction relative to the flow key;
/// `server_port` is the flow's `dst_port`. Returns `None` when no signal
/// matches, so callers can distinguish "no evidence" from a weak label.
pub fn detect(
    payload: &[u8],
    is_udp: bool,
    to_server: bool,
    server_port: u16,
) -> Option<(AppProtocol, u8)> {
    if !is_udp && !payload.is_empty() {
        // TLS record: content type 0x16 (handshake), major version 0x03.
        if payload.len() >= 3 && payload[0] == 0x16 && payload[1] == 0x03 {
            return Some((AppProtocol::Tls, 95));
        }
        if payload.starts_with(b"SSH-") {
            return Some((AppProtocol::Ssh, 95));
        }
        if is_http_start(payload) {
            return Some((AppProtocol::Http, 90));
        }
        if let Some(proto) = mail_or_file_signal(payload, to_server, server_port) {
            return Some((proto, 80));
        }
    }

    if is_udp && is_dns(payload) {
        return Some((AppProtocol::Dns, 85));
    }

    // Lowest-priority evidence: the well-known server port alone.
    port_hint(server_port).map(|proto| (proto, 50))
}

fn is_http_start(payload: &[u8]) -> bool {
    payload.starts_with(b"GET ")
        || payload.starts_with(b"POST ")
        || payload.starts_with(b"HEAD ")
        || payload.starts_with(b"PUT ")
        || payload.starts_with(b"DELETE ")
        || payload.starts_with(b"OPTIONS ")
        || payload.starts_with(b"HTTP/")
}

/// SMTP/FTP/POP3/IMAP: greeting banners on the server side, command
/// keywords on the client side. "220" greetings are shared between SMTP
/// and FTP, so the server port disambiguates.
fn mail_or_file_signal(payload: &[u8], to_server: bool, server_port: u16) -> Option<AppProtocol> {
    if !to_server {
        if payload.starts_with(b"+OK") {
            return Some(AppProtocol::Pop3);
        }
        if payload.starts_with(b"* OK") {
            return Some(AppProtocol::Imap);
        }
        if payload.starts_with(b"220 ") || payload.starts_with(b"220-") {
            return Some(match server_port {
                20 | 21 => AppProtocol::Ftp,
                _ => AppProtocol::Smtp,
            });
        }
    } else {
        if payload.starts_with(b"EHLO ") || payload.starts_with(b"HELO ") {
            return Some(AppProtocol::Smtp);
        }
        if payload.starts_with(b"USER ") || payload.starts_with(b"RETR ") {
            return Some(match server_port {
                110 => AppProtocol::Pop3,
                _ => AppProtocol::Ftp,
            });
        }
    }
    None
}

/// Plausible DNS message: full header, at least one question, and a
/// sane opcode (query, inverse query, or status).
fn is_dns(payload: &[u8]) -> bool {
    if payload.len() < 12 {
        return false;
    }
    let opcode = (payload[2] >> 3) & 0x0F;
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    opcode <= 2 && qdcount >= 1
}

/// Well-known server ports mapped to the protocols the detector knows.
fn port_hint(port: u16) -> Option<AppProtocol> {
    match port {
        80 | 8000 | 8080 => Some(AppProtocol::Http),
        443 | 8443 => Some(AppProtocol::Tls),
        53 => Some(AppProtocol::Dns),
        22 => Some(AppProtocol::Ssh),
        25 | 587 => Some(AppProtocol::Smtp),
        20 | 21 => Some(AppProtocol::Ftp),
        110 => Some(AppProtocol::Pop3),
        143 => Some(AppProtocol::Imap),
        _ => None,
    }
}

/// Service label for a well-known port, for the reporting surface.
pub fn service_name(port: u16) -> Option<&'static str> {
    match port {
        20 => Some("FTP-DATA"),
        21 => Some("FTP"),
        22 => Some("SSH"),
        23 => Some("TELNET"),
        25 => Some("SMTP"),
        53 => Some("DNS"),
        67 | 68 => Some("DHCP"),
        80 => Some("HTTP"),
        110 => Some("POP3"),
        123 => Some("NTP"),
        143 => Some("IMAP"),
        161 | 162 => Some("SNMP"),
        389 => Some("LDAP"),
        443 => Some("HTTPS"),
        445 => Some("SMB"),
        993 => Some("IMAPS"),
        995 => Some("POP3S"),
        3306 => Some("MySQL"),
        3389 => Some("RDP"),
        5432 => Some("PostgreSQL"),
        6379 => Some("Redis"),
        8080 => Some("HTTP-ALT"),
        8443 => Some("HTTPS-ALT"),
        27017 => Some("MongoDB"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_request_line() {
        assert_eq!(
            detect(b"GET / HTTP/1.1\r\n", false, true, 80),
            Some((AppProtocol::Http, 90))
        );
        assert_eq!(
            detect(b"HTTP/1.1 200 OK\r\n", false, false, 80),
            Some((AppProtocol::Http, 90))
        );
    }

    #[test]
    fn tls_client_hello() {
        let hello = [0x16, 0x03, 0x01, 0x00, 0x50];
        assert_eq!(detect(&hello, false, true, 443), Some((AppProtocol::Tls, 95)));
    }

    #[test]
    fn ssh_banner() {
        assert_eq!(
            detect(b"SSH-2.0-OpenSSH_9.6\r\n", false, false, 22),
            Some((AppProtocol::Ssh, 95))
        );
    }

    #[test]
    fn dns_query() {
        // Header: id, flags (standard query), qdcount=1.
        let mut msg = vec![0u8; 12];
        msg[0] = 0x12;
        msg[1] = 0x34;
        msg[5] = 1;
        msg.extend_from_slice(b"\x07example\x03com\x00\x00\x01\x00\x01");
        assert_eq!(detect(&msg, true, true, 53), Some((AppProtocol::Dns, 85)));
    }

    #[test]
    fn dns_requires_question_and_sane_opcode() {
        // qdcount = 0
        let msg = [0u8; 12];
        assert_ne!(detect(&msg, true, true, 9999), Some((AppProtocol::Dns, 85)));
        // opcode = 7 (reserved)
        let mut msg = [0u8; 12];
        msg[2] = 7 << 3;
        msg[5] = 1;
        assert_ne!(detect(&msg, true, true, 9999), Some((AppProtocol::Dns, 85)));
        // short datagram
        assert_eq!(detect(&[0u8; 8], true, true, 9999), None);
    }

    #[test]
    fn smtp_and_ftp_banners_split_by_port() {
        assert_eq!(
            detect(b"220 mail.example.com ESMTP\r\n", false, false, 25),
            Some((AppProtocol::Smtp, 80))
        );
        assert_eq!(
            detect(b"220 FileZilla Server\r\n", false, false, 21),
            Some((AppProtocol::Ftp, 80))
        );
    }

    #[test]
    fn pop3_and_imap_banners() {
        assert_eq!(
            detect(b"+OK POP3 ready\r\n", false, false, 110),
            Some((AppProtocol::Pop3, 80))
        );
        assert_eq!(
            detect(b"* OK IMAP4rev1 ready\r\n", false, false, 143),
            Some((AppProtocol::Imap, 80))
        );
    }

    #[test]
    fn banners_only_count_on_the_expected_side() {
        // A "+OK" travelling toward the server is not a POP3 greeting;
        // the only remaining evidence is the port hint.
        assert_eq!(
            detect(b"+OK POP3 ready\r\n", false, true, 110),
            Some((AppProtocol::Pop3, 50))
        );
    }

    #[test]
    fn port_hint_is_weak_evidence() {
        assert_eq!(detect(&[], false, true, 443), Some((AppProtocol::Tls, 50)));
        assert_eq!(detect(b"\x00\x01", false, true, 80), Some((AppProtocol::Http, 50)));
    }

    #[test]
    fn no_signal_yields_none() {
        assert_eq!(detect(&[], false, true, 60000), None);
        assert_eq!(detect(b"\x00\x01\x02", false, true, 60000), None);
    }

    #[test]
    fn service_names_cover_common_ports() {
        assert_eq!(service_name(22), Some("SSH"));
        assert_eq!(service_name(443), Some("HTTPS"));
        assert_eq!(service_name(5432), Some("PostgreSQL"));
        assert_eq!(service_name(60000), None);
    }
}
