//! Packet capture transport using libpcap.
//!
//! Thin wrapper over the `pcap` crate: device selection, opening a live
//! handle with promiscuous/snaplen/timeout/BPF options, and converting
//! pcap timestamps into the microsecond values the flow core consumes.

use pcap::{Active, Capture, Device};
use std::fmt;

use crate::config::CaptureConfig;

/// Errors from the capture transport.
#[derive(Debug)]
pub enum CaptureError {
    /// Failed to find a suitable network device.
    NoDevice(String),
    /// pcap error.
    Pcap(pcap::Error),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NoDevice(msg) => write!(f, "no capture device: {}", msg),
            CaptureError::Pcap(e) => write!(f, "pcap error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<pcap::Error> for CaptureError {
    fn from(e: pcap::Error) -> Self {
        CaptureError::Pcap(e)
    }
}

/// pcap header timestamp as monotone-ish microseconds since the epoch,
/// the time base of the flow core.
pub fn timestamp_micros(header: &pcap::PacketHeader) -> u64 {
    let secs = header.ts.tv_sec.max(0) as u64;
    let micros = header.ts.tv_usec.max(0) as u64;
    secs * 1_000_000 + micros
}

/// List all available network interfaces.
pub fn list_interfaces() -> Result<Vec<Device>, CaptureError> {
    Device::list().map_err(CaptureError::Pcap)
}

/// Open a live packet capture with the given configuration.
pub fn open_capture(config: &CaptureConfig) -> Result<Capture<Active>, CaptureError> {
    let device = match &config.interface {
        Some(name) => {
            let devices = Device::list().map_err(CaptureError::Pcap)?;
            devices
                .into_iter()
                .find(|d| d.name == *name)
                .ok_or_else(|| CaptureError::NoDevice(format!("interface '{}' not found", name)))?
        }
        None => Device::lookup()
            .map_err(CaptureError::Pcap)?
            .ok_or_else(|| CaptureError::NoDevice("no default device found".into()))?,
    };

    let device_name = device.name.clone();

    let mut cap = Capture::from_device(device)
        .map_err(CaptureError::Pcap)?
        .promisc(config.promiscuous)
        .snaplen(config.snaplen)
        .timeout(config.timeout_ms)
        .open()
        .map_err(CaptureError::Pcap)?;

    if let Some(filter) = &config.filter {
        cap.filter(filter, true).map_err(CaptureError::Pcap)?;
    }

    tracing::info!(
        interface = %device_name,
        promiscuous = config.promiscuous,
        snaplen = config.snaplen,
        filter = config.filter.as_deref().unwrap_or("none"),
        "capture started"
    );

    Ok(cap)
}
