//! Live interface capture through libpcap.

use std::sync::Arc;

use log::info;
use pcap::{Active, Capture, Device};
use pcap_parser::Linktype;

use crate::config::CaptureConfig;

use super::{PacketEvent, PacketSource, SourceError};

pub struct LiveCapture {
    name: Arc<str>,
    capture: Capture<Active>,
    linktype: Linktype,
}

impl LiveCapture {
    /// Open `interface`, apply the snapshot length and BPF filter.
    ///
    /// # Errors
    /// [`SourceError::Unavailable`] when the device cannot be opened (missing
    /// privileges, unknown interface) and [`SourceError::Filter`] when the
    /// filter does not compile for this link type.
    pub fn open(interface: &str, config: &CaptureConfig) -> Result<Self, SourceError> {
        let unavailable = |err: pcap::Error| SourceError::Unavailable {
            name: interface.to_string(),
            reason: err.to_string(),
        };
        let mut capture = Capture::from_device(interface)
            .map_err(unavailable)?
            .snaplen(config.snaplen)
            .promisc(config.promiscuous)
            .timeout(config.read_timeout_ms)
            .immediate_mode(true)
            .open()
            .map_err(unavailable)?;

        if !config.filter.is_empty() {
            capture
                .filter(&config.filter, true)
                .map_err(|err| SourceError::Filter {
                    name: interface.to_string(),
                    filter: config.filter.clone(),
                    reason: err.to_string(),
                })?;
        }

        let linktype = Linktype(capture.get_datalink().0);
        info!(
            "capturing on {interface} (linktype {}, snaplen {})",
            linktype.0, config.snaplen
        );
        Ok(Self {
            name: Arc::from(interface),
            capture,
            linktype,
        })
    }
}

impl PacketSource for LiveCapture {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts.tv_sec as f64 + packet.header.ts.tv_usec as f64 * 1e-6;
                Ok(Some(PacketEvent {
                    ts,
                    source: Arc::clone(&self.name),
                    linktype: self.linktype,
                    data: packet.data.to_vec(),
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Err(SourceError::TimedOut),
            Err(pcap::Error::NoMorePackets) => Ok(None),
            Err(err) => Err(SourceError::Pcap(err.to_string())),
        }
    }
}

/// Names of every capture device libpcap can see.
pub fn list_interfaces() -> Result<Vec<String>, SourceError> {
    let devices = Device::list().map_err(|err| SourceError::Pcap(err.to_string()))?;
    Ok(devices.into_iter().map(|device| device.name).collect())
}
