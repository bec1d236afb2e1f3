use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use pcap_parser::{
    Block, LegacyPcapReader, Linktype, PcapBlockOwned, PcapError, PcapNGReader,
    traits::PcapReaderIterator,
};

use crate::source::{PacketEvent, PacketSource, SourceError};

use super::error::PcapSourceError;
use super::layout;
use super::reader::{
    CaptureFormat, capture_format, legacy_fraction_unit, pcapng_ticks_to_seconds,
    read_magic_and_rewind, tsresol_unit,
};

/// A capture file on disk, legacy pcap or PCAPNG.
pub struct PcapFileSource {
    name: Arc<str>,
    capture: Capture,
}

enum Capture {
    Legacy {
        reader: LegacyPcapReader<File>,
        header: GlobalHeader,
    },
    Ng {
        reader: PcapNGReader<File>,
        interfaces: Vec<Interface>,
    },
}

/// What the legacy global header says about every record after it.
struct GlobalHeader {
    linktype: Linktype,
    fraction_unit: f64,
}

/// One PCAPNG interface description, in declaration order.
struct Interface {
    linktype: Linktype,
    unit: f64,
    offset: i64,
}

struct RawFrame {
    ts: f64,
    linktype: Linktype,
    data: Vec<u8>,
}

impl PcapFileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let mut file = File::open(path)?;
        let magic = read_magic_and_rewind(&mut file)?;
        let capture = match capture_format(&magic)? {
            CaptureFormat::PcapNg => Capture::Ng {
                reader: PcapNGReader::new(layout::PCAP_READER_BUFFER_SIZE, file)
                    .map_err(|e| pcap_error("pcapng", format!("header: {e}")))?,
                interfaces: Vec::new(),
            },
            CaptureFormat::Legacy => Capture::Legacy {
                reader: LegacyPcapReader::new(layout::PCAP_READER_BUFFER_SIZE, file)
                    .map_err(|e| pcap_error("pcap", format!("header: {e}")))?,
                header: GlobalHeader {
                    linktype: Linktype::ETHERNET,
                    fraction_unit: legacy_fraction_unit(false),
                },
            },
        };
        debug!("opened capture file {}", path.display());
        Ok(Self {
            name: Arc::from(path.display().to_string()),
            capture,
        })
    }

    fn next_raw(&mut self) -> Result<Option<RawFrame>, PcapSourceError> {
        match &mut self.capture {
            Capture::Legacy { reader, header } => pump(reader, "pcap", |block| match block {
                PcapBlockOwned::LegacyHeader(global) => {
                    *header = GlobalHeader {
                        linktype: global.network,
                        fraction_unit: legacy_fraction_unit(global.is_nanosecond_precision()),
                    };
                    None
                }
                PcapBlockOwned::Legacy(record) => Some(RawFrame {
                    ts: record.ts_sec as f64 + record.ts_usec as f64 * header.fraction_unit,
                    linktype: header.linktype,
                    data: record.data.to_vec(),
                }),
                _ => None,
            }),
            Capture::Ng { reader, interfaces } => pump(reader, "pcapng", |block| match block {
                PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                    // Interface ids restart with every section.
                    interfaces.clear();
                    None
                }
                PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                    interfaces.push(Interface {
                        linktype: idb.linktype,
                        unit: tsresol_unit(idb.if_tsresol),
                        offset: idb.if_tsoffset,
                    });
                    None
                }
                PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                    let (linktype, unit, offset) = match interfaces.get(epb.if_id as usize) {
                        Some(intf) => (intf.linktype, intf.unit, intf.offset),
                        None => (Linktype::ETHERNET, layout::MICROS, 0),
                    };
                    Some(RawFrame {
                        ts: pcapng_ticks_to_seconds(epb.ts_high, epb.ts_low, unit, offset),
                        linktype,
                        data: epb.data.to_vec(),
                    })
                }
                _ => None,
            }),
        }
    }
}

impl PacketSource for PcapFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError> {
        let frame = self.next_raw()?;
        Ok(frame.map(|frame| PacketEvent {
            ts: frame.ts,
            source: Arc::clone(&self.name),
            linktype: frame.linktype,
            data: frame.data,
        }))
    }
}

/// Drive `reader` until `on_block` turns a block into a frame or the file ends.
fn pump<R, F>(
    reader: &mut R,
    format: &'static str,
    mut on_block: F,
) -> Result<Option<RawFrame>, PcapSourceError>
where
    R: PcapReaderIterator,
    F: FnMut(PcapBlockOwned<'_>) -> Option<RawFrame>,
{
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                let frame = on_block(block);
                reader.consume(offset);
                if frame.is_some() {
                    return Ok(frame);
                }
            }
            Err(PcapError::Eof) => return Ok(None),
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| pcap_error(format, format!("refill: {e}")))?;
            }
            Err(e) => {
                return Err(pcap_error(format, e.to_string()));
            }
        }
    }
}

fn pcap_error(context: &'static str, message: String) -> PcapSourceError {
    PcapSourceError::Pcap { context, message }
}
