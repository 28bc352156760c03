//! Reader for classic libpcap capture files.

use std::time::Duration;

use anyhow::{bail, ensure, Context};
use bytes::{Buf, Bytes};
use num_traits::FromPrimitive;

const PCAP_MAGIC_MICROS: u32 = 0xa1b2_c3d4;
const PCAP_MAGIC_NANOS: u32 = 0xa1b2_3c4d;
const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive)]
#[repr(u32)]
pub enum LinkType {
    Ethernet = 1,
    Raw = 101,
    Ipv4 = 228,
    Ipv6 = 229,
}

/// One captured packet.
#[derive(Debug, Clone)]
pub struct Record {
    /// Frame number, starting at 1.
    pub number: u64,
    pub timestamp: Duration,
    pub original_len: usize,
    pub data: Bytes,
}

#[derive(Debug)]
pub struct PcapReader {
    bytes: Bytes,
    swapped: bool,
    nanos: bool,
    link_type: LinkType,
    number: u64,
}

impl PcapReader {
    pub fn new(mut bytes: Bytes) -> anyhow::Result<Self> {
        ensure!(
            bytes.len() >= GLOBAL_HEADER_LEN,
            "pcap global header truncated: {} bytes.",
            bytes.len()
        );

        let magic = bytes.get_u32_le();
        let (swapped, nanos) = match magic {
            PCAP_MAGIC_MICROS => (false, false),
            PCAP_MAGIC_NANOS => (false, true),
            m if m.swap_bytes() == PCAP_MAGIC_MICROS => (true, false),
            m if m.swap_bytes() == PCAP_MAGIC_NANOS => (true, true),
            _ => bail!("Invalid pcap magic number: {magic:#010x}."),
        };

        let mut reader = Self {
            bytes,
            swapped,
            nanos,
            link_type: LinkType::Ethernet,
            number: 0,
        };
        let version_major = reader.get_u16();
        let version_minor = reader.get_u16();
        let _thiszone = reader.get_u32();
        let _sigfigs = reader.get_u32();
        let snaplen = reader.get_u32();
        let network = reader.get_u32();
        reader.link_type = LinkType::from_u32(network)
            .with_context(|| format!("Unsupported pcap link type {network}."))?;

        log::debug!(
            "pcap {version_major}.{version_minor}, snaplen {snaplen}, link type {:?}, {} timestamps.",
            reader.link_type,
            if nanos { "nanosecond" } else { "microsecond" }
        );
        Ok(reader)
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    fn get_u16(&mut self) -> u16 {
        if self.swapped {
            self.bytes.get_u16()
        } else {
            self.bytes.get_u16_le()
        }
    }

    fn get_u32(&mut self) -> u32 {
        if self.swapped {
            self.bytes.get_u32()
        } else {
            self.bytes.get_u32_le()
        }
    }

    fn next_record(&mut self) -> anyhow::Result<Record> {
        let number = self.number + 1;
        ensure!(
            self.bytes.remaining() >= RECORD_HEADER_LEN,
            "Record #{number}: header truncated."
        );
        let ts_sec = self.get_u32();
        let ts_frac = self.get_u32();
        let incl_len = self.get_u32() as usize;
        let original_len = self.get_u32() as usize;
        ensure!(
            self.bytes.remaining() >= incl_len,
            "Record #{number}: {incl_len} bytes announced, {} left.",
            self.bytes.remaining()
        );

        let frac = if self.nanos {
            Duration::from_nanos(ts_frac as u64)
        } else {
            Duration::from_micros(ts_frac as u64)
        };
        self.number = number;
        Ok(Record {
            number,
            timestamp: Duration::from_secs(ts_sec as u64) + frac,
            original_len,
            data: self.bytes.split_to(incl_len),
        })
    }
}

impl Iterator for PcapReader {
    type Item = anyhow::Result<Record>;

    // A broken record ends the iteration after its error.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.bytes.has_remaining() {
            return None;
        }
        let record = self.next_record();
        if record.is_err() {
            self.bytes.clear();
        }
        Some(record)
    }
}
