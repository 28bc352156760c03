use anyhow::ensure;
use bytes::Bytes;
use num_traits::FromPrimitive;

use crate::impl_get;
use crate::layer3::{self, IpFragment};

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

#[derive(Debug, Default, PartialEq, Clone, Copy, num_derive::FromPrimitive)]
#[repr(u16)]
pub enum EtherType {
    #[default]
    Empty = 0x0000,
    Ipv4 = 0x0800,
    Arp = 0x0806,
    Vlan = 0x8100,
    Ipv6 = 0x86dd,
}

#[derive(Default, Clone, Debug)]
pub struct EthernetFrame {
    bytes: Bytes,
}

impl EthernetFrame {
    pub fn from_bytes(bytes: &Bytes) -> anyhow::Result<Self> {
        ensure!(
            bytes.len() >= ETHERNET_HEADER_LEN,
            "Ethernet frame too short: {} bytes.",
            bytes.len()
        );
        Ok(Self {
            bytes: bytes.clone(),
        })
    }

    impl_get!(get_ethernet_type, bytes, 12, 14, u16);
    impl_get!(get_inner_ethernet_type, bytes, 16, 18, u16);

    // With an 802.1Q tag the real EtherType sits behind the tag.
    fn header_len(&self) -> usize {
        match self.get_ether_type() {
            EtherType::Vlan => ETHERNET_HEADER_LEN + VLAN_TAG_LEN,
            _ => ETHERNET_HEADER_LEN,
        }
    }

    pub fn get_ether_type(&self) -> EtherType {
        EtherType::from_u16(self.get_ethernet_type()).unwrap_or_default()
    }

    // EtherType of the payload, looking through one VLAN tag.
    pub fn get_payload_type(&self) -> EtherType {
        match self.get_ether_type() {
            EtherType::Vlan if self.bytes.len() >= ETHERNET_HEADER_LEN + VLAN_TAG_LEN => {
                EtherType::from_u16(self.get_inner_ethernet_type()).unwrap_or_default()
            }
            EtherType::Vlan => EtherType::Empty,
            other => other,
        }
    }

    pub fn get_payload(&self) -> Bytes {
        self.bytes.slice(self.header_len().min(self.bytes.len())..)
    }
}

pub fn dissect(number: u64, frame: &Bytes) -> anyhow::Result<Option<IpFragment>> {
    let frame = EthernetFrame::from_bytes(frame)?;
    let payload = frame.get_payload();
    match frame.get_payload_type() {
        EtherType::Ipv4 => Ok(layer3::ipv4::dissect(number, &payload)?.map(IpFragment::V4)),
        EtherType::Ipv6 => Ok(layer3::ipv6::dissect(number, &payload)?.map(IpFragment::V6)),
        other => {
            log::trace!("Frame #{number}: skipping EtherType {other:?}.");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ether_type: &[u8], rest: &[u8]) -> Bytes {
        let mut bytes = vec![0xff; 12];
        bytes.extend_from_slice(ether_type);
        bytes.extend_from_slice(rest);
        Bytes::from(bytes)
    }

    #[test]
    fn plain_frame() {
        let frame = EthernetFrame::from_bytes(&frame(&[0x08, 0x00], b"payload")).unwrap();
        assert_eq!(frame.get_ether_type(), EtherType::Ipv4);
        assert_eq!(frame.get_payload_type(), EtherType::Ipv4);
        assert_eq!(frame.get_payload(), Bytes::from_static(b"payload"));
    }

    #[test]
    fn vlan_tagged_frame() {
        let bytes = frame(&[0x81, 0x00], b"\x00\x05\x86\xddpayload");
        let frame = EthernetFrame::from_bytes(&bytes).unwrap();
        assert_eq!(frame.get_ether_type(), EtherType::Vlan);
        assert_eq!(frame.get_payload_type(), EtherType::Ipv6);
        assert_eq!(frame.get_payload(), Bytes::from_static(b"payload"));
    }

    #[test]
    fn unknown_ether_type_is_skipped() {
        let bytes = frame(&[0x88, 0xcc], b"lldp");
        assert!(dissect(1, &bytes).unwrap().is_none());
        assert!(dissect(1, &Bytes::from_static(b"short")).is_err());
    }
}
