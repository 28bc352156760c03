use crate::layer3::{self, IpFragment};
use crate::pcap::{LinkType, Record};

pub mod ethernet;

// Strip the link layer of a capture record and dissect what is underneath.
pub fn dissect(link_type: LinkType, record: &Record) -> anyhow::Result<Option<IpFragment>> {
    match link_type {
        LinkType::Ethernet => ethernet::dissect(record.number, &record.data),
        LinkType::Raw => layer3::dissect(record.number, &record.data),
        LinkType::Ipv4 => {
            Ok(layer3::ipv4::dissect(record.number, &record.data)?.map(IpFragment::V4))
        }
        LinkType::Ipv6 => {
            Ok(layer3::ipv6::dissect(record.number, &record.data)?.map(IpFragment::V6))
        }
    }
}
