use std::net::{Ipv4Addr, Ipv6Addr};

use anyhow::{bail, ensure};
use bit_field::BitField;
use bytes::Bytes;

use crate::reassembly::ip::Fragment;

pub mod ipv4;
pub mod ipv6;

/// A fragment of either address family, ready for reassembly.
#[derive(Debug, Clone, PartialEq)]
pub enum IpFragment {
    V4(Fragment<Ipv4Addr>),
    V6(Fragment<Ipv6Addr>),
}

impl IpFragment {
    pub fn sequence_no(&self) -> u64 {
        match self {
            IpFragment::V4(fragment) => fragment.sequence_no,
            IpFragment::V6(fragment) => fragment.sequence_no,
        }
    }
}

// Dissect a packet that starts with an IP header, picking the family from
// the version nibble.
pub fn dissect(number: u64, bytes: &Bytes) -> anyhow::Result<Option<IpFragment>> {
    ensure!(!bytes.is_empty(), "Empty IP packet.");
    match bytes[0].get_bits(4..8) {
        4 => Ok(ipv4::dissect(number, bytes)?.map(IpFragment::V4)),
        6 => Ok(ipv6::dissect(number, bytes)?.map(IpFragment::V6)),
        version => bail!("Unknown IP version {version}."),
    }
}
