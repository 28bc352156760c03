use std::net::Ipv4Addr;

use super::ip::{IpFamily, IpReassembly};
use super::Reassembly;

pub const IPV4_HEADER_LEN: usize = 20;

#[derive(Debug, Default, Clone, Copy)]
pub struct Ipv4;

impl IpFamily for Ipv4 {
    type Addr = Ipv4Addr;

    const NAME: &'static str = "Internet Protocol version 4";
    const PROTOCOL: &'static str = "IPv4";
    const MAX_DATAGRAM_LEN: usize = u16::MAX as usize;
}

pub type Ipv4Reassembly = Reassembly<IpReassembly<Ipv4>>;

#[test]
fn test_ipv4_names() {
    let engine = Ipv4Reassembly::strict();
    assert_eq!(engine.name(), "Internet Protocol version 4");
    assert_eq!(engine.protocol(), "IPv4");
    assert!(engine.is_strict());
}
