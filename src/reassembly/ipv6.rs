use std::net::Ipv6Addr;

use super::ip::{IpFamily, IpReassembly};
use super::Reassembly;

pub const IPV6_HEADER_LEN: usize = 40;

#[derive(Debug, Default, Clone, Copy)]
pub struct Ipv6;

// The key's identification and next protocol come from the Fragment
// extension header, and the header length covers everything before it.
impl IpFamily for Ipv6 {
    type Addr = Ipv6Addr;

    const NAME: &'static str = "Internet Protocol version 6";
    const PROTOCOL: &'static str = "IPv6";
    // Jumbograms cannot carry a Fragment header (RFC 2675, section 3).
    const MAX_DATAGRAM_LEN: usize = u16::MAX as usize;
}

pub type Ipv6Reassembly = Reassembly<IpReassembly<Ipv6>>;

#[test]
fn test_ipv6_names() {
    let engine = Ipv6Reassembly::lenient();
    assert_eq!(engine.name(), "Internet Protocol version 6");
    assert_eq!(engine.protocol(), "IPv6");
    assert!(!engine.is_strict());
}
