//! IPv4/IPv6 fragment reassembly after RFC 791, with the dissection and
//! capture reading needed to run it over pcap files.

pub mod common;
pub mod handler;
pub mod layer2;
pub mod layer3;
pub mod pcap;
pub mod reassembly;
