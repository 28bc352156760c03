use std::net::Ipv6Addr;

use anyhow::{ensure, Context};
use bit_field::BitField;
use bytes::Bytes;
use num_traits::FromPrimitive;
use pnet::packet::ipv6::Ipv6Packet;

use crate::reassembly::ip::{BufferId, Fragment};
use crate::reassembly::ipv6::IPV6_HEADER_LEN;
use crate::{impl_get, impl_get_bit, impl_get_bits};

/// Extension headers that may precede the Fragment header.
#[derive(Debug, Clone, Copy, PartialEq, num_derive::FromPrimitive)]
#[repr(u8)]
pub enum ExtensionHeader {
    HopByHop = 0,
    Routing = 43,
    Fragment = 44,
    Authentication = 51,
    DestinationOptions = 60,
}

// Ref: https://datatracker.ietf.org/doc/html/rfc8200#section-4.5
#[derive(Debug, Clone)]
pub struct FragmentHeader {
    bytes: Bytes,
}

impl FragmentHeader {
    pub const LEN: usize = 8;

    pub fn from_bytes(bytes: &Bytes) -> anyhow::Result<Self> {
        ensure!(
            bytes.len() >= Self::LEN,
            "IPv6 Fragment header truncated: {} bytes.",
            bytes.len()
        );
        Ok(Self {
            bytes: bytes.slice(..Self::LEN),
        })
    }

    impl_get!(get_next_header, bytes, 0, 1, u8);
    impl_get!(get_offset_and_flags, bytes, 2, 4, u16);
    impl_get!(get_identification, bytes, 4, 8, u32);
    impl_get_bits!(get_fragment_offset_blocks, get_offset_and_flags, 3..16, u16);
    impl_get_bit!(get_more_fragments, get_offset_and_flags, 0);

    pub fn get_fragment_offset(&self) -> usize {
        self.get_fragment_offset_blocks() as usize * 8
    }
}

// Length of the extension header starting at `bytes[0]`.
fn extension_len(kind: ExtensionHeader, bytes: &[u8]) -> usize {
    match kind {
        // Counted in 4-octet units, not including the first 8 octets.
        ExtensionHeader::Authentication => (bytes[1] as usize + 2) * 4,
        // Counted in 8-octet units, not including the first 8 octets.
        _ => (bytes[1] as usize + 1) * 8,
    }
}

// Extract a fragment descriptor from an IPv6 packet carrying a Fragment
// header. Everything before the Fragment header is the header of the
// descriptor; the Fragment header itself is in neither part.
pub fn dissect(number: u64, bytes: &Bytes) -> anyhow::Result<Option<Fragment<Ipv6Addr>>> {
    let packet = Ipv6Packet::new(bytes).context("IPv6 packet shorter than the fixed header.")?;
    ensure!(
        packet.get_version() == 6,
        "Not an IPv6 packet: version {}.",
        packet.get_version()
    );

    let declared_end = IPV6_HEADER_LEN + packet.get_payload_length() as usize;
    let end = declared_end.min(bytes.len());
    let mut next_header = packet.get_next_header().0;
    let mut offset = IPV6_HEADER_LEN;

    loop {
        match ExtensionHeader::from_u8(next_header) {
            Some(ExtensionHeader::Fragment) => break,
            Some(kind) => {
                ensure!(
                    offset + 2 <= end,
                    "IPv6 {kind:?} header truncated at offset {offset}."
                );
                next_header = bytes[offset];
                offset += extension_len(kind, &bytes[offset..]);
            }
            None => return Ok(None),
        }
    }

    ensure!(
        offset + FragmentHeader::LEN <= end,
        "IPv6 Fragment header truncated at offset {offset}."
    );
    let fragment_header = FragmentHeader::from_bytes(&bytes.slice(offset..))?;
    let header_len = offset;
    let payload_start = offset + FragmentHeader::LEN;
    let total_len = header_len + declared_end.saturating_sub(payload_start);
    log::trace!(
        "Packet #{number}: IPv6 fragment id=0x{:x} offset={} mf={}",
        fragment_header.get_identification(),
        fragment_header.get_fragment_offset(),
        fragment_header.get_more_fragments()
    );

    Ok(Some(Fragment {
        buffer_id: BufferId {
            src: packet.get_source(),
            dst: packet.get_destination(),
            identification: fragment_header.get_identification(),
            next_protocol: fragment_header.get_next_header(),
        },
        sequence_no: number,
        fragment_offset: fragment_header.get_fragment_offset(),
        header_len,
        more_fragments: fragment_header.get_more_fragments(),
        total_len,
        header: bytes.slice(..header_len),
        payload: bytes.slice(payload_start..end),
    }))
}
