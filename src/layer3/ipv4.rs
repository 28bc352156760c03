use std::net::Ipv4Addr;

use anyhow::{ensure, Context};
use bytes::Bytes;
use pnet::packet::ipv4::{Ipv4Flags, Ipv4Packet};

use crate::reassembly::ip::{BufferId, Fragment};
use crate::reassembly::ipv4::IPV4_HEADER_LEN;

// Extract a fragment descriptor from an IPv4 packet. Whole packets are
// handed on as well, so that they close stale buffers under their BUFID,
// unless DF says they were never meant to be fragmented.
pub fn dissect(number: u64, bytes: &Bytes) -> anyhow::Result<Option<Fragment<Ipv4Addr>>> {
    let packet = Ipv4Packet::new(bytes).context("IPv4 packet shorter than the minimal header.")?;
    ensure!(
        packet.get_version() == 4,
        "Not an IPv4 packet: version {}.",
        packet.get_version()
    );

    // IHL counts 32-bit words, fragment offset counts 8-octet blocks.
    let header_len = packet.get_header_length() as usize * 4;
    ensure!(header_len >= IPV4_HEADER_LEN, "IPv4 IHL too small: {header_len} bytes.");
    ensure!(
        header_len <= bytes.len(),
        "IPv4 header of {header_len} bytes exceeds the {} captured.",
        bytes.len()
    );
    let fragment_offset = packet.get_fragment_offset() as usize * 8;
    let flags = packet.get_flags();
    let more_fragments = flags & Ipv4Flags::MoreFragments != 0;
    if fragment_offset == 0 && !more_fragments && flags & Ipv4Flags::DontFragment != 0 {
        return Ok(None);
    }

    let total_len = packet.get_total_length() as usize;
    let end = total_len.clamp(header_len, bytes.len());
    log::trace!(
        "Packet #{number}: IPv4 fragment id=0x{:x} offset={fragment_offset} mf={more_fragments}",
        packet.get_identification()
    );

    Ok(Some(Fragment {
        buffer_id: BufferId {
            src: packet.get_source(),
            dst: packet.get_destination(),
            identification: packet.get_identification() as u32,
            next_protocol: packet.get_next_level_protocol().0,
        },
        sequence_no: number,
        fragment_offset,
        header_len,
        more_fragments,
        total_len,
        header: bytes.slice(..header_len),
        payload: bytes.slice(header_len..end),
    }))
}

#[cfg(test)]
mod tests {
    use pnet::packet::ip::IpNextHeaderProtocols;
    use pnet::packet::ipv4::MutableIpv4Packet;

    use super::*;

    fn packet(ihl: u8, flags: u8, offset_blocks: u16, payload: &[u8]) -> Bytes {
        let header_len = ihl as usize * 4;
        let mut buf = vec![0u8; header_len + payload.len()];
        let mut pkt = MutableIpv4Packet::new(&mut buf).unwrap();
        pkt.set_version(4);
        pkt.set_header_length(ihl);
        pkt.set_total_length((header_len + payload.len()) as u16);
        pkt.set_identification(0xabcd);
        pkt.set_flags(flags);
        pkt.set_fragment_offset(offset_blocks);
        pkt.set_ttl(64);
        pkt.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        pkt.set_source(Ipv4Addr::new(10, 0, 0, 1));
        pkt.set_destination(Ipv4Addr::new(10, 0, 0, 2));
        buf[header_len..].copy_from_slice(payload);
        Bytes::from(buf)
    }

    #[test]
    fn first_fragment() {
        let bytes = packet(5, Ipv4Flags::MoreFragments, 0, b"01234567");
        let fragment = dissect(3, &bytes).unwrap().unwrap();
        assert_eq!(fragment.sequence_no, 3);
        assert_eq!(fragment.fragment_offset, 0);
        assert!(fragment.more_fragments);
        assert_eq!(fragment.header_len, 20);
        assert_eq!(fragment.total_len, 28);
        assert_eq!(fragment.header, bytes.slice(..20));
        assert_eq!(fragment.payload, Bytes::from_static(b"01234567"));
        assert_eq!(fragment.buffer_id.identification, 0xabcd);
        assert_eq!(fragment.buffer_id.next_protocol, 17);
        assert_eq!(fragment.buffer_id.src, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn offset_and_options_are_converted_to_bytes() {
        let bytes = packet(6, 0, 185, b"tail");
        let fragment = dissect(1, &bytes).unwrap().unwrap();
        assert_eq!(fragment.fragment_offset, 1480);
        assert_eq!(fragment.header_len, 24);
        assert!(!fragment.more_fragments);
        assert_eq!(fragment.data_len(), 4);
    }

    #[test]
    fn dont_fragment_packet_is_skipped() {
        let bytes = packet(5, Ipv4Flags::DontFragment, 0, b"whole");
        assert!(dissect(1, &bytes).unwrap().is_none());
    }

    #[test]
    fn whole_packet_without_dont_fragment_is_handed_on() {
        let bytes = packet(5, 0, 0, b"whole");
        let fragment = dissect(9, &bytes).unwrap().unwrap();
        assert!(fragment.is_unfragmented());
        assert_eq!(fragment.payload, Bytes::from_static(b"whole"));
        assert_eq!(fragment.sequence_no, 9);
    }

    #[test]
    fn truncated_capture_clips_payload() {
        let bytes = packet(5, Ipv4Flags::MoreFragments, 0, b"0123456789abcdef");
        let fragment = dissect(1, &bytes.slice(..24)).unwrap().unwrap();
        assert_eq!(fragment.total_len, 36);
        assert_eq!(fragment.payload, Bytes::from_static(b"0123"));
    }

    #[test]
    fn malformed_headers_are_errors() {
        assert!(dissect(1, &Bytes::from_static(&[0x45; 10])).is_err());
        let mut small = packet(5, 0, 1, b"x").to_vec();
        small[0] = 0x44;
        assert!(dissect(1, &Bytes::from(small)).is_err());
        let mut bad = packet(5, 0, 1, b"x").to_vec();
        bad[0] = 0x4f;
        assert!(dissect(1, &Bytes::from(bad)).is_err());
    }
}
