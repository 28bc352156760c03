use bytes::Bytes;
use rand::Rng;

use super::{BufferId, Fragment};

pub(crate) const MTU: usize = 1500;

// Split a datagram into fragments that fit `mtu` together with `header`.
// Every fragment but the last carries a multiple of 8 octets. Numbers start
// at `first_number`. Even a payload that fits goes through the same path
// and comes out as a single unfragmented fragment.
pub(crate) fn do_fragment<A: Copy>(
    src: A,
    dst: A,
    next_protocol: u8,
    header: &Bytes,
    payload: &Bytes,
    mtu: usize,
    first_number: u64,
) -> Vec<Fragment<A>> {
    let max_payload_size = (mtu.saturating_sub(header.len()) & !0b111).max(8); // Round down to the nearest multiple of 8.
    let buffer_id = BufferId {
        src,
        dst,
        identification: rand::thread_rng().gen::<u16>() as u32,
        next_protocol,
    };

    let mut fragments: Vec<Fragment<A>> = Vec::new();
    let mut payload = payload.clone();
    let mut fragment_offset = 0usize;
    let mut number = first_number;

    loop {
        let more_fragments = payload.len() > max_payload_size;
        let chunk = if more_fragments {
            payload.split_to(max_payload_size)
        } else {
            std::mem::take(&mut payload)
        };

        fragments.push(Fragment {
            buffer_id,
            sequence_no: number,
            fragment_offset,
            header_len: header.len(),
            more_fragments,
            total_len: header.len() + chunk.len(),
            header: if fragment_offset == 0 {
                header.clone()
            } else {
                Bytes::new()
            },
            payload: chunk,
        });

        if !more_fragments {
            return fragments;
        }
        fragment_offset += max_payload_size;
        number += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use rand::seq::SliceRandom;
    use rstest::rstest;

    use super::*;
    use crate::reassembly::ip::Payload;
    use crate::reassembly::ipv4::Ipv4Reassembly;
    use crate::reassembly::ipv6::Ipv6Reassembly;

    fn datagram(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    #[rstest]
    #[case(1, 1500, 1)]
    #[case(1480, 1500, 1)]
    #[case(1481, 1500, 2)]
    #[case(4000, 1500, 3)]
    #[case(65000, 576, 118)]
    fn fragment_count(#[case] len: usize, #[case] mtu: usize, #[case] expected: usize) {
        let header = Bytes::from(vec![0x45; 20]);
        let fragments = do_fragment(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            17,
            &header,
            &datagram(len),
            mtu,
            1,
        );
        assert_eq!(fragments.len(), expected);
        assert!(fragments.iter().all(|f| f.fragment_offset % 8 == 0));
        assert!(fragments.iter().all(|f| f.total_len <= mtu));
        assert_eq!(fragments.iter().filter(|f| !f.more_fragments).count(), 1);
        assert!(!fragments.last().unwrap().more_fragments);
    }

    #[test]
    fn shuffled_ipv4_fragments_reassemble() {
        let header = Bytes::from(vec![0x45; 20]);
        let payload = datagram(10_000);
        let mut fragments = do_fragment(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            17,
            &header,
            &payload,
            MTU,
            1,
        );
        fragments.shuffle(&mut rand::thread_rng());

        let mut engine = Ipv4Reassembly::strict();
        engine.run(fragments);
        let datagrams = engine.drain();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].payload, Payload::Complete(payload));
        assert_eq!(datagrams[0].header, header);
        assert_eq!(datagrams[0].indices.len(), 7);
    }

    #[test]
    fn shuffled_ipv6_fragments_reassemble() {
        let header = Bytes::from(vec![0x60; 40]);
        let payload = datagram(3_000);
        let mut fragments = do_fragment(
            Ipv6Addr::LOCALHOST,
            "2001:db8::1".parse::<Ipv6Addr>().unwrap(),
            58,
            &header,
            &payload,
            1280,
            100,
        );
        fragments.shuffle(&mut rand::thread_rng());

        let mut engine = Ipv6Reassembly::strict();
        engine.run(fragments);
        let datagrams = engine.drain();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].payload, Payload::Complete(payload));
    }

    #[test]
    fn duplicated_fragments_are_harmless() {
        let header = Bytes::from(vec![0x45; 20]);
        let payload = datagram(5_000);
        let fragments = do_fragment(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            6,
            &header,
            &payload,
            MTU,
            1,
        );
        let last = fragments.len() - 1;

        let mut engine = Ipv4Reassembly::strict();
        engine.run(fragments[1..last].iter().cloned());
        engine.run(fragments[1..last].iter().cloned());
        engine.ingest(fragments[last].clone());
        assert!(engine.drain().is_empty());

        engine.ingest(fragments[0].clone());
        let datagrams = engine.drain();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].payload, Payload::Complete(payload));
    }
}
