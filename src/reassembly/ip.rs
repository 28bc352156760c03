//! IP fragment reassembly after RFC 791, section 3.2.
//!
//! ```text
//! BUFID <- source|destination|protocol|identification;
//! IF FO = 0 AND MF = 0 AND buffer with BUFID is allocated
//!     THEN flush all reassembly for this BUFID; submit; DONE.
//! IF no buffer with BUFID is allocated
//!     THEN allocate reassembly resources with BUFID; TDL <- 0;
//! put data from fragment into data buffer [FO .. FO + TL - IHL];
//! set RCVBT bits [FO/8 .. (FO + TL - IHL + 7)/8];
//! IF MF = 0 THEN TDL <- TL - IHL + FO;
//! IF FO = 0 THEN put header in header buffer;
//! IF TDL # 0 AND all RCVBT bits [0 .. (TDL + 7)/8] are set
//!     THEN submit datagram; free all reassembly resources; DONE.
//! ```
//!
//! Offsets and lengths here are already in bytes; the dissection layer
//! converts IPv4's 8-octet offsets and 4-octet IHL before handing off.

use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::marker::PhantomData;

use bytes::Bytes;

use super::{Algorithm, Pool};

mod buffer;
#[cfg(test)]
mod fragment_ip;
mod submit_ip;

pub use buffer::Buffer;

/// What differs between IPv4 and IPv6: the address type and the names.
pub trait IpFamily {
    type Addr: Copy + Eq + Hash + Debug + Display;

    const NAME: &'static str;
    const PROTOCOL: &'static str;
    /// Largest payload a reassembled datagram can carry. Octets a fragment
    /// places beyond it are discarded.
    const MAX_DATAGRAM_LEN: usize;
}

/// Buffer identifier (BUFID). Fragments with equal identifiers belong to
/// the same original datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId<A> {
    pub src: A,
    pub dst: A,
    pub identification: u32,
    pub next_protocol: u8,
}

impl<A: Display> Display for BufferId<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} id=0x{:x} proto={}",
            self.src, self.dst, self.identification, self.next_protocol
        )
    }
}

/// One fragment, as extracted by the dissection layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment<A> {
    pub buffer_id: BufferId<A>,
    /// Number of the capture record this fragment came from.
    pub sequence_no: u64,
    /// Byte offset of the payload within the original datagram.
    pub fragment_offset: usize,
    /// Bytes of header preceding the fragmentable part.
    pub header_len: usize,
    pub more_fragments: bool,
    /// Header plus payload.
    pub total_len: usize,
    pub header: Bytes,
    pub payload: Bytes,
}

impl<A> Fragment<A> {
    /// Payload length as declared by the header fields.
    pub fn data_len(&self) -> usize {
        self.total_len.saturating_sub(self.header_len)
    }

    /// FO = 0 and MF = 0.
    pub fn is_unfragmented(&self) -> bool {
        self.fragment_offset == 0 && !self.more_fragments
    }
}

/// A contiguous span of received payload within a partial datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRun {
    pub offset: usize,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// The whole datagram payload, `[0, TDL)`.
    Complete(Bytes),
    /// Received spans in offset order.
    Partial(Vec<PayloadRun>),
}

impl Payload {
    /// Received payload bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::Complete(data) => data.len(),
            Payload::Partial(runs) => runs.iter().map(|run| run.data.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A reassembled (or flushed) datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram<A> {
    pub id: BufferId<A>,
    /// Packet numbers, in arrival order.
    pub indices: Vec<u64>,
    /// Header of the first fragment; empty if it never arrived.
    pub header: Bytes,
    pub payload: Payload,
}

impl<A> Datagram<A> {
    pub fn completed(&self) -> bool {
        matches!(self.payload, Payload::Complete(_))
    }
}

impl<A: Display> Display for Datagram<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.id)?;
        match &self.payload {
            Payload::Complete(data) => write!(f, "completed len={}", data.len())?,
            Payload::Partial(runs) => {
                write!(f, "partial runs=[")?;
                for (i, run) in runs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}..{}", run.offset, run.offset + run.data.len())?;
                }
                write!(f, "]")?;
            }
        }
        write!(f, " header={} frames={:?}", self.header.len(), self.indices)
    }
}

/// RFC 791 reassembly for one address family.
#[derive(Debug)]
pub struct IpReassembly<F> {
    family: PhantomData<F>,
}

impl<F> Default for IpReassembly<F> {
    fn default() -> Self {
        Self {
            family: PhantomData,
        }
    }
}

impl<F: IpFamily> Algorithm for IpReassembly<F> {
    type Fragment = Fragment<F::Addr>;
    type Key = BufferId<F::Addr>;
    type Buffer = Buffer;
    type Datagram = Datagram<F::Addr>;

    fn name(&self) -> &'static str {
        F::NAME
    }

    fn protocol(&self) -> &'static str {
        F::PROTOCOL
    }

    fn reassemble(&self, pool: &mut Pool<Self>, fragment: Fragment<F::Addr>) {
        let bufid = fragment.buffer_id;

        // A whole datagram under a BUFID that still has a buffer: the buffer
        // is leftover. Flush it and drop this fragment.
        if fragment.is_unfragmented() && pool.contains(&bufid) {
            log::debug!(
                "{}: unfragmented packet #{} collides with open buffer {bufid}, flushing it and dropping the packet.",
                F::PROTOCOL,
                fragment.sequence_no
            );
            pool.submit(self, &bufid, false);
            return;
        }

        let offset = fragment.fragment_offset;
        let end = offset
            .saturating_add(fragment.data_len())
            .min(F::MAX_DATAGRAM_LEN);
        let data_len = end.saturating_sub(offset);
        if data_len < fragment.data_len() {
            log::debug!(
                "{}: packet #{} reaches past {} octets, clipped to {data_len}.",
                F::PROTOCOL,
                fragment.sequence_no,
                F::MAX_DATAGRAM_LEN
            );
        }

        let buffer = pool
            .buffers_mut()
            .entry(bufid)
            .and_modify(|buffer| {
                if offset == 0 {
                    buffer.set_header(fragment.header.clone());
                }
            })
            .or_insert_with(|| {
                log::trace!("{}: new buffer {bufid}", F::PROTOCOL);
                Buffer::new(if offset == 0 {
                    fragment.header.clone()
                } else {
                    Bytes::new()
                })
            });

        buffer.push_index(fragment.sequence_no);
        buffer.write(offset, data_len, &fragment.payload);

        if !fragment.more_fragments {
            buffer.set_total_data_len(end);
        }

        if buffer.is_complete() {
            log::trace!(
                "{}: {bufid} will be reassembled in range: 0..{}",
                F::PROTOCOL,
                buffer.total_data_len()
            );
            pool.submit(self, &bufid, true);
        }
    }

    fn submit(
        &self,
        key: &BufferId<F::Addr>,
        buffer: &Buffer,
        checked: bool,
        strict: bool,
    ) -> Option<Datagram<F::Addr>> {
        submit_ip::submit(key, buffer, checked, strict)
    }

    fn indices(datagram: &Datagram<F::Addr>) -> &[u64] {
        &datagram.indices
    }
}
