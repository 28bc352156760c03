use bit_field::BitField;
use bytes::{Bytes, BytesMut};

use super::PayloadRun;

const BLOCK_SIZE: usize = 8;
const BLOCK_FULL: u8 = u8::MAX;

/// Reassembly state of one BUFID.
///
/// The fragment received bit table (RCVBT) keeps one entry per 8-octet
/// block. Each entry is a byte mask of that block, so a block counts as
/// received only once all of its octets have been written, whichever
/// fragments they came from. Both the table and the data buffer grow on
/// demand.
#[derive(Debug, Default, Clone)]
pub struct Buffer {
    /// Total data length, 0 until the last fragment has been seen.
    total_data_len: usize,
    rcvbt: Vec<u8>,
    indices: Vec<u64>,
    header: Bytes,
    /// Holes are zero.
    data: BytesMut,
}

impl Buffer {
    pub fn new(header: Bytes) -> Self {
        Self {
            header,
            ..Default::default()
        }
    }

    pub fn total_data_len(&self) -> usize {
        self.total_data_len
    }

    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    pub fn header(&self) -> &Bytes {
        &self.header
    }

    pub fn set_header(&mut self, header: Bytes) {
        self.header = header;
    }

    pub fn push_index(&mut self, number: u64) {
        self.indices.push(number);
    }

    pub fn set_total_data_len(&mut self, len: usize) {
        self.total_data_len = len;
        self.grow(len);
    }

    /// Put `len` octets of `payload` at `offset` and mark them received.
    /// A payload shorter than `len` leaves the remainder zero. A span that
    /// overflows the address space is ignored.
    pub fn write(&mut self, offset: usize, len: usize, payload: &[u8]) {
        if len == 0 {
            return;
        }
        let Some(end) = offset.checked_add(len) else {
            return;
        };
        self.grow(end);

        let copied = len.min(payload.len());
        self.data[offset..offset + copied].copy_from_slice(&payload[..copied]);
        self.mark(offset, end);
    }

    fn grow(&mut self, len: usize) {
        if self.data.len() < len {
            self.data.resize(len, 0);
        }
        let blocks = len.div_ceil(BLOCK_SIZE);
        if self.rcvbt.len() < blocks {
            self.rcvbt.resize(blocks, 0);
        }
    }

    // Set the RCVBT bits of octets [start, end).
    fn mark(&mut self, start: usize, end: usize) {
        for block in start / BLOCK_SIZE..end.div_ceil(BLOCK_SIZE) {
            let base = block * BLOCK_SIZE;
            let lo = start.max(base) - base;
            let hi = end.min(base + BLOCK_SIZE) - base;
            self.rcvbt[block].set_bits(lo..hi, ones(hi - lo));
        }
    }

    fn is_received(&self, octet: usize) -> bool {
        self.rcvbt
            .get(octet / BLOCK_SIZE)
            .is_some_and(|mask| mask.get_bit(octet % BLOCK_SIZE))
    }

    /// TDL is known and every octet of [0, TDL) has been received.
    pub fn is_complete(&self) -> bool {
        let tdl = self.total_data_len;
        if tdl == 0 || self.rcvbt.len() < tdl.div_ceil(BLOCK_SIZE) {
            return false;
        }

        let full_blocks = tdl / BLOCK_SIZE;
        if !self.rcvbt[..full_blocks].iter().all(|&mask| mask == BLOCK_FULL) {
            return false;
        }

        let tail = tdl % BLOCK_SIZE;
        tail == 0 || self.rcvbt[full_blocks].get_bits(0..tail) == ones(tail)
    }

    /// Payload `[0, TDL)`.
    pub fn payload(&self) -> Bytes {
        let tdl = self.total_data_len.min(self.data.len());
        Bytes::copy_from_slice(&self.data[..tdl])
    }

    /// Maximal runs of received octets, in offset order.
    pub fn received_runs(&self) -> Vec<PayloadRun> {
        let mut runs = Vec::new();
        let mut start: Option<usize> = None;

        for (block, &mask) in self.rcvbt.iter().enumerate() {
            let base = block * BLOCK_SIZE;
            match mask {
                BLOCK_FULL => {
                    start.get_or_insert(base);
                }
                0 => {
                    if let Some(s) = start.take() {
                        runs.push(self.run(s, base));
                    }
                }
                _ => {
                    for octet in base..base + BLOCK_SIZE {
                        if self.is_received(octet) {
                            start.get_or_insert(octet);
                        } else if let Some(s) = start.take() {
                            runs.push(self.run(s, octet));
                        }
                    }
                }
            }
        }
        if let Some(s) = start {
            runs.push(self.run(s, self.rcvbt.len() * BLOCK_SIZE));
        }

        runs.retain(|run| !run.data.is_empty());
        runs
    }

    fn run(&self, start: usize, end: usize) -> PayloadRun {
        let end = end.min(self.data.len());
        PayloadRun {
            offset: start,
            data: Bytes::copy_from_slice(&self.data[start.min(end)..end]),
        }
    }
}

fn ones(n: usize) -> u8 {
    ((1u16 << n) - 1) as u8
}
