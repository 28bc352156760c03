//! Generic fragment reassembly engine.
//!
//! The engine owns the open buffers (keyed by buffer identifier) and the
//! sequence of emitted datagrams. What a fragment, a buffer and a datagram
//! look like is decided by the [`Algorithm`] plugged into it.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

pub mod ip;
pub mod ipv4;
pub mod ipv6;

pub trait Algorithm: Sized {
    type Fragment;
    type Key: Eq + Hash + Clone + Debug;
    type Buffer;
    type Datagram: Clone;

    /// Display name of the protocol, e.g. "Internet Protocol version 4".
    fn name(&self) -> &'static str;

    /// Short name of the protocol, e.g. "IPv4".
    fn protocol(&self) -> &'static str;

    /// Feed one fragment. May create, update or flush buffers in `pool`.
    fn reassemble(&self, pool: &mut Pool<Self>, fragment: Self::Fragment);

    /// Convert a buffer into a datagram. `checked` forces the complete branch.
    fn submit(
        &self,
        key: &Self::Key,
        buffer: &Self::Buffer,
        checked: bool,
        strict: bool,
    ) -> Option<Self::Datagram>;

    /// Packet numbers that contributed to a datagram.
    fn indices(datagram: &Self::Datagram) -> &[u64];
}

/// Mutable state of an engine: open buffers and emitted datagrams.
pub struct Pool<A: Algorithm> {
    strict: bool,
    buffers: HashMap<A::Key, A::Buffer>,
    datagrams: Vec<A::Datagram>,
}

impl<A: Algorithm> Pool<A> {
    fn new(strict: bool) -> Self {
        Self {
            strict,
            buffers: HashMap::new(),
            datagrams: Vec::new(),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn contains(&self, key: &A::Key) -> bool {
        self.buffers.contains_key(key)
    }

    pub fn buffers_mut(&mut self) -> &mut HashMap<A::Key, A::Buffer> {
        &mut self.buffers
    }

    /// Remove the buffer under `key` and append whatever it submits.
    /// Returns true if a datagram was emitted.
    pub fn submit(&mut self, algorithm: &A, key: &A::Key, checked: bool) -> bool {
        let Some(buffer) = self.buffers.remove(key) else {
            return false;
        };
        match algorithm.submit(key, &buffer, checked, self.strict) {
            Some(datagram) => {
                self.datagrams.push(datagram);
                true
            }
            None => {
                log::trace!("Dropped buffer {key:?} with nothing to report.");
                false
            }
        }
    }
}

/// Reassembly engine over an algorithm `A`.
pub struct Reassembly<A: Algorithm> {
    algorithm: A,
    pool: Pool<A>,
}

impl<A: Algorithm + Default> Reassembly<A> {
    pub fn new(strict: bool) -> Self {
        Self::with_algorithm(A::default(), strict)
    }

    /// Only fully received datagrams are ever emitted.
    pub fn strict() -> Self {
        Self::new(true)
    }

    /// Flushes also emit best-effort partial datagrams.
    pub fn lenient() -> Self {
        Self::new(false)
    }
}

impl<A: Algorithm> Reassembly<A> {
    pub fn with_algorithm(algorithm: A, strict: bool) -> Self {
        Self {
            algorithm,
            pool: Pool::new(strict),
        }
    }

    pub fn name(&self) -> &'static str {
        self.algorithm.name()
    }

    pub fn protocol(&self) -> &'static str {
        self.algorithm.protocol()
    }

    pub fn is_strict(&self) -> bool {
        self.pool.strict
    }

    pub fn ingest(&mut self, fragment: A::Fragment) {
        self.algorithm.reassemble(&mut self.pool, fragment);
    }

    pub fn run<I>(&mut self, fragments: I)
    where
        I: IntoIterator<Item = A::Fragment>,
    {
        for fragment in fragments {
            self.ingest(fragment);
        }
    }

    /// Take every datagram emitted so far, in emission order.
    pub fn drain(&mut self) -> Vec<A::Datagram> {
        std::mem::take(&mut self.pool.datagrams)
    }

    /// Flush one open buffer. Returns true if a datagram was emitted.
    pub fn flush(&mut self, key: &A::Key) -> bool {
        self.pool.submit(&self.algorithm, key, false)
    }

    /// Flush every open buffer, e.g. at the end of a capture. Emitted
    /// datagrams are ordered by their first packet number.
    pub fn flush_all(&mut self) {
        let keys: Vec<A::Key> = self.pool.buffers.keys().cloned().collect();
        let start = self.pool.datagrams.len();
        for key in keys.iter() {
            self.flush(key);
        }
        self.pool.datagrams[start..].sort_by_key(|d| A::indices(d).first().copied());
        log::debug!(
            "{}: flushed {} buffers, {} datagrams emitted.",
            self.protocol(),
            keys.len(),
            self.pool.datagrams.len() - start
        );
    }

    /// What every open buffer would submit now, followed by the held
    /// datagrams. Nothing is removed.
    pub fn fetch(&self) -> Vec<A::Datagram> {
        let mut datagrams: Vec<A::Datagram> = self
            .pool
            .buffers
            .iter()
            .filter_map(|(key, buffer)| {
                self.algorithm
                    .submit(key, buffer, false, self.pool.strict)
            })
            .collect();
        datagrams.sort_by_key(|d| A::indices(d).first().copied());
        datagrams.extend(self.pool.datagrams.iter().cloned());
        datagrams
    }

    /// Position in [`Self::fetch`] of the datagram packet `number` went into.
    pub fn index(&self, number: u64) -> Option<usize> {
        self.fetch()
            .iter()
            .position(|d| A::indices(d).contains(&number))
    }

    /// Datagrams held and not yet drained.
    pub fn count(&self) -> usize {
        self.pool.datagrams.len()
    }

    /// Open buffers.
    pub fn pending(&self) -> usize {
        self.pool.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::ip::tests::{bufid, frag};
    use super::ipv4::Ipv4Reassembly;

    fn other_frag(
        sequence_no: u64,
        offset: usize,
        payload: &[u8],
        more: bool,
    ) -> super::ip::Fragment<Ipv4Addr> {
        let mut fragment = frag(sequence_no, offset, payload, more);
        fragment.buffer_id.identification = 0x5678;
        fragment
    }

    #[test]
    fn fetch_leaves_state_untouched() {
        let mut engine = Ipv4Reassembly::lenient();
        engine.ingest(frag(1, 0, b"done", false));
        engine.ingest(other_frag(2, 8, b"BBBBBBBB", true));

        let snapshot = engine.fetch();
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot[0].completed());
        assert!(snapshot[1].completed());
        assert_eq!(engine.count(), 1);
        assert_eq!(engine.pending(), 1);

        assert_eq!(engine.index(2), Some(0));
        assert_eq!(engine.index(1), Some(1));
        assert_eq!(engine.index(3), None);
    }

    #[test]
    fn strict_fetch_hides_open_buffers() {
        let mut engine = Ipv4Reassembly::strict();
        engine.ingest(other_frag(2, 8, b"BBBBBBBB", true));
        assert!(engine.fetch().is_empty());
        assert_eq!(engine.index(2), None);
    }

    #[test]
    fn flush_all_orders_by_first_packet() {
        let mut engine = Ipv4Reassembly::lenient();
        engine.ingest(frag(5, 8, b"late", true));
        engine.ingest(other_frag(3, 8, b"early", true));
        engine.ingest(frag(6, 16, b"more", true));
        engine.flush_all();

        assert_eq!(engine.pending(), 0);
        let datagrams = engine.drain();
        assert_eq!(datagrams.len(), 2);
        assert_eq!(datagrams[0].indices, vec![3]);
        assert_eq!(datagrams[1].indices, vec![5, 6]);
        assert_eq!(datagrams[1].id, bufid());
    }

    #[test]
    fn strict_flush_all_drops_everything_incomplete() {
        let mut engine = Ipv4Reassembly::strict();
        engine.ingest(frag(1, 8, b"BBBBBBBB", true));
        engine.ingest(other_frag(2, 0, b"AAAAAAAA", true));
        engine.flush_all();
        assert_eq!(engine.pending(), 0);
        assert!(engine.drain().is_empty());
    }

    #[test]
    fn flush_of_unknown_buffer_is_a_no_op() {
        let mut engine = Ipv4Reassembly::lenient();
        assert!(!engine.flush(&bufid()));
        assert!(engine.drain().is_empty());
    }
}
