use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::layer3::IpFragment;
use crate::pcap::PcapReader;
use crate::reassembly::ipv4::Ipv4Reassembly;
use crate::reassembly::ipv6::Ipv6Reassembly;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Family {
    Ipv4,
    Ipv6,
}

/// One engine per address family.
pub struct Reassemblers {
    pub ipv4: Ipv4Reassembly,
    pub ipv6: Ipv6Reassembly,
}

impl Reassemblers {
    pub fn new(strict: bool) -> Self {
        Self {
            ipv4: Ipv4Reassembly::new(strict),
            ipv6: Ipv6Reassembly::new(strict),
        }
    }

    pub fn ingest(&mut self, fragment: IpFragment) {
        match fragment {
            IpFragment::V4(fragment) => self.ipv4.ingest(fragment),
            IpFragment::V6(fragment) => self.ipv6.ingest(fragment),
        }
    }

    pub fn flush_all(&mut self) {
        self.ipv4.flush_all();
        self.ipv6.flush_all();
    }

    pub fn pending(&self) -> usize {
        self.ipv4.pending() + self.ipv6.pending()
    }
}

// Dissect every record of the capture and pass the fragments on in capture
// order. Records that fail to dissect are skipped; a broken capture stops
// the reader. Returns the number of records read.
pub async fn read_capture(
    reader: PcapReader,
    only: Option<Family>,
    fragment_sender: Sender<IpFragment>,
) -> anyhow::Result<u64> {
    let link_type = reader.link_type();
    let mut records = 0u64;

    for record in reader {
        let record = record?;
        records += 1;

        let fragment = match crate::layer2::dissect(link_type, &record) {
            Ok(Some(fragment)) => fragment,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("Frame #{}: dissection failed. {e:?}", record.number);
                continue;
            }
        };

        let wanted = match (&fragment, only) {
            (_, None) => true,
            (IpFragment::V4(_), Some(family)) => family == Family::Ipv4,
            (IpFragment::V6(_), Some(family)) => family == Family::Ipv6,
        };
        if !wanted {
            continue;
        }

        if fragment_sender.send(fragment).await.is_err() {
            log::debug!("Reassembly handler is gone, stop reading.");
            break;
        }
    }

    log::debug!("Read {records} records.");
    Ok(records)
}

// Feed fragments to the engines until the sender side is closed. Returns
// the number of fragments ingested.
pub async fn reassembly_handler(
    mut fragment_receiver: Receiver<IpFragment>,
    reassemblers: Arc<Mutex<Reassemblers>>,
) -> u64 {
    let mut fragments = 0u64;
    while let Some(fragment) = fragment_receiver.recv().await {
        log::trace!("Fragment from frame #{}.", fragment.sequence_no());
        reassemblers.lock().ingest(fragment);
        fragments += 1;
    }
    fragments
}
