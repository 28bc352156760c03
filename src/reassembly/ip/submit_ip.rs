use super::{Buffer, BufferId, Datagram, Payload};

// Turn a buffer into a datagram. The complete branch is taken when the
// caller already checked the buffer or when the RCVBT says so. Otherwise a
// partial datagram is built in lenient mode only, and only if there is
// something to report.
pub fn submit<A: Copy>(
    bufid: &BufferId<A>,
    buffer: &Buffer,
    checked: bool,
    strict: bool,
) -> Option<Datagram<A>> {
    let payload = if checked || buffer.is_complete() {
        Payload::Complete(buffer.payload())
    } else if strict {
        return None;
    } else {
        let runs = buffer.received_runs();
        if runs.is_empty() && buffer.header().is_empty() {
            return None;
        }
        Payload::Partial(runs)
    };

    Some(Datagram {
        id: *bufid,
        indices: buffer.indices().to_vec(),
        header: buffer.header().clone(),
        payload,
    })
}
