// Replay recorder hook.
//
// The replay file format and file naming live outside this crate. All a
// connection needs is somewhere to forward each delivered packet, after the
// simulation's callback has seen it. Dropping the recorder is its
// dispose: a file-backed implementation finalizes its file in `Drop`.
//
// Closures implement the trait too, which keeps ad-hoc recorders (tests,
// in-memory capture for desync reports) short.

use lockstep_protocol::ClientId;

/// Sink for every packet a connection delivers.
pub trait Recorder: Send {
    fn receive(&mut self, from_client: ClientId, data: &[u8]);
}

impl<F> Recorder for F
where
    F: FnMut(ClientId, &[u8]) + Send,
{
    fn receive(&mut self, from_client: ClientId, data: &[u8]) {
        self(from_client, data);
    }
}
