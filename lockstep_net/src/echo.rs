// Local loopback transport and the receive queue both transports share.
//
// Three layers:
// - `PacketQueue`: the only structure touched by two threads. Producers (the
//   network receive thread, or `send` itself for loopback) append under the
//   lock; the consumer swaps the whole vector out under the same lock. The
//   lock is never held while consumer code runs.
// - `LocalEcho`: a queue plus an optional replay recorder. This is the piece
//   both `EchoConnection` and `NetworkConnection` compose. `deliver` hands
//   each packet to the caller's callback, then to the recorder.
// - `EchoConnection`: singleplayer / replay transport. Everything sent comes
//   straight back tagged with client 1, so the simulation consumes local
//   orders through the same path it would use for remote ones.

use std::sync::{Arc, Mutex, PoisonError};

use lockstep_protocol::{ClientId, ReceivedPacket};

use crate::connection::{Connection, ConnectionState};
use crate::error::PacketError;
use crate::recorder::Recorder;

/// Client ID a loopback connection tags its packets with.
pub const LOCAL_CLIENT_ID: ClientId = ClientId(1);

/// Arrival-ordered packet buffer shared between a producer thread and the
/// simulation thread.
#[derive(Debug, Default)]
pub struct PacketQueue {
    packets: Mutex<Vec<ReceivedPacket>>,
}

impl PacketQueue {
    pub fn push(&self, packet: ReceivedPacket) {
        self.packets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(packet);
    }

    /// Take everything queued so far, leaving the queue empty.
    pub fn take_all(&self) -> Vec<ReceivedPacket> {
        std::mem::take(&mut *self.packets.lock().unwrap_or_else(PoisonError::into_inner))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.packets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receive queue plus optional recorder.
#[derive(Default)]
pub struct LocalEcho {
    queue: Arc<PacketQueue>,
    recorder: Option<Box<dyn Recorder>>,
}

impl LocalEcho {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for a producer on another thread.
    pub fn queue(&self) -> Arc<PacketQueue> {
        Arc::clone(&self.queue)
    }

    /// Append a packet as if it had arrived from `from_client`.
    pub fn echo(&self, from_client: ClientId, packet: Vec<u8>) {
        self.queue.push(ReceivedPacket::new(from_client, packet));
    }

    /// Drain the queue and hand each packet to `packet_fn`, then to the
    /// recorder.
    pub fn deliver(&mut self, packet_fn: &mut dyn FnMut(ClientId, &[u8])) {
        for packet in self.queue.take_all() {
            packet_fn(packet.from_client, &packet.data);
            if let Some(recorder) = self.recorder.as_mut() {
                recorder.receive(packet.from_client, &packet.data);
            }
        }
    }

    pub fn start_recording(&mut self, recorder: Box<dyn Recorder>) {
        // Finish the previous recording before the new one starts.
        self.recorder = None;
        self.recorder = Some(recorder);
    }

    pub fn stop_recording(&mut self) {
        self.recorder = None;
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }
}

/// Singleplayer connection: every packet is delivered back to the sender.
#[derive(Default)]
pub struct EchoConnection {
    echo: LocalEcho,
    disposed: bool,
}

impl EchoConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.echo.is_recording()
    }
}

impl Connection for EchoConnection {
    fn local_client_id(&self) -> ClientId {
        LOCAL_CLIENT_ID
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::PreConnecting
    }

    fn send_packet(&mut self, packet: Vec<u8>) -> Result<(), PacketError> {
        if packet.is_empty() {
            return Err(PacketError::EmptyPacket(LOCAL_CLIENT_ID));
        }
        self.echo.echo(LOCAL_CLIENT_ID, packet);
        Ok(())
    }

    fn receive(&mut self, packet_fn: &mut dyn FnMut(ClientId, &[u8])) {
        self.echo.deliver(packet_fn);
    }

    fn start_recording(&mut self, recorder: Box<dyn Recorder>) {
        self.echo.start_recording(recorder);
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.echo.stop_recording();
    }
}

impl Drop for EchoConnection {
    fn drop(&mut self) {
        self.dispose();
    }
}
