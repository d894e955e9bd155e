// The connection contract shared by every transport.
//
// The simulation's order dispatch talks to a `Box<dyn Connection>` and does
// not care whether it is a singleplayer loopback (`echo.rs`) or a TCP link
// to a relay (`network.rs`). Both implementations compose a `LocalEcho`
// rather than inheriting from one another.
//
// Failure contract: network problems never come back out of these methods.
// They move `connection_state()` to `NotConnected` and the caller polls for
// that. The only `Err` is `PacketError`, which means the caller built a
// packet no transport can carry.

use lockstep_protocol::{ClientId, FrameNumber, encode_immediate, encode_orders, encode_sync};

use crate::error::PacketError;
use crate::recorder::Recorder;

/// Lifecycle of a connection object. A connection walks this once; retrying
/// means building a fresh connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Local-only connection that never talks to a peer.
    PreConnecting = 0,
    /// Terminal: connecting failed or the link dropped.
    NotConnected = 1,
    Connecting = 2,
    Connected = 3,
}

impl ConnectionState {
    /// Inverse of `as u8`, for states kept in an atomic.
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::PreConnecting,
            2 => Self::Connecting,
            3 => Self::Connected,
            _ => Self::NotConnected,
        }
    }
}

/// Order transport used by the simulation.
pub trait Connection: Send {
    /// ID this endpoint's orders are tagged with.
    fn local_client_id(&self) -> ClientId;

    fn connection_state(&self) -> ConnectionState;

    /// Queue one already-encoded packet. Every other send goes through here.
    fn send_packet(&mut self, packet: Vec<u8>) -> Result<(), PacketError>;

    /// Deliver every packet received since the last call, in arrival order,
    /// then forward each to the recorder if one is attached. Never blocks
    /// waiting for new data.
    fn receive(&mut self, packet_fn: &mut dyn FnMut(ClientId, &[u8]));

    /// Attach a replay recorder, dropping any previous one first.
    fn start_recording(&mut self, recorder: Box<dyn Recorder>);

    /// Tear the connection down. Safe to call more than once.
    fn dispose(&mut self);

    /// Queue all orders for `frame` as one packet.
    fn send(&mut self, frame: FrameNumber, orders: &[Vec<u8>]) -> Result<(), PacketError> {
        self.send_packet(encode_orders(frame, orders))
    }

    /// Queue a sync packet (frame number plus state digest).
    fn send_sync(&mut self, frame: FrameNumber, sync_data: &[u8]) -> Result<(), PacketError> {
        self.send_packet(encode_sync(frame, sync_data))
    }

    /// Queue one frame-0 packet per order, bypassing lockstep batching.
    fn send_immediate(&mut self, orders: &[Vec<u8>]) -> Result<(), PacketError> {
        for order in orders {
            self.send_packet(encode_immediate(order))?;
        }
        Ok(())
    }
}
