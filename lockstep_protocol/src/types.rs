// Core value types for the lockstep wire protocol.
//
// These are the lightweight newtypes and records shared by the codec
// (`framing.rs`), the client connections, and the relay in `lockstep_net`.
// Both IDs are 32-bit signed integers because that is exactly what goes on
// the wire; the newtypes only exist to keep client IDs and frame numbers from
// being mixed up at call sites.
//
// `ReceivedPacket` is the unit that flows from a socket (or a local echo) to
// the simulation's order dispatch. It is built once per decoded frame and
// never mutated afterwards, so it can be moved across the receive-thread
// boundary by value.

use serde::{Deserialize, Serialize};

/// Relay-assigned client ID. Zero is reserved for the server itself.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ClientId(pub i32);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Simulation frame number an order batch belongs to.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FrameNumber(pub i32);

impl FrameNumber {
    /// Sentinel frame for orders applied outside lockstep as soon as they
    /// arrive (handshake responses, chat).
    pub const IMMEDIATE: FrameNumber = FrameNumber(0);

    pub fn is_immediate(self) -> bool {
        self == Self::IMMEDIATE
    }
}

/// One packet delivered to the order dispatch: the sender's client ID and
/// the raw packet bytes (`[frame][order bytes...]`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedPacket {
    pub from_client: ClientId,
    pub data: Vec<u8>,
}

impl ReceivedPacket {
    pub fn new(from_client: ClientId, data: Vec<u8>) -> Self {
        Self { from_client, data }
    }
}

/// Preamble the server sends exactly once after accepting a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub client_id: ClientId,
}
