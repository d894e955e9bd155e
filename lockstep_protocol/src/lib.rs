// lockstep_protocol: wire codec for the lockstep order stream.
//
// This crate defines the value types and byte framing shared by game clients
// (`lockstep_net::NetworkConnection`) and the order relay
// (`lockstep_net::relay`). It has no networking of its own and no dependency
// on the simulation: orders are opaque byte blobs.
//
// Module overview:
// - `types.rs`:    `ClientId`, `FrameNumber`, `ReceivedPacket`, `Handshake`.
// - `framing.rs`:  Order/sync packet encoding, client and relayed frame
//                  readers/writers over any `Read`/`Write`, handshake
//                  preamble.
//
// Design decisions:
// - **Fixed-width little-endian integers.** Every field on the wire is an
//   `i32`; there is no self-describing format and no compression.
// - **No async runtime.** Uses `std::io::Read`/`Write`, compatible with
//   blocking TCP streams read from dedicated threads.

pub mod framing;
pub mod types;

pub use framing::{
    DEFAULT_PROTOCOL_VERSION, FrameError, MAX_PACKET_SIZE, decode_order_packet, encode_immediate,
    encode_orders, encode_sync, read_client_frame, read_handshake, read_relayed_frame,
    write_client_frame, write_handshake, write_relayed_frame,
};
pub use types::{ClientId, FrameNumber, Handshake, ReceivedPacket};
