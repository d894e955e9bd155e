// lockstep_net: order transport for a deterministic lockstep simulation.
//
// Every peer runs the same simulation and only exchanges player orders.
// Each simulation frame, the order dispatcher sends its local orders through
// a `Connection` and, once per tick, drains everything received since the
// last drain with `receive`. A connection delivers its own packets back to
// itself (local echo), so local and remote orders take the same path.
//
// Module overview:
// - `connection.rs`: `ConnectionState` and the `Connection` trait the
//                    simulation talks to.
// - `echo.rs`:       the shared receive queue, `LocalEcho` (queue + replay
//                    recorder), and `EchoConnection` for singleplayer.
// - `network.rs`:    `NetworkConnection`: connect race, handshake, receive
//                    thread, sync batching.
// - `race.rs`:       first-writer-wins `Handoff` and the parallel connect.
// - `target.rs`:     `ConnectionTarget`, the host list a connection resolves.
// - `config.rs`:     `ConnectionConfig` (protocol version, timeouts).
// - `error.rs`:      `ConnectionError`, `FailureKind`, `PacketError`.
// - `recorder.rs`:   the `Recorder` hook for replay capture.
// - `relay.rs`:      a small TCP relay that hands out client IDs and
//                    forwards each client's packets to the others.
// - `roster.rs`:     the relay's connected-client table.
//
// Dependencies: `lockstep_protocol` (wire format), `log`, `thiserror`,
// `serde`. Threads are plain `std::thread`; there is no async runtime.

pub mod config;
pub mod connection;
pub mod echo;
pub mod error;
pub mod network;
pub mod race;
pub mod recorder;
pub mod relay;
pub mod roster;
pub mod target;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState};
pub use echo::{EchoConnection, LOCAL_CLIENT_ID};
pub use error::{ConnectionError, FailureKind, PacketError};
pub use network::NetworkConnection;
pub use recorder::Recorder;
pub use relay::{RelayConfig, RelayHandle, start_relay};
pub use target::ConnectionTarget;
