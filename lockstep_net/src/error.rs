// Error taxonomy for the connection layer.
//
// `ConnectionError` covers every way a network connection can die. None of
// these ever escape the public send/receive surface: background threads store
// them on the connection and flip its state to `NotConnected`, and callers
// poll `error_message()` / `failure()` afterwards. `FailureKind` is the
// copyable summary callers branch on.
//
// `PacketError` is the one error the send surface does return. It signals a
// bug in the caller (an empty or oversized packet), not a network condition.

use std::io;

use lockstep_protocol::ClientId;

/// Why a connection ended up `NotConnected`.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to resolve address: no endpoints for {target}")]
    NoEndpoints { target: String },
    #[error("timed out after {timeout_ms} ms waiting for a connection")]
    ConnectTimeout { timeout_ms: u128 },
    #[error("failed to connect: {0}")]
    ConnectFailed(String),
    #[error("timed out after {timeout_ms} ms waiting for the handshake")]
    HandshakeTimeout { timeout_ms: u128 },
    #[error("handshake protocol version mismatch: server={server} client={client}")]
    VersionMismatch { server: i32, client: i32 },
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),
}

/// Copyable classification of a `ConnectionError`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Resolution,
    Timeout,
    Refused,
    VersionMismatch,
    ProtocolViolation,
    Io,
}

impl ConnectionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NoEndpoints { .. } => FailureKind::Resolution,
            Self::ConnectTimeout { .. } | Self::HandshakeTimeout { .. } => FailureKind::Timeout,
            Self::ConnectFailed(_) => FailureKind::Refused,
            Self::VersionMismatch { .. } => FailureKind::VersionMismatch,
            Self::ProtocolViolation(_) => FailureKind::ProtocolViolation,
            Self::Io(_) => FailureKind::Io,
        }
    }

    /// Sort a stream error into a protocol violation (malformed data from the
    /// peer) or a plain I/O failure.
    pub fn from_stream(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::InvalidData {
            Self::ProtocolViolation(err.to_string())
        } else {
            Self::Io(err)
        }
    }
}

/// Caller error on the send path.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("cannot send an empty packet (client {0})")]
    EmptyPacket(ClientId),
    #[error("packet of {len} bytes exceeds the frame size limit")]
    TooLarge { len: usize },
}
