// Byte-level codec for the lockstep order stream.
//
// Three layers, innermost first:
//
// - **Order packets**: `[i32 frame][order bytes...]`. The order blobs are
//   concatenated without their own length prefixes; they are self-delimiting
//   at the order-dispatch layer and opaque here. Frame 0 marks an immediate
//   packet. Sync packets use the same shape with the sync digest as the body.
// - **Client frames** (client -> relay): `[i32 length][packet]`. A client may
//   write several of these back to back in a single socket write.
// - **Relayed frames** (relay -> client): `[i32 length][i32 from_client]
//   [packet]`. The relay stamps the originating client ID.
//
// Plus the one-shot handshake preamble (relay -> client):
// `[i32 protocol_version][i32 client_id]`.
//
// All integers are 32-bit little-endian. Readers reject zero, negative and
// oversized lengths with `InvalidData` before allocating, so a corrupt prefix
// can never trigger a huge allocation. Stream helpers operate on any
// `Read`/`Write`, which keeps the module usable with `TcpStream`,
// `BufReader`/`BufWriter`, and in-memory buffers in tests.

use std::io::{self, Read, Write};

use crate::types::{ClientId, FrameNumber, Handshake, ReceivedPacket};

/// Maximum allowed packet size (16 MB). Protects against unbounded allocation
/// from malformed length prefixes.
pub const MAX_PACKET_SIZE: u32 = 16 * 1024 * 1024;

/// Handshake protocol version this build speaks. Connections take the value
/// from their config, so tests can substitute a different one.
pub const DEFAULT_PROTOCOL_VERSION: i32 = 7;

/// Errors from decoding an order packet that already left the stream layer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("packet of {len} bytes is too short to carry a frame number")]
    Truncated { len: usize },
}

/// Build one order packet: the frame number followed by every order blob.
pub fn encode_orders(frame: FrameNumber, orders: &[Vec<u8>]) -> Vec<u8> {
    let body_len: usize = orders.iter().map(Vec::len).sum();
    let mut packet = Vec::with_capacity(4 + body_len);
    packet.extend_from_slice(&frame.0.to_le_bytes());
    for order in orders {
        packet.extend_from_slice(order);
    }
    packet
}

/// Build an immediate packet carrying a single order.
pub fn encode_immediate(order: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + order.len());
    packet.extend_from_slice(&FrameNumber::IMMEDIATE.0.to_le_bytes());
    packet.extend_from_slice(order);
    packet
}

/// Build a sync packet: frame number followed by the sync digest.
pub fn encode_sync(frame: FrameNumber, sync_data: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + sync_data.len());
    packet.extend_from_slice(&frame.0.to_le_bytes());
    packet.extend_from_slice(sync_data);
    packet
}

/// Split a packet into its frame number and the concatenated order bytes.
pub fn decode_order_packet(packet: &[u8]) -> Result<(FrameNumber, &[u8]), FrameError> {
    let Some((frame_bytes, orders)) = packet.split_first_chunk::<4>() else {
        return Err(FrameError::Truncated { len: packet.len() });
    };
    Ok((FrameNumber(i32::from_le_bytes(*frame_bytes)), orders))
}

/// Write the handshake preamble.
pub fn write_handshake<W: Write>(writer: &mut W, handshake: &Handshake) -> io::Result<()> {
    writer.write_all(&handshake.protocol_version.to_le_bytes())?;
    writer.write_all(&handshake.client_id.0.to_le_bytes())?;
    writer.flush()
}

/// Read the handshake preamble. Does not judge the version; that is the
/// connection's call.
pub fn read_handshake<R: Read>(reader: &mut R) -> io::Result<Handshake> {
    let protocol_version = read_i32(reader)?;
    let client_id = ClientId(read_i32(reader)?);
    Ok(Handshake {
        protocol_version,
        client_id,
    })
}

/// Write a client frame: 4-byte length, then the packet.
pub fn write_client_frame<W: Write>(writer: &mut W, packet: &[u8]) -> io::Result<()> {
    let len = checked_write_len(packet)?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(packet)?;
    writer.flush()
}

/// Read a client frame and return its packet.
///
/// Returns `UnexpectedEof` if the stream closes before or during a frame and
/// `InvalidData` for a zero, negative or oversized length.
pub fn read_client_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_length(reader)?;
    let mut packet = vec![0u8; len];
    reader.read_exact(&mut packet)?;
    Ok(packet)
}

/// Write a relayed frame: 4-byte length, sender ID, then the packet.
pub fn write_relayed_frame<W: Write>(
    writer: &mut W,
    from_client: ClientId,
    packet: &[u8],
) -> io::Result<()> {
    let len = checked_write_len(packet)?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&from_client.0.to_le_bytes())?;
    writer.write_all(packet)?;
    writer.flush()
}

/// Read one relayed frame into a `ReceivedPacket`.
///
/// Same error contract as `read_client_frame`.
pub fn read_relayed_frame<R: Read>(reader: &mut R) -> io::Result<ReceivedPacket> {
    let len = read_length(reader)?;
    let from_client = ClientId(read_i32(reader)?);
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    Ok(ReceivedPacket { from_client, data })
}

fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_length<R: Read>(reader: &mut R) -> io::Result<usize> {
    let len = read_i32(reader)?;
    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "zero-length frame",
        ));
    }
    match u32::try_from(len) {
        Ok(len) if len <= MAX_PACKET_SIZE => Ok(len as usize),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid frame length {len} (max {MAX_PACKET_SIZE})"),
        )),
    }
}

fn checked_write_len(packet: &[u8]) -> io::Result<i32> {
    if packet.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "refusing to write a zero-length frame",
        ));
    }
    if packet.len() > MAX_PACKET_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "packet too large: {} bytes (max {MAX_PACKET_SIZE})",
                packet.len()
            ),
        ));
    }
    // MAX_PACKET_SIZE fits comfortably in an i32.
    #[expect(clippy::cast_possible_truncation)]
    let len = packet.len() as i32;
    Ok(len)
}
