// Integration smoke test for the relay and network connections.
//
// Starts a relay on localhost and connects real `NetworkConnection`s to it,
// exercising the full path: connect race, handshake, local echo, sync
// batching, forwarding through the relay, and disconnect detection. A raw
// TCP client covers the malformed-frame cases the connection type never
// produces itself.

use std::io::{BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use lockstep_net::{
    Connection, ConnectionConfig, ConnectionState, ConnectionTarget, FailureKind,
    NetworkConnection, RelayConfig, start_relay,
};
use lockstep_protocol::{
    ClientId, FrameNumber, decode_order_packet, encode_immediate, encode_orders, encode_sync,
    read_handshake, read_relayed_frame, write_client_frame,
};

fn connect(addr: SocketAddr) -> NetworkConnection {
    let conn = NetworkConnection::connect(
        ConnectionTarget::new("127.0.0.1", addr.port()),
        ConnectionConfig::default(),
    );
    assert_eq!(
        conn.connection_state(),
        ConnectionState::Connected,
        "connect failed: {:?}",
        conn.error_message()
    );
    conn
}

/// Keep draining `conn` until at least `count` packets have arrived.
fn receive_at_least(conn: &mut NetworkConnection, count: usize) -> Vec<(ClientId, Vec<u8>)> {
    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while received.len() < count && Instant::now() < deadline {
        conn.receive(&mut |from, data| received.push((from, data.to_vec())));
        thread::sleep(Duration::from_millis(10));
    }
    received
}

fn wait_for_state(conn: &NetworkConnection, state: ConnectionState) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if conn.connection_state() == state {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn orders_flow_between_two_clients() {
    let (handle, addr) = start_relay(RelayConfig::default()).unwrap();

    let mut alice = connect(addr);
    let mut bob = connect(addr);
    assert_eq!(alice.local_client_id(), ClientId(1));
    assert_eq!(bob.local_client_id(), ClientId(2));

    // Alice reports a sync digest, then sends her frame's orders. The sync
    // rides ahead of the orders for everyone.
    alice.send_sync(FrameNumber(1), b"digest").unwrap();
    alice
        .send(FrameNumber(2), &[b"move".to_vec(), b"attack".to_vec()])
        .unwrap();

    let expected = vec![
        (ClientId(1), encode_sync(FrameNumber(1), b"digest")),
        (
            ClientId(1),
            encode_orders(FrameNumber(2), &[b"move".to_vec(), b"attack".to_vec()]),
        ),
    ];
    assert_eq!(receive_at_least(&mut bob, 2), expected);

    // Alice hears her own packets once, from the local echo, never back
    // from the relay.
    bob.send_immediate(&[b"gg".to_vec()]).unwrap();
    let heard_by_alice = receive_at_least(&mut alice, 3);
    assert_eq!(heard_by_alice.len(), 3);
    assert_eq!(&heard_by_alice[..2], &expected[..]);
    assert_eq!(heard_by_alice[2], (ClientId(2), encode_immediate(b"gg")));

    let (frame, body) = decode_order_packet(&heard_by_alice[2].1).unwrap();
    assert!(frame.is_immediate());
    assert_eq!(body, b"gg");

    alice.dispose();
    bob.dispose();
    handle.stop();
}

#[test]
fn relay_with_another_version_is_rejected() {
    let (handle, addr) = start_relay(RelayConfig {
        protocol_version: 8,
        ..RelayConfig::default()
    })
    .unwrap();

    let conn = NetworkConnection::connect(
        ConnectionTarget::from_addrs([addr]),
        ConnectionConfig::default(),
    );
    assert_eq!(conn.connection_state(), ConnectionState::NotConnected);
    assert_eq!(conn.failure(), Some(FailureKind::VersionMismatch));
    assert_eq!(
        conn.error_message().unwrap(),
        "handshake protocol version mismatch: server=8 client=7"
    );

    handle.stop();
}

#[test]
fn malformed_client_frame_only_drops_that_client() {
    let (handle, addr) = start_relay(RelayConfig::default()).unwrap();
    let mut alice = connect(addr);

    let mut raw = TcpStream::connect(addr).unwrap();
    raw.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let handshake = read_handshake(&mut raw).unwrap();
    assert_eq!(handshake.client_id, ClientId(2));

    // Zero-length frame: the relay hangs up on this client.
    raw.write_all(&0i32.to_le_bytes()).unwrap();
    let mut buf = [0u8; 16];
    assert!(matches!(raw.read(&mut buf), Ok(0) | Err(_)));

    // Alice is unaffected and a newcomer still gets a fresh ID.
    let mut carol = connect(addr);
    assert_eq!(carol.local_client_id(), ClientId(3));
    carol.send(FrameNumber(1), &[vec![7]]).unwrap();
    let heard = receive_at_least(&mut alice, 1);
    assert_eq!(heard, vec![(ClientId(3), encode_orders(FrameNumber(1), &[vec![7]]))]);
    assert_eq!(alice.connection_state(), ConnectionState::Connected);

    handle.stop();
}

#[test]
fn raw_client_frames_are_stamped_with_the_sender() {
    let (handle, addr) = start_relay(RelayConfig::default()).unwrap();

    let mut first = TcpStream::connect(addr).unwrap();
    first.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut second = BufReader::new(TcpStream::connect(addr).unwrap());
    second
        .get_ref()
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(read_handshake(&mut first).unwrap().client_id, ClientId(1));
    assert_eq!(read_handshake(&mut second).unwrap().client_id, ClientId(2));

    write_client_frame(&mut first, b"payload").unwrap();
    let packet = read_relayed_frame(&mut second).unwrap();
    assert_eq!(packet.from_client, ClientId(1));
    assert_eq!(packet.data, b"payload");

    handle.stop();
}

#[test]
fn stopping_the_relay_disconnects_clients() {
    let (handle, addr) = start_relay(RelayConfig::default()).unwrap();
    let mut conn = connect(addr);
    conn.send(FrameNumber(1), &[vec![1]]).unwrap();

    handle.stop();

    assert!(wait_for_state(&conn, ConnectionState::NotConnected));
    assert_eq!(conn.failure(), Some(FailureKind::Io));
    assert_eq!(conn.endpoint(), Some(addr));

    // Sends keep succeeding locally; the echo still delivers them.
    conn.send(FrameNumber(2), &[vec![2]]).unwrap();
    let received = receive_at_least(&mut conn, 2);
    assert_eq!(received.len(), 2);
}

#[test]
fn background_connect_through_the_relay() {
    let (handle, addr) = start_relay(RelayConfig::default()).unwrap();

    let mut conn = NetworkConnection::connect_in_background(
        ConnectionTarget::from_addrs([addr]),
        ConnectionConfig::default(),
    );
    assert!(wait_for_state(&conn, ConnectionState::Connected));
    assert_eq!(conn.local_client_id(), ClientId(1));

    conn.dispose();
    assert_eq!(conn.connection_state(), ConnectionState::NotConnected);
    assert!(conn.error_message().is_none());
    handle.stop();
}
