// Client roster for the order relay.
//
// `Roster` is the state `relay.rs` drives from its single event-loop thread:
// which clients are connected, the write half of each socket, and the next
// client ID to hand out. No internal locking.
//
// Joining writes the handshake preamble `(protocol_version, client_id)`
// straight away; client IDs start at 1 and are never reused within one relay
// run. Forwarding stamps the sender's ID on each packet and writes it to
// every other client. The sender is skipped because it already delivered
// the packet to itself through its local echo.
//
// Write errors on one client are logged and otherwise ignored. The reader
// thread for that client sees the broken socket and reports the disconnect.

use std::collections::BTreeMap;
use std::io::{self, BufWriter, Write};
use std::net::{Shutdown, TcpStream};

use lockstep_protocol::{ClientId, Handshake, write_handshake, write_relayed_frame};
use log::{debug, info};

pub struct Roster {
    protocol_version: i32,
    clients: BTreeMap<ClientId, BufWriter<TcpStream>>,
    next_client_id: i32,
}

impl Roster {
    pub fn new(protocol_version: i32) -> Self {
        Self {
            protocol_version,
            clients: BTreeMap::new(),
            next_client_id: 1,
        }
    }

    /// Assign an ID to a new client and send it the handshake. The client is
    /// only added if the handshake write succeeds.
    pub fn add_client(&mut self, stream: TcpStream) -> io::Result<ClientId> {
        let client_id = ClientId(self.next_client_id);
        self.next_client_id += 1;

        let mut writer = BufWriter::new(stream);
        write_handshake(
            &mut writer,
            &Handshake {
                protocol_version: self.protocol_version,
                client_id,
            },
        )?;
        self.clients.insert(client_id, writer);
        info!("client {client_id} joined ({} connected)", self.clients.len());
        Ok(client_id)
    }

    /// Drop a client and close its socket. Unknown IDs are ignored.
    pub fn remove_client(&mut self, client_id: ClientId) {
        if let Some(writer) = self.clients.remove(&client_id) {
            let _ = writer.get_ref().shutdown(Shutdown::Both);
            info!("client {client_id} left ({} connected)", self.clients.len());
        }
    }

    /// Send `packet` from `from_client` to everyone else.
    pub fn forward(&mut self, from_client: ClientId, packet: &[u8]) {
        for (&client_id, writer) in self.clients.iter_mut() {
            if client_id == from_client {
                continue;
            }
            if let Err(e) = write_relayed_frame(writer, from_client, packet) {
                debug!("forward to client {client_id} failed: {e}");
            }
        }
    }

    /// Close every client socket, which also ends their reader threads.
    pub fn close_all(&mut self) {
        for (_, mut writer) in std::mem::take(&mut self.clients) {
            let _ = writer.flush();
            let _ = writer.get_ref().shutdown(Shutdown::Both);
        }
    }

    #[cfg(test)]
    pub(crate) fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.clients.contains_key(&client_id)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Read};
    use std::net::TcpListener;
    use std::time::Duration;

    use lockstep_protocol::{read_handshake, read_relayed_frame};

    use super::*;

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (client, server)
    }

    /// Join a fresh client; returns its read side and assigned ID.
    fn join(roster: &mut Roster) -> (BufReader<TcpStream>, ClientId) {
        let (client, server) = tcp_pair();
        let id = roster.add_client(server).unwrap();
        (BufReader::new(client), id)
    }

    #[test]
    fn add_client_sends_handshake() {
        let mut roster = Roster::new(7);
        let (mut reader, id) = join(&mut roster);
        assert_eq!(id, ClientId(1));
        assert_eq!(roster.client_count(), 1);

        let handshake = read_handshake(&mut reader).unwrap();
        assert_eq!(handshake.protocol_version, 7);
        assert_eq!(handshake.client_id, ClientId(1));
    }

    #[test]
    fn ids_are_sequential_and_not_reused() {
        let mut roster = Roster::new(7);
        let (_a, a) = join(&mut roster);
        let (_b, b) = join(&mut roster);
        roster.remove_client(a);
        let (_c, c) = join(&mut roster);
        assert_eq!((a, b, c), (ClientId(1), ClientId(2), ClientId(3)));
        assert!(!roster.contains(a));
        assert_eq!(roster.client_count(), 2);
    }

    #[test]
    fn forward_skips_the_sender() {
        let mut roster = Roster::new(7);
        let (mut reader_a, a) = join(&mut roster);
        let (mut reader_b, b) = join(&mut roster);
        let (mut reader_c, _) = join(&mut roster);
        for reader in [&mut reader_a, &mut reader_b, &mut reader_c] {
            read_handshake(reader).unwrap();
        }

        roster.forward(a, b"from a");
        roster.forward(b, b"from b");

        // A only hears B; B only hears A; C hears both, in order.
        let packet = read_relayed_frame(&mut reader_a).unwrap();
        assert_eq!((packet.from_client, packet.data), (b, b"from b".to_vec()));
        let packet = read_relayed_frame(&mut reader_b).unwrap();
        assert_eq!((packet.from_client, packet.data), (a, b"from a".to_vec()));
        let first = read_relayed_frame(&mut reader_c).unwrap();
        let second = read_relayed_frame(&mut reader_c).unwrap();
        assert_eq!(first.from_client, a);
        assert_eq!(second.from_client, b);
    }

    #[test]
    fn remove_client_closes_its_socket() {
        let mut roster = Roster::new(7);
        let (mut reader, id) = join(&mut roster);
        read_handshake(&mut reader).unwrap();

        roster.remove_client(id);
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        // Removing twice is harmless.
        roster.remove_client(id);
        assert_eq!(roster.client_count(), 0);
    }

    #[test]
    fn close_all_empties_the_roster() {
        let mut roster = Roster::new(7);
        let (mut reader, _) = join(&mut roster);
        let (_other, _) = join(&mut roster);
        read_handshake(&mut reader).unwrap();

        roster.close_all();
        assert_eq!(roster.client_count(), 0);
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
