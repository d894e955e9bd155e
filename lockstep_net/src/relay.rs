// TCP server and event loop for the order relay.
//
// The relay is the far end of every `NetworkConnection`: it hands out client
// IDs and copies each client's packets to everyone else. It never looks
// inside a packet.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread**: non-blocking `accept()` loop that polls
//   `keep_running` and sends `RelayEvent::NewConnection` to the main thread.
// - **Reader threads** (one per client): read client frames in a loop and
//   send `RelayEvent::PacketFrom`. On error, EOF or a malformed frame
//   (zero-length, negative or oversized) they send `RelayEvent::Disconnected`
//   and exit.
// - **Main thread**: owns the `Roster` and is the only writer to client
//   sockets. Uses `recv_timeout` so it notices `keep_running` going false
//   even when no client is talking.
//
// Shutdown: `RelayHandle::stop` clears `keep_running` and joins the main
// thread, which closes every client socket on the way out. That unblocks the
// reader threads, and the listener thread notices the flag on its next poll.

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use lockstep_protocol::{ClientId, DEFAULT_PROTOCOL_VERSION, read_client_frame};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::roster::Roster;

/// How often the main loop and the listener re-check `keep_running`.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Events sent from listener/reader threads to the main thread.
enum RelayEvent {
    NewConnection { stream: TcpStream },
    PacketFrom { client_id: ClientId, data: Vec<u8> },
    Disconnected { client_id: ClientId },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Configuration for starting a relay server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Port to listen on; 0 lets the OS pick one.
    pub port: u16,
    /// Version written into every handshake.
    pub protocol_version: i32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 0,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
        }
    }
}

/// Start the relay on a background thread. Returns a handle for stopping it
/// and the actual bound address (useful when port 0 is used).
pub fn start_relay(config: RelayConfig) -> io::Result<(RelayHandle, SocketAddr)> {
    let listener = TcpListener::bind(("127.0.0.1", config.port))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_relay = Arc::clone(&keep_running);

    let thread = thread::Builder::new()
        .name(format!("relay on {addr}"))
        .spawn(move || run_relay(listener, &config, &keep_running_relay))?;
    info!("relay listening on {addr}");

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(listener: TcpListener, config: &RelayConfig, keep_running: &Arc<AtomicBool>) {
    let mut roster = Roster::new(config.protocol_version);
    let (tx, rx): (Sender<RelayEvent>, Receiver<RelayEvent>) = mpsc::channel();

    let keep_running_listener = Arc::clone(keep_running);
    let tx_listener = tx.clone();
    let spawned = thread::Builder::new()
        .name("relay listener".into())
        .spawn(move || accept_loop(&listener, &tx_listener, &keep_running_listener));
    if let Err(e) = spawned {
        warn!("relay could not start its listener: {e}");
        return;
    }

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                handle_event(&mut roster, event, &tx);
                // Drain anything else that arrived meanwhile.
                while let Ok(event) = rx.try_recv() {
                    handle_event(&mut roster, event, &tx);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    roster.close_all();
    info!("relay stopped");
}

fn accept_loop(listener: &TcpListener, tx: &Sender<RelayEvent>, keep_running: &AtomicBool) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!("relay accepted {addr}");
                if tx.send(RelayEvent::NewConnection { stream }).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                warn!("relay accept failed: {e}");
                break;
            }
        }
    }
}

/// Dispatch a single event to the roster.
fn handle_event(roster: &mut Roster, event: RelayEvent, tx: &Sender<RelayEvent>) {
    match event {
        RelayEvent::NewConnection { stream } => {
            if let Err(e) = handle_new_connection(roster, stream, tx) {
                debug!("dropping new connection: {e}");
            }
        }
        RelayEvent::PacketFrom { client_id, data } => {
            // Packets still in the channel from a client that was already
            // removed are dropped.
            if roster.contains(client_id) {
                roster.forward(client_id, &data);
            }
        }
        RelayEvent::Disconnected { client_id } => roster.remove_client(client_id),
    }
}

/// Send the handshake, register the client and spawn its reader thread.
fn handle_new_connection(
    roster: &mut Roster,
    stream: TcpStream,
    tx: &Sender<RelayEvent>,
) -> io::Result<()> {
    // Accepted sockets can inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let reader = BufReader::new(stream.try_clone()?);
    let client_id = roster.add_client(stream)?;

    let tx_reader = tx.clone();
    let spawned = thread::Builder::new()
        .name(format!("relay reader {client_id}"))
        .spawn(move || reader_loop(reader, client_id, &tx_reader));
    if let Err(e) = spawned {
        roster.remove_client(client_id);
        return Err(e);
    }
    Ok(())
}

/// Reader loop for a single client. Runs in its own thread.
fn reader_loop(mut reader: BufReader<TcpStream>, client_id: ClientId, tx: &Sender<RelayEvent>) {
    loop {
        match read_client_frame(&mut reader) {
            Ok(data) => {
                if tx.send(RelayEvent::PacketFrom { client_id, data }).is_err() {
                    break;
                }
            }
            Err(e) => {
                if e.kind() == io::ErrorKind::InvalidData {
                    warn!("client {client_id} sent a malformed frame: {e}");
                } else {
                    debug!("client {client_id} read ended: {e}");
                }
                let _ = tx.send(RelayEvent::Disconnected { client_id });
                break;
            }
        }
    }
}
