// TCP transport to an order relay.
//
// Lifecycle of a `NetworkConnection`:
// 1. **Connect race** (`race.rs`): every endpoint the target resolves to is
//    tried in parallel; the first socket wins, the rest are closed. No
//    endpoints at all fails immediately; no winner within the connect
//    timeout fails too.
// 2. **Handshake**: read `(protocol_version, client_id)` under a read
//    timeout. A version other than the configured one is fatal and never
//    retried. Only after a good handshake does the state become `Connected`
//    and the receive thread start.
// 3. **Receive loop**: a dedicated thread reads relayed frames forever and
//    pushes them into the `LocalEcho` queue. Any read error, including a
//    zero-length frame, is stored as the connection's error and flips the
//    state to `NotConnected`. This thread is the only thing that decides the
//    link is dead.
// 4. **Dispose**: shuts the socket down, which makes the blocked read fail,
//    then joins the receive thread. Idempotent, and run from `Drop`.
//
// `connect` runs steps 1-2 on the calling thread; `connect_in_background`
// runs them on a helper thread and returns in `Connecting` straight away.
//
// Send path: the packet is echoed locally first, so the simulation hears its
// own orders through `receive` exactly like remote ones. Sync packets queued
// by `send_sync` are not written on their own; the next `send_packet` puts
// them on the wire (and in the echo) ahead of its own packet, all in one
// socket write. Write failures are logged and dropped.
//
// Cross-thread state lives in `Shared`: state and client ID are atomics
// written by one thread and read by any. The write half of the socket sits
// behind a mutex so dispose can close it while a background connect is
// still installing it. Senders clone the `Arc` out and write with the lock
// released, so a stalled write never blocks closing the socket.
// The receive thread is spawned and registered under its own lock after a
// last `disposed` check, so dispose always finds the handle it must join.

use std::io::{self, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use lockstep_protocol::{
    ClientId, FrameNumber, MAX_PACKET_SIZE, encode_sync, read_handshake, read_relayed_frame,
    write_client_frame,
};
use log::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionState};
use crate::echo::{LocalEcho, PacketQueue};
use crate::error::{ConnectionError, FailureKind, PacketError};
use crate::race::race_endpoints;
use crate::recorder::Recorder;
use crate::target::ConnectionTarget;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the owning connection, the connect thread and the
/// receive thread.
struct Shared {
    state: AtomicU8,
    client_id: AtomicI32,
    disposed: AtomicBool,
    error: Mutex<Option<ConnectionError>>,
    stream: Mutex<Option<Arc<TcpStream>>>,
    endpoint: Mutex<Option<SocketAddr>>,
    receive_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            client_id: AtomicI32::new(0),
            disposed: AtomicBool::new(false),
            error: Mutex::new(None),
            stream: Mutex::new(None),
            endpoint: Mutex::new(None),
            receive_thread: Mutex::new(None),
        }
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `Connecting -> Connected`. Fails if the connection already died.
    fn mark_connected(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Connected as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Record a terminal failure and close the socket. Failures caused by
    /// our own dispose are not errors.
    fn fail(&self, err: ConnectionError) {
        if self.disposed.load(Ordering::SeqCst) {
            debug!("connection closed: {err}");
        } else {
            match *lock(&self.endpoint) {
                Some(endpoint) => warn!("connection to {endpoint} failed: {err}"),
                None => warn!("connection failed: {err}"),
            }
            let mut slot = lock(&self.error);
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.state
            .store(ConnectionState::NotConnected as u8, Ordering::SeqCst);
        self.close_stream();
    }

    /// Keep the write half unless dispose already ran.
    fn install_stream(&self, stream: TcpStream) -> bool {
        let mut slot = lock(&self.stream);
        if self.disposed.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            return false;
        }
        *slot = Some(Arc::new(stream));
        true
    }

    /// Shutting down affects every clone of the socket, so a read blocked on
    /// the receive thread's clone returns immediately.
    fn close_stream(&self) {
        if let Some(stream) = lock(&self.stream).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Lockstep connection to a relay over TCP.
pub struct NetworkConnection {
    target: ConnectionTarget,
    echo: LocalEcho,
    shared: Arc<Shared>,
    queued_sync: Vec<Vec<u8>>,
}

impl NetworkConnection {
    /// Race, handshake and start receiving, blocking until the connection is
    /// either `Connected` or `NotConnected`.
    pub fn connect(target: ConnectionTarget, config: ConnectionConfig) -> Self {
        let conn = Self::unstarted(target);
        establish(&conn.shared, conn.echo.queue(), &conn.target, &config);
        conn
    }

    /// Same as `connect`, but the race and handshake run on a helper thread
    /// and this returns immediately in `Connecting`.
    pub fn connect_in_background(target: ConnectionTarget, config: ConnectionConfig) -> Self {
        let conn = Self::unstarted(target);
        let shared = Arc::clone(&conn.shared);
        let queue = conn.echo.queue();
        let thread_target = conn.target.clone();
        let spawned = thread::Builder::new()
            .name(format!("connect to {}", conn.target))
            .spawn(move || establish(&shared, queue, &thread_target, &config));
        if let Err(e) = spawned {
            conn.shared.fail(ConnectionError::Io(e));
        }
        conn
    }

    fn unstarted(target: ConnectionTarget) -> Self {
        Self {
            target,
            echo: LocalEcho::new(),
            shared: Arc::new(Shared::new()),
            queued_sync: Vec::new(),
        }
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Remote address of the winning socket. Kept after disconnect.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        *lock(&self.shared.endpoint)
    }

    /// Human-readable reason the connection failed, if it has.
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared.error).as_ref().map(ToString::to_string)
    }

    pub fn failure(&self) -> Option<FailureKind> {
        lock(&self.shared.error).as_ref().map(ConnectionError::kind)
    }

    /// Sync packets waiting for the next `send_packet`.
    pub fn queued_sync_packets(&self) -> usize {
        self.queued_sync.len()
    }

    pub fn is_recording(&self) -> bool {
        self.echo.is_recording()
    }

    fn write_to_peer(&self, wire: &[u8]) {
        let stream = lock(&self.shared.stream).as_ref().map(Arc::clone);
        let Some(stream) = stream else {
            debug!("no socket; dropping {} outgoing bytes", wire.len());
            return;
        };
        let mut writer: &TcpStream = &stream;
        if let Err(e) = writer.write_all(wire) {
            // The receive thread will notice the dead link.
            debug!("send failed: {e}");
        }
    }
}

impl Connection for NetworkConnection {
    fn local_client_id(&self) -> ClientId {
        ClientId(self.shared.client_id.load(Ordering::SeqCst))
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn send_packet(&mut self, packet: Vec<u8>) -> Result<(), PacketError> {
        let local = self.local_client_id();
        check_packet(local, &packet)?;

        let syncs = std::mem::take(&mut self.queued_sync);
        let wire = encode_outgoing(&syncs, &packet);
        for sync in syncs {
            self.echo.echo(local, sync);
        }
        self.echo.echo(local, packet);

        match wire {
            Ok(wire) => self.write_to_peer(&wire),
            Err(e) => debug!("could not frame outgoing packets: {e}"),
        }
        Ok(())
    }

    fn send_sync(&mut self, frame: FrameNumber, sync_data: &[u8]) -> Result<(), PacketError> {
        let packet = encode_sync(frame, sync_data);
        check_packet(self.local_client_id(), &packet)?;
        self.queued_sync.push(packet);
        Ok(())
    }

    fn receive(&mut self, packet_fn: &mut dyn FnMut(ClientId, &[u8])) {
        self.echo.deliver(packet_fn);
    }

    fn start_recording(&mut self, recorder: Box<dyn Recorder>) {
        self.echo.start_recording(recorder);
    }

    fn dispose(&mut self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.close_stream();
        self.shared
            .state
            .store(ConnectionState::NotConnected as u8, Ordering::SeqCst);

        let receive_thread = lock(&self.shared.receive_thread).take();
        if let Some(handle) = receive_thread {
            let _ = handle.join();
        }
        self.echo.stop_recording();
        if let Some(endpoint) = self.endpoint() {
            info!("disconnected from {endpoint}");
        }
    }
}

impl Drop for NetworkConnection {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn check_packet(local: ClientId, packet: &[u8]) -> Result<(), PacketError> {
    if packet.is_empty() {
        return Err(PacketError::EmptyPacket(local));
    }
    if packet.len() > MAX_PACKET_SIZE as usize {
        return Err(PacketError::TooLarge { len: packet.len() });
    }
    Ok(())
}

/// Frame the pending sync packets followed by `packet` for one write.
fn encode_outgoing(syncs: &[Vec<u8>], packet: &[u8]) -> io::Result<Vec<u8>> {
    let total: usize = syncs.iter().map(|s| 4 + s.len()).sum::<usize>() + 4 + packet.len();
    let mut wire = Vec::with_capacity(total);
    for sync in syncs {
        write_client_frame(&mut wire, sync)?;
    }
    write_client_frame(&mut wire, packet)?;
    Ok(wire)
}

/// Steps 1-3 of the lifecycle. Every failure ends up in `Shared::fail`.
fn establish(
    shared: &Arc<Shared>,
    queue: Arc<PacketQueue>,
    target: &ConnectionTarget,
    config: &ConnectionConfig,
) {
    if let Err(err) = try_establish(shared, queue, target, config) {
        shared.fail(err);
    }
}

fn try_establish(
    shared: &Arc<Shared>,
    queue: Arc<PacketQueue>,
    target: &ConnectionTarget,
    config: &ConnectionConfig,
) -> Result<(), ConnectionError> {
    let endpoints = target.endpoints();
    if endpoints.is_empty() {
        return Err(ConnectionError::NoEndpoints {
            target: target.to_string(),
        });
    }

    let stream = race_endpoints(&endpoints, config.connect_timeout)?;
    let endpoint = stream.peer_addr()?;
    *lock(&shared.endpoint) = Some(endpoint);

    let reader_stream = stream.try_clone()?;
    if !shared.install_stream(stream) {
        return Ok(());
    }

    reader_stream.set_read_timeout(Some(config.handshake_timeout))?;
    let mut reader = BufReader::new(reader_stream);
    let handshake = read_handshake(&mut reader).map_err(|e| match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            ConnectionError::HandshakeTimeout {
                timeout_ms: config.handshake_timeout.as_millis(),
            }
        }
        _ => ConnectionError::from_stream(e),
    })?;
    if handshake.protocol_version != config.protocol_version {
        return Err(ConnectionError::VersionMismatch {
            server: handshake.protocol_version,
            client: config.protocol_version,
        });
    }
    reader.get_ref().set_read_timeout(None)?;

    shared
        .client_id
        .store(handshake.client_id.0, Ordering::SeqCst);
    if !shared.mark_connected() {
        return Ok(());
    }
    info!(
        "connected to {endpoint} as client {}",
        handshake.client_id
    );

    let mut receive_thread = lock(&shared.receive_thread);
    if shared.disposed.load(Ordering::SeqCst) {
        return Ok(());
    }
    let thread_shared = Arc::clone(shared);
    let handle = thread::Builder::new()
        .name(format!("receive from {endpoint}"))
        .spawn(move || receive_loop(reader, &queue, &thread_shared))?;
    *receive_thread = Some(handle);
    Ok(())
}

/// Receive thread body. Runs until the socket errors or is shut down.
fn receive_loop(mut reader: BufReader<TcpStream>, queue: &PacketQueue, shared: &Shared) {
    loop {
        match read_relayed_frame(&mut reader) {
            Ok(packet) => queue.push(packet),
            Err(e) => {
                shared.fail(ConnectionError::from_stream(e));
                break;
            }
        }
    }
}
