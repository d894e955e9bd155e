// Connect race: try every endpoint at once, keep the first socket that works.
//
// One short-lived thread per candidate endpoint attempts a TCP connect with
// Nagle disabled and offers the result to a shared `Handoff`. The handoff is
// a single slot guarded by a mutex and condvar:
//
// - the first `offer` fills the slot and wakes the waiter;
// - every later offer, including ones that arrive after the waiter has given
//   up, gets its value handed straight back, and the attempt thread drops
//   (closes) the socket;
// - failed attempts `forfeit`, so the waiter can stop early once no
//   candidate is left instead of sitting out the full timeout.
//
// `take_timeout` closes the slot whatever the outcome, so nothing offered
// afterwards is ever kept.

use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::ConnectionError;

/// How a race ended.
#[derive(Debug)]
pub enum RaceOutcome<T> {
    Won(T),
    TimedOut,
    /// Every contender forfeited before anyone offered.
    AllFailed,
}

struct Slot<T> {
    winner: Option<T>,
    pending: usize,
    closed: bool,
}

/// First-writer-wins rendezvous between racing threads and one waiter.
pub struct Handoff<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Handoff<T> {
    pub fn new(contenders: usize) -> Self {
        Self {
            slot: Mutex::new(Slot {
                winner: None,
                pending: contenders,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Offer a value. Returns it back if someone else already won or the
    /// waiter has closed the race.
    pub fn offer(&self, value: T) -> Result<(), T> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.pending = slot.pending.saturating_sub(1);
        if slot.closed || slot.winner.is_some() {
            return Err(value);
        }
        slot.winner = Some(value);
        self.ready.notify_all();
        Ok(())
    }

    /// Withdraw a contender that will never offer.
    pub fn forfeit(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.pending = slot.pending.saturating_sub(1);
        self.ready.notify_all();
    }

    /// Wait up to `timeout` for a winner, then close the race.
    pub fn take_timeout(&self, timeout: Duration) -> RaceOutcome<T> {
        let guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |s| s.winner.is_none() && s.pending > 0)
            .unwrap_or_else(PoisonError::into_inner);
        slot.closed = true;
        match slot.winner.take() {
            Some(winner) => RaceOutcome::Won(winner),
            None if slot.pending == 0 => RaceOutcome::AllFailed,
            None => RaceOutcome::TimedOut,
        }
    }
}

/// Connect to whichever endpoint answers first within `timeout`.
pub fn race_endpoints(
    endpoints: &[SocketAddr],
    timeout: Duration,
) -> Result<TcpStream, ConnectionError> {
    let handoff = Arc::new(Handoff::new(endpoints.len()));
    let last_error = Arc::new(Mutex::new(None::<String>));

    for &endpoint in endpoints {
        let handoff_attempt = Arc::clone(&handoff);
        let last_error = Arc::clone(&last_error);
        let spawned = thread::Builder::new()
            .name(format!("connect to {endpoint}"))
            .spawn(move || attempt(endpoint, timeout, &handoff_attempt, &last_error));
        if let Err(e) = spawned {
            warn!("could not spawn connect thread for {endpoint}: {e}");
            handoff.forfeit();
        }
    }

    match handoff.take_timeout(timeout) {
        RaceOutcome::Won(stream) => Ok(stream),
        RaceOutcome::TimedOut => Err(ConnectionError::ConnectTimeout {
            timeout_ms: timeout.as_millis(),
        }),
        RaceOutcome::AllFailed => {
            let reason = last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .unwrap_or_else(|| "no endpoint accepted the connection".into());
            Err(ConnectionError::ConnectFailed(reason))
        }
    }
}

/// Body of one racing thread.
fn attempt(
    endpoint: SocketAddr,
    timeout: Duration,
    handoff: &Handoff<TcpStream>,
    last_error: &Mutex<Option<String>>,
) {
    let connected = TcpStream::connect_timeout(&endpoint, timeout).and_then(|stream| {
        stream.set_nodelay(true)?;
        Ok(stream)
    });
    match connected {
        Ok(stream) => {
            if let Err(stream) = handoff.offer(stream) {
                debug!("another endpoint won the race; closing {endpoint}");
                drop(stream);
            }
        }
        Err(e) => {
            warn!("failed to connect to {endpoint}: {e}");
            *last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(format!("{endpoint}: {e}"));
            handoff.forfeit();
        }
    }
}
