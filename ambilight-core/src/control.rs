//! Cross-thread control: the pause/seek mailbox a playback loop polls once per
//! iteration, the cancellation token that wakes its sleeps, and the text
//! command protocol spoken on the player's stdin.

use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::AmbilightError;

#[derive(Debug, Default)]
struct Pending {
    paused: bool,
    seek: Option<f64>,
}

/// What a loop sees when it drains its mailbox.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub paused: bool,
    pub seek: Option<f64>,
}

/// Single-slot command block shared between a control caller and one loop.
///
/// Every write fully replaces the previous pending value, so repeated or
/// out-of-order commands collapse to the latest one.
#[derive(Debug, Default)]
pub struct Mailbox {
    pending: Mutex<Pending>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    pub fn seek(&self, seconds: f64) {
        self.lock().seek = Some(seconds);
    }

    /// Reads the pause flag and takes any pending seek.
    pub fn take(&self) -> Snapshot {
        let mut pending = self.lock();
        Snapshot {
            paused: pending.paused,
            seek: pending.seek.take(),
        }
    }
}

#[derive(Debug, Default)]
struct Signal {
    cancelled: bool,
    generation: u64,
}

/// Why a [`CancelToken::wait`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    /// Someone posted a command; re-check the mailbox.
    Notified,
    Cancelled,
}

/// Cloneable stop signal whose sleeps return early once cancelled or
/// notified.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<Signal>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Signal> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cancel(&self) {
        self.lock().cancelled = true;
        self.inner.1.notify_all();
    }

    /// Wakes current sleepers without cancelling them.
    pub fn notify(&self) {
        let mut signal = self.lock();
        signal.generation = signal.generation.wrapping_add(1);
        drop(signal);
        self.inner.1.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Current notification count. Pass it to [`CancelToken::wait_since`] to
    /// catch notifications posted between reading state and sleeping.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Waits up to `timeout` for cancellation or a notification.
    pub fn wait(&self, timeout: Duration) -> Wake {
        let seen = self.generation();
        self.wait_since(seen, timeout)
    }

    /// Like [`CancelToken::wait`], but any notification after `seen` counts,
    /// including ones that arrived before this call.
    pub fn wait_since(&self, seen: u64, timeout: Duration) -> Wake {
        let guard = self.lock();
        if guard.cancelled {
            return Wake::Cancelled;
        }
        if guard.generation != seen {
            return Wake::Notified;
        }
        if timeout.is_zero() {
            return Wake::Elapsed;
        }
        let (guard, _) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |s| !s.cancelled && s.generation == seen)
            .unwrap_or_else(PoisonError::into_inner);
        if guard.cancelled {
            Wake::Cancelled
        } else if guard.generation != seen {
            Wake::Notified
        } else {
            Wake::Elapsed
        }
    }

    /// Sleeps up to `timeout`. Returns `true` if cancelled.
    pub fn sleep(&self, timeout: Duration) -> bool {
        self.wait(timeout) == Wake::Cancelled
    }
}

/// Line-oriented control command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Pause,
    Resume,
    Seek(f64),
    Stop,
    /// Position heartbeat, accepted for compatibility and otherwise ignored.
    Beat,
}

impl FromStr for Command {
    type Err = AmbilightError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let verb = parts.first().copied().unwrap_or_default().to_ascii_uppercase();
        match (verb.as_str(), parts.len()) {
            ("PAUSE", 1) => Ok(Self::Pause),
            ("RESUME", 1) => Ok(Self::Resume),
            ("STOP", 1) => Ok(Self::Stop),
            ("SEEK", 2) => parts[1]
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite())
                .map(Self::Seek)
                .ok_or_else(|| AmbilightError::config(format!("bad seek position '{}'", parts[1]))),
            ("BEAT", 2 | 3) => Ok(Self::Beat),
            _ => Err(AmbilightError::config(format!("unknown command '{line}'"))),
        }
    }
}
