use std::path::Path;
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{error, info};

use crate::config::{ColorSettings, DeviceTarget, PlaybackSettings};
use crate::control::{CancelToken, Mailbox};
use crate::effects::{run_failure, run_loading};
use crate::error::{AmbilightError, Result};
use crate::stream::{Stream, StreamHeader};
use crate::transport::{FrameSink, UdpSink};

use super::engine::{LoopStatus, PlaybackLoop, PlaybackOutcome, SharedStatus};

/// Starts playback sessions against a fixed set of destinations.
#[derive(Clone, Debug)]
pub struct Player {
    targets: Vec<DeviceTarget>,
    color: ColorSettings,
    settings: PlaybackSettings,
}

impl Player {
    pub fn new(
        targets: Vec<DeviceTarget>,
        color: ColorSettings,
        settings: PlaybackSettings,
    ) -> Result<Self> {
        if targets.is_empty() {
            return Err(AmbilightError::config("at least one target is required"));
        }
        Ok(Self {
            targets,
            color,
            settings,
        })
    }

    pub fn targets(&self) -> &[DeviceTarget] {
        &self.targets
    }

    /// Resolves every destination, then loads and plays `path`.
    ///
    /// Any unresolvable host aborts before a single frame is sent.
    pub fn start(&self, path: &Path, start_seconds: f64) -> Result<SessionHandle> {
        let sinks = self
            .targets
            .iter()
            .map(|t| UdpSink::connect(&t.host, t.port))
            .collect::<Result<Vec<_>>>()?;
        self.start_with_sinks(path, start_seconds, sinks)
    }

    /// Like [`Player::start`] with caller-supplied sinks, one per target in
    /// order.
    pub fn start_with_sinks<S>(
        &self,
        path: &Path,
        start_seconds: f64,
        sinks: Vec<S>,
    ) -> Result<SessionHandle>
    where
        S: FrameSink + 'static,
    {
        if sinks.len() != self.targets.len() {
            return Err(AmbilightError::config(format!(
                "{} sinks for {} targets",
                sinks.len(),
                self.targets.len()
            )));
        }

        // A readable header tells the loading effect the strip's byte layout.
        let header = StreamHeader::peek(path)?;
        let format = header.format;

        let spinner = CancelToken::new();
        let spinners: Vec<JoinHandle<S>> = sinks
            .into_iter()
            .zip(&self.targets)
            .map(|(mut sink, target)| {
                let cancel = spinner.clone();
                let leds = target.total_leds();
                thread::spawn(move || {
                    run_loading(&mut sink, leds, format, &cancel);
                    sink
                })
            })
            .collect();

        let loaded = Stream::load(path);
        spinner.cancel();
        let sinks = join_effects(spinners)?;

        let stream = match loaded {
            Ok(stream) => Arc::new(stream),
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot load stream");
                let flashes: Vec<JoinHandle<S>> = sinks
                    .into_iter()
                    .zip(&self.targets)
                    .map(|(mut sink, target)| {
                        let leds = target.total_leds();
                        thread::spawn(move || {
                            run_failure(&mut sink, leds, format);
                            sink
                        })
                    })
                    .collect();
                join_effects(flashes)?;
                return Err(e);
            }
        };

        let cancel = CancelToken::new();
        let mut loops = Vec::with_capacity(self.targets.len());
        for (sink, target) in sinks.into_iter().zip(&self.targets) {
            let mailbox = Arc::new(Mailbox::new());
            let status = SharedStatus::default();
            let looper = PlaybackLoop::new(
                Arc::clone(&stream),
                target.clone(),
                self.color.clone(),
                self.settings.clone(),
                sink,
                Arc::clone(&mailbox),
                cancel.clone(),
                Arc::clone(&status),
                start_seconds,
            );
            let thread = thread::Builder::new()
                .name(format!("ambilight-{}", target.label()))
                .spawn(move || looper.run())?;
            loops.push(LoopHandle {
                name: target.label().to_string(),
                mailbox,
                status,
                thread: Some(thread),
            });
        }

        info!(
            path = %path.display(),
            destinations = loops.len(),
            start_seconds,
            "session started"
        );
        Ok(SessionHandle { loops, cancel })
    }
}

/// Joins effect threads, handing their sinks back in order.
fn join_effects<S>(handles: Vec<JoinHandle<S>>) -> Result<Vec<S>> {
    handles
        .into_iter()
        .map(|h| {
            h.join()
                .map_err(|_| AmbilightError::config("effect thread panicked"))
        })
        .collect()
}

#[derive(Debug)]
struct LoopHandle {
    name: String,
    mailbox: Arc<Mailbox>,
    status: SharedStatus,
    thread: Option<JoinHandle<PlaybackOutcome>>,
}

/// Control surface for a running session. Every command fans out to all
/// destination loops; each loop keeps its own private state.
#[derive(Debug)]
pub struct SessionHandle {
    loops: Vec<LoopHandle>,
    cancel: CancelToken,
}

impl SessionHandle {
    pub fn set_paused(&self, paused: bool) {
        for l in &self.loops {
            l.mailbox.set_paused(paused);
        }
        self.cancel.notify();
    }

    pub fn pause(&self) {
        self.set_paused(true);
    }

    pub fn resume(&self) {
        self.set_paused(false);
    }

    pub fn seek(&self, seconds: f64) {
        for l in &self.loops {
            l.mailbox.seek(seconds);
        }
        self.cancel.notify();
    }

    /// Signals every loop to blank and exit. Does not wait.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn statuses(&self) -> Vec<(String, LoopStatus)> {
        self.loops
            .iter()
            .map(|l| {
                let status = *l.status.lock().unwrap_or_else(PoisonError::into_inner);
                (l.name.clone(), status)
            })
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.loops
            .iter()
            .all(|l| l.thread.as_ref().map_or(true, |t| t.is_finished()))
    }

    /// Blocks until every loop has exited.
    pub fn wait(mut self) -> Vec<PlaybackOutcome> {
        self.join_all()
    }

    fn join_all(&mut self) -> Vec<PlaybackOutcome> {
        let mut outcomes = Vec::with_capacity(self.loops.len());
        for l in &mut self.loops {
            if let Some(thread) = l.thread.take() {
                match thread.join() {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(_) => {
                        error!(device = %l.name, "playback thread panicked");
                        outcomes.push(PlaybackOutcome::Stopped);
                    }
                }
            }
        }
        outcomes
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.join_all();
    }
}
