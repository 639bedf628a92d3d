//! One destination's playback loop.
//!
//! The loop paces frames against wall-clock time using the stream's embedded
//! timestamps. It advances exactly one frame per iteration and never skips
//! ahead, so a slow host shows up as lag rather than dropped frames. The
//! pacing sleep, in whole milliseconds, is the only suspension point and
//! wakes on cancellation or when a command is posted.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::color::{rotate_frame, rotation_for, ColorPipeline};
use crate::config::{ColorSettings, DeviceTarget, PlaybackSettings};
use crate::control::{CancelToken, Mailbox, Wake};
use crate::stream::Stream;
use crate::transport::FrameSink;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Playing,
    Paused,
    Stopped,
}

/// How a loop ended. Neither variant is a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Ran off the end of the stream.
    Completed,
    /// Cancelled from outside.
    Stopped,
}

/// Externally observable loop state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStatus {
    pub state: PlaybackState,
    pub frame: usize,
    pub frames_sent: u64,
}

pub type SharedStatus = Arc<Mutex<LoopStatus>>;

/// Result of one loop iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Finished,
    Cancelled,
}

/// Pacing sleeps in whole milliseconds; a sub-millisecond remainder is due now.
fn whole_millis(remaining: Duration) -> Duration {
    Duration::from_millis(remaining.as_millis() as u64)
}

pub struct PlaybackLoop<S: FrameSink> {
    stream: Arc<Stream>,
    target: DeviceTarget,
    settings: PlaybackSettings,
    pipeline: ColorPipeline,
    sink: S,
    mailbox: Arc<Mailbox>,
    cancel: CancelToken,
    status: SharedStatus,

    bytes_per_led: usize,
    rotation: usize,
    start_frame: usize,
    frame_index: usize,
    paused: bool,
    baseline: Instant,
    paused_base: Duration,
    frames_sent: u64,
}

impl<S: FrameSink> PlaybackLoop<S> {
    /// Positions the cursor at `start_seconds` plus the configured sync lead
    /// and starts the clock.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: Arc<Stream>,
        target: DeviceTarget,
        color: ColorSettings,
        settings: PlaybackSettings,
        sink: S,
        mailbox: Arc<Mailbox>,
        cancel: CancelToken,
        status: SharedStatus,
        start_seconds: f64,
    ) -> Self {
        let header = *stream.header();
        let format = header.format;
        let total_target = target.total_leds();
        let pipeline = ColorPipeline::new(color, format, header.counts.total(), total_target);

        let lead_start = (start_seconds + settings.sync_lead_seconds).max(0.0);
        let start_frame = stream.frame_at_or_after((lead_start * 1_000_000.0) as u64);

        let this = Self {
            rotation: rotation_for(target.input_position, total_target),
            bytes_per_led: format.bytes_per_led(),
            stream,
            target,
            settings,
            pipeline,
            sink,
            mailbox,
            cancel,
            status,
            start_frame,
            frame_index: start_frame,
            paused: false,
            baseline: Instant::now(),
            paused_base: Duration::ZERO,
            frames_sent: 0,
        };
        this.publish(PlaybackState::Playing);
        this
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Wall-clock playback time since the last start, seek or resume anchor.
    pub fn elapsed(&self) -> Duration {
        if self.paused {
            self.paused_base
        } else {
            self.paused_base + self.baseline.elapsed()
        }
    }

    fn publish(&self, state: PlaybackState) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        *status = LoopStatus {
            state,
            frame: self.frame_index,
            frames_sent: self.frames_sent,
        };
    }

    fn current_state(&self) -> PlaybackState {
        if self.paused {
            PlaybackState::Paused
        } else {
            PlaybackState::Playing
        }
    }

    fn seek_to(&mut self, seconds: f64) {
        let target_us = (seconds.max(0.0) * 1_000_000.0) as u64;
        self.frame_index = self.stream.frame_at_or_after(target_us);
        self.start_frame = self.frame_index;
        self.baseline = Instant::now();
        self.paused_base = Duration::ZERO;
        info!(
            device = self.target.label(),
            seconds,
            frame = self.frame_index,
            "seek"
        );
    }

    /// Drains the mailbox and applies pause, resume and seek.
    fn apply_commands(&mut self) {
        let snapshot = self.mailbox.take();

        if let Some(seconds) = snapshot.seek {
            self.seek_to(seconds);
        }

        if snapshot.paused && !self.paused {
            self.paused_base += self.baseline.elapsed();
            self.paused = true;
            info!(device = self.target.label(), frame = self.frame_index, "paused");
        } else if !snapshot.paused && self.paused {
            self.baseline = Instant::now();
            self.paused = false;
            info!(device = self.target.label(), frame = self.frame_index, "resumed");
        }
    }

    /// Renders the current frame into the target layout.
    fn render(&mut self) -> Vec<u8> {
        let dt = self.stream.frame_dt_seconds(self.frame_index);
        let raw = self.stream.frame(self.frame_index);
        let mut out = self.pipeline.process(raw, dt);
        if self.rotation > 0 {
            rotate_frame(&mut out, self.rotation, self.bytes_per_led);
        }
        out
    }

    fn send(&mut self, frame: &[u8]) {
        match self.sink.send_frame(frame) {
            Ok(()) => {
                self.frames_sent += 1;
                debug!(
                    device = self.target.label(),
                    frame = self.frame_index,
                    bytes = frame.len(),
                    "frame sent"
                );
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(
                    device = self.target.label(),
                    frame = self.frame_index,
                    "socket would block"
                );
            }
            Err(e) => {
                warn!(
                    device = self.target.label(),
                    frame = self.frame_index,
                    error = %e,
                    "frame send failed"
                );
            }
        }
    }

    /// One loop iteration.
    pub fn tick(&mut self) -> Tick {
        if self.cancel.is_cancelled() {
            return Tick::Cancelled;
        }

        // Read before draining so a command posted in between still wakes us.
        let seen = self.cancel.generation();
        self.apply_commands();

        if self.paused {
            self.publish(PlaybackState::Paused);
            return match self.cancel.wait_since(seen, self.settings.pause_poll) {
                Wake::Cancelled => Tick::Cancelled,
                Wake::Elapsed | Wake::Notified => Tick::Continue,
            };
        }

        if self.frame_index >= self.stream.len() {
            return Tick::Finished;
        }

        let timestamps = self.stream.timestamps();
        let target_offset = Duration::from_micros(
            timestamps[self.frame_index].saturating_sub(timestamps[self.start_frame]),
        );
        let elapsed = self.elapsed();
        if elapsed < target_offset {
            match self.cancel.wait_since(seen, whole_millis(target_offset - elapsed)) {
                Wake::Cancelled => return Tick::Cancelled,
                // A command arrived mid-wait; apply it before rendering.
                Wake::Notified => return Tick::Continue,
                Wake::Elapsed => {}
            }
        }

        let frame = self.render();
        self.send(&frame);
        self.frame_index += 1;
        self.publish(self.current_state());
        Tick::Continue
    }

    fn blank(&mut self) {
        let zeroes = vec![0u8; self.pipeline.frame_len()];
        for i in 0..self.settings.blank_frames {
            if let Err(e) = self.sink.send_frame(&zeroes) {
                warn!(device = self.target.label(), error = %e, "blank frame not sent");
            }
            if i + 1 < self.settings.blank_frames {
                thread::sleep(self.settings.blank_interval);
            }
        }
    }

    /// Runs until the stream ends or `cancel` fires, then blanks the strip.
    pub fn run(mut self) -> PlaybackOutcome {
        info!(
            device = self.target.label(),
            frame = self.frame_index,
            leds = self.target.total_leds(),
            rotation = self.rotation,
            "playback started"
        );

        let outcome = loop {
            match self.tick() {
                Tick::Continue => {}
                Tick::Finished => break PlaybackOutcome::Completed,
                Tick::Cancelled => break PlaybackOutcome::Stopped,
            }
        };

        self.blank();
        self.publish(PlaybackState::Stopped);
        info!(
            device = self.target.label(),
            ?outcome,
            frames_sent = self.frames_sent,
            "playback finished"
        );
        outcome
    }
}
