//! Feedback patterns sent outside of stream playback: a rotating segment
//! while a session loads, and a red flash when it fails to start.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::control::CancelToken;
use crate::stream::ColorFormat;
use crate::transport::FrameSink;

/// ~33 updates per second.
pub const LOADING_TICK: Duration = Duration::from_millis(30);
pub const LOADING_SEGMENT: usize = 8;
pub const LOADING_COLOR: [u8; 3] = [0, 90, 255];

pub const FAILURE_FLASHES: usize = 3;
pub const FAILURE_INTERVAL: Duration = Duration::from_millis(250);
const FAILURE_COLOR: [u8; 3] = [255, 0, 0];

fn put(frame: &mut [u8], led: usize, [r, g, b]: [u8; 3], bytes_per_led: usize) {
    let base = led * bytes_per_led;
    frame[base..base + 3].copy_from_slice(&[r, g, b]);
}

/// One loading frame with the segment's head at `position`.
pub fn loading_frame(
    position: usize,
    total_leds: usize,
    segment: usize,
    color: [u8; 3],
    format: ColorFormat,
) -> Vec<u8> {
    let bpl = format.bytes_per_led();
    let mut frame = vec![0u8; total_leds * bpl];
    if total_leds == 0 {
        return frame;
    }
    for i in 0..segment.min(total_leds) {
        put(&mut frame, (position + i) % total_leds, color, bpl);
    }
    frame
}

/// Solid frame in `color`; the white channel stays dark.
pub fn solid_frame(total_leds: usize, color: [u8; 3], format: ColorFormat) -> Vec<u8> {
    let bpl = format.bytes_per_led();
    let mut frame = vec![0u8; total_leds * bpl];
    for led in 0..total_leds {
        put(&mut frame, led, color, bpl);
    }
    frame
}

/// Spins a segment around the strip until `cancel` fires. Returns the number
/// of frames sent.
pub fn run_loading<S: FrameSink + ?Sized>(
    sink: &mut S,
    total_leds: usize,
    format: ColorFormat,
    cancel: &CancelToken,
) -> u64 {
    let mut position = 0usize;
    let mut sent = 0u64;
    while !cancel.is_cancelled() {
        let frame = loading_frame(position, total_leds, LOADING_SEGMENT, LOADING_COLOR, format);
        if let Err(e) = sink.send_frame(&frame) {
            debug!(error = %e, "loading frame not sent");
        }
        sent += 1;
        position = (position + 1) % total_leds.max(1);
        if cancel.sleep(LOADING_TICK) {
            break;
        }
    }
    sent
}

/// Three red/black flash pairs, then silence.
pub fn run_failure<S: FrameSink + ?Sized>(sink: &mut S, total_leds: usize, format: ColorFormat) {
    let red = solid_frame(total_leds, FAILURE_COLOR, format);
    let black = vec![0u8; total_leds * format.bytes_per_led()];
    for _ in 0..FAILURE_FLASHES {
        for frame in [&red, &black] {
            if let Err(e) = sink.send_frame(frame) {
                warn!(error = %e, "failure flash not sent");
            }
            thread::sleep(FAILURE_INTERVAL);
        }
    }
}
