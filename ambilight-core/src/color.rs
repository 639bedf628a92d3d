//! Per-frame color grading: resampling from source zones to target LEDs,
//! gamma and saturation, brightness normalization, temporal smoothing and the
//! minimum-brightness floor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ColorSettings;
use crate::error::AmbilightError;
use crate::stream::ColorFormat;

const MAX_SMOOTH_SECONDS: f32 = 5.0;
const MAX_SATURATION: f32 = 5.0;

#[inline]
fn clamp_f(v: f32, lo: f32, hi: f32) -> f32 {
    if v.is_nan() {
        return lo;
    }
    v.max(lo).min(hi)
}

#[inline]
fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

/// Byte order expected by the strip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Rbg,
    Grb,
    Gbr,
    Brg,
    Bgr,
}

impl ChannelOrder {
    #[inline]
    pub fn remap(self, [r, g, b]: [u8; 3]) -> [u8; 3] {
        match self {
            Self::Rgb => [r, g, b],
            Self::Rbg => [r, b, g],
            Self::Grb => [g, r, b],
            Self::Gbr => [g, b, r],
            Self::Brg => [b, r, g],
            Self::Bgr => [b, g, r],
        }
    }
}

impl FromStr for ChannelOrder {
    type Err = AmbilightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RGB" => Ok(Self::Rgb),
            "RBG" => Ok(Self::Rbg),
            "GRB" => Ok(Self::Grb),
            "GBR" => Ok(Self::Gbr),
            "BRG" => Ok(Self::Brg),
            "BGR" => Ok(Self::Bgr),
            _ => Err(AmbilightError::config(format!("unknown channel order '{s}'"))),
        }
    }
}

impl fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgb => "RGB",
            Self::Rbg => "RBG",
            Self::Grb => "GRB",
            Self::Gbr => "GBR",
            Self::Brg => "BRG",
            Self::Bgr => "BGR",
        };
        f.write_str(name)
    }
}

/// Nearest source zone for target LED `target`.
#[inline]
pub fn resample_index(target: usize, total_source: usize, total_target: usize) -> usize {
    if total_target == 0 {
        return 0;
    }
    target * total_source / total_target
}

/// EMA blend factor for a frame `frame_dt` seconds after the previous one.
/// A zero window disables smoothing.
pub fn smoothing_factor(frame_dt: f32, smooth_seconds: f32) -> f32 {
    if !(smooth_seconds > 0.0) {
        return 1.0;
    }
    let tau = smooth_seconds.min(MAX_SMOOTH_SECONDS);
    let dt = if frame_dt.is_finite() { frame_dt.max(0.0) } else { 0.0 };
    clamp_f(1.0 - (-dt / tau).exp(), 0.0, 1.0)
}

/// Rotation implied by a strip's input position.
pub fn rotation_for(input_position: i32, total_leds: usize) -> usize {
    if total_leds == 0 {
        return 0;
    }
    input_position.unsigned_abs() as usize % total_leds
}

/// Cyclically shifts `frame` so LED `i` shows what was at `i + rotation`.
pub fn rotate_frame(frame: &mut [u8], rotation: usize, bytes_per_led: usize) {
    let total = frame.len() / bytes_per_led.max(1);
    if total == 0 {
        return;
    }
    frame.rotate_left((rotation % total) * bytes_per_led);
}

/// Mean Rec.709 luminance over a packed frame.
pub fn frame_luminance(frame: &[u8], bytes_per_led: usize) -> f32 {
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for led in frame.chunks_exact(bytes_per_led) {
        sum += luminance(led[0] as f32, led[1] as f32, led[2] as f32);
        count += 1;
    }
    if count > 0 {
        sum / count as f32
    } else {
        0.0
    }
}

/// Base gamma darkened for bright scenes.
pub fn adjusted_gamma(gamma_base: f32, avg_luminance: f32) -> f32 {
    clamp_f(gamma_base * (1.0 - (avg_luminance / 255.0) * 0.6), 1.0, 3.0)
}

/// Uniform gain pulling the frame's luminance toward `target`.
pub fn brightness_factor(avg_luminance: f32, target: f32) -> f32 {
    let factor = if avg_luminance > 1.0 {
        clamp_f((target.max(1.0) / avg_luminance) * 0.7 + 0.3, 0.05, 2.5)
    } else {
        1.0
    };
    clamp_f(factor, 0.3, 1.8)
}

/// Stateful grader for one destination. Owns the EMA accumulator.
#[derive(Clone, Debug)]
pub struct ColorPipeline {
    settings: ColorSettings,
    format: ColorFormat,
    total_source: usize,
    total_target: usize,
    acc: Option<Vec<f32>>,
}

impl ColorPipeline {
    pub fn new(
        settings: ColorSettings,
        format: ColorFormat,
        total_source: usize,
        total_target: usize,
    ) -> Self {
        Self {
            settings,
            format,
            total_source,
            total_target,
            acc: None,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.total_target * self.format.bytes_per_led()
    }

    /// Forgets smoothing history; the next frame starts from its own colors.
    pub fn reset(&mut self) {
        self.acc = None;
    }

    fn seed(&self, raw: &[u8]) -> Vec<f32> {
        let bpl = self.format.bytes_per_led();
        let mut acc = vec![0.0f32; self.frame_len()];
        for (t, led) in acc.chunks_exact_mut(bpl).enumerate() {
            let sb = resample_index(t, self.total_source, self.total_target) * bpl;
            for (a, &v) in led.iter_mut().zip(&raw[sb..sb + bpl]) {
                *a = v as f32;
            }
        }
        acc
    }

    /// Grades one source frame into a target-layout frame.
    ///
    /// `frame_dt` is the time since the previous source frame in seconds.
    pub fn process(&mut self, raw: &[u8], frame_dt: f32) -> Vec<u8> {
        let bpl = self.format.bytes_per_led();
        let s = &self.settings;

        let avg_lum = frame_luminance(raw, bpl);
        let inv_gamma = 1.0 / adjusted_gamma(s.gamma.max(0.01), avg_lum);
        let gain = brightness_factor(avg_lum, s.brightness_target);
        let saturation = clamp_f(s.saturation, 0.0, MAX_SATURATION);
        let k = smoothing_factor(frame_dt, s.smooth_seconds);

        let min_b = s.min_led_brightness.max(0.0);
        let floors = [min_b * s.red_boost, min_b * s.green_boost, min_b * s.blue_boost];
        let channel_gamma = [s.gamma_red, s.gamma_green, s.gamma_blue];

        let mut acc = match self.acc.take() {
            Some(acc) => acc,
            None => self.seed(raw),
        };
        let mut out = vec![0u8; self.total_target * bpl];

        for t in 0..self.total_target {
            let sb = resample_index(t, self.total_source, self.total_target) * bpl;
            let base = t * bpl;

            let mut lin = [0.0f32; 3];
            for c in 0..3 {
                lin[c] = clamp_f(raw[sb + c] as f32 / 255.0, 0.0, 1.0).powf(channel_gamma[c]);
            }

            // Rotate around the gray axis instead of scaling channels.
            let avg_intensity = (lin[0] + lin[1] + lin[2]) / 3.0;
            let mut rgb = [0.0f32; 3];
            for c in 0..3 {
                let saturated =
                    clamp_f(avg_intensity + (lin[c] - avg_intensity) * saturation, 0.0, 1.0);
                let graded = clamp_f(saturated.powf(inv_gamma), 0.0, 1.0) * gain * 255.0;

                acc[base + c] = acc[base + c] * (1.0 - k) + graded * k;
                // Round the accumulator itself, never the pre-smoothed value.
                rgb[c] = acc[base + c].round();
            }

            for c in 0..3 {
                if rgb[c] > 0.0 && rgb[c] < floors[c] {
                    rgb[c] = floors[c];
                }
            }
            if luminance(rgb[0], rgb[1], rgb[2]) < min_b * 0.5 {
                rgb = [0.0; 3];
            }

            let bytes = rgb.map(|v| clamp_f(v, 0.0, 255.0) as u8);
            out[base..base + 3].copy_from_slice(&s.channel_order.remap(bytes));

            if bpl == 4 {
                acc[base + 3] = acc[base + 3] * (1.0 - k) + raw[sb + 3] as f32 * k;
                out[base + 3] = clamp_f(acc[base + 3].round(), 0.0, 255.0) as u8;
            }
        }

        self.acc = Some(acc);
        out
    }
}
