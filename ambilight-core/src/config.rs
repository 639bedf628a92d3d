//! Session configuration: color grading, pacing knobs and destinations.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::color::ChannelOrder;
use crate::error::{AmbilightError, Result};
use crate::zones::LedCounts;

pub const DEFAULT_PORT: u16 = 21324;

/// Color grading applied by the playback pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSettings {
    /// Base output gamma, darkened dynamically for bright scenes.
    pub gamma: f32,
    pub gamma_red: f32,
    pub gamma_green: f32,
    pub gamma_blue: f32,
    pub saturation: f32,
    /// Average luminance (0-255) the brightness normalization aims for.
    pub brightness_target: f32,
    /// EMA window in seconds; zero disables smoothing.
    pub smooth_seconds: f32,
    pub min_led_brightness: f32,
    pub red_boost: f32,
    pub green_boost: f32,
    pub blue_boost: f32,
    pub channel_order: ChannelOrder,
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            gamma: 2.2,
            gamma_red: 1.0,
            gamma_green: 1.0,
            gamma_blue: 1.0,
            saturation: 1.0,
            brightness_target: 60.0,
            smooth_seconds: 0.12,
            min_led_brightness: 0.0,
            red_boost: 3.0,
            green_boost: 1.0,
            blue_boost: 4.0,
            channel_order: ChannelOrder::Rgb,
        }
    }
}

/// Timing knobs for the playback loop.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackSettings {
    /// Added to the start position so lights lead (or trail) the video.
    pub sync_lead_seconds: f64,
    /// How often a paused loop re-checks its mailbox.
    pub pause_poll: Duration,
    pub blank_frames: usize,
    pub blank_interval: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            sync_lead_seconds: 0.0,
            pause_poll: Duration::from_millis(80),
            blank_frames: 3,
            blank_interval: Duration::from_millis(20),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// One UDP lighting destination and its physical LED layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceTarget {
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(flatten)]
    pub counts: LedCounts,
    /// Cyclic offset of the strip's first LED; the sign is ignored.
    #[serde(default)]
    pub input_position: i32,
}

impl DeviceTarget {
    pub fn total_leds(&self) -> usize {
        self.counts.total()
    }

    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.host
        } else {
            &self.name
        }
    }

    /// Reads a JSON array of targets.
    pub fn load_all(path: &Path) -> Result<Vec<DeviceTarget>> {
        let text = fs::read_to_string(path)?;
        let targets: Vec<DeviceTarget> = serde_json::from_str(&text)?;
        if targets.is_empty() {
            return Err(AmbilightError::config(format!(
                "no targets defined in '{}'",
                path.display()
            )));
        }
        if let Some(t) = targets.iter().find(|t| t.total_leds() == 0) {
            return Err(AmbilightError::config(format!(
                "target '{}' has no LEDs",
                t.label()
            )));
        }
        Ok(targets)
    }
}
