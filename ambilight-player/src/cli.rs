//! Command line and environment knobs.

use std::path::PathBuf;

use ambilight_core::color::ChannelOrder;
use ambilight_core::{
    ColorSettings, DeviceTarget, LedCounts, PlaybackSettings, StreamHeader, DEFAULT_PORT,
};
use clap::{Args, Parser};

#[derive(Parser, Debug)]
#[command(name = "ambilight-player", about = "Play ambilight binary to WLED over UDP")]
pub struct Cli {
    #[arg(long, help = "Path to AMb2 binary file")]
    pub file: PathBuf,

    #[arg(
        long,
        required_unless_present = "targets",
        conflicts_with = "targets",
        help = "WLED host or IP"
    )]
    pub host: Option<String>,

    #[arg(long, default_value_t = DEFAULT_PORT, help = "WLED UDP port")]
    pub port: u16,

    #[arg(long, help = "JSON file with an array of destinations")]
    pub targets: Option<PathBuf>,

    #[arg(long, default_value_t = 0.0, help = "Start time in seconds")]
    pub start: f64,

    #[arg(long, help = "Reference epoch seconds for launch delay compensation")]
    pub ref_epoch: Option<f64>,

    #[arg(
        long,
        env = "AMBILIGHT_SYNC_LEAD_SECONDS",
        default_value_t = 0.0,
        allow_negative_numbers = true
    )]
    pub sync_lead: f64,

    #[command(flatten)]
    pub color: ColorArgs,

    #[command(flatten)]
    pub layout: LayoutArgs,
}

#[derive(Args, Debug)]
pub struct ColorArgs {
    #[arg(long, env = "AMBILIGHT_GAMMA", default_value_t = 2.2)]
    pub gamma: f32,
    #[arg(long, env = "AMBILIGHT_GAMMA_RED", default_value_t = 1.0)]
    pub gamma_red: f32,
    #[arg(long, env = "AMBILIGHT_GAMMA_GREEN", default_value_t = 1.0)]
    pub gamma_green: f32,
    #[arg(long, env = "AMBILIGHT_GAMMA_BLUE", default_value_t = 1.0)]
    pub gamma_blue: f32,
    #[arg(long, env = "AMBILIGHT_SATURATION", default_value_t = 1.0)]
    pub saturation: f32,
    #[arg(long, env = "AMBILIGHT_BRIGHTNESS_TARGET", default_value_t = 60.0)]
    pub brightness_target: f32,
    #[arg(long, env = "AMBILIGHT_SMOOTH_SECONDS", default_value_t = 0.12)]
    pub smooth_seconds: f32,
    #[arg(long, env = "AMBILIGHT_MIN_LED_BRIGHTNESS", default_value_t = 0.0)]
    pub min_led_brightness: f32,
    #[arg(long, env = "AMBILIGHT_RED_BOOST", default_value_t = 3.0)]
    pub red_boost: f32,
    #[arg(long, env = "AMBILIGHT_GREEN_BOOST", default_value_t = 1.0)]
    pub green_boost: f32,
    #[arg(long, env = "AMBILIGHT_BLUE_BOOST", default_value_t = 4.0)]
    pub blue_boost: f32,
    #[arg(long, env = "AMBILIGHT_ORDER", default_value_t = ChannelOrder::Rgb)]
    pub order: ChannelOrder,
}

impl From<&ColorArgs> for ColorSettings {
    fn from(a: &ColorArgs) -> Self {
        Self {
            gamma: a.gamma,
            gamma_red: a.gamma_red,
            gamma_green: a.gamma_green,
            gamma_blue: a.gamma_blue,
            saturation: a.saturation,
            brightness_target: a.brightness_target,
            smooth_seconds: a.smooth_seconds,
            min_led_brightness: a.min_led_brightness,
            red_boost: a.red_boost,
            green_boost: a.green_boost,
            blue_boost: a.blue_boost,
            channel_order: a.order,
        }
    }
}

/// Target strip layout for the single `--host` destination.
#[derive(Args, Debug)]
pub struct LayoutArgs {
    #[arg(long, env = "AMBILIGHT_TOP_LED_COUNT")]
    pub top: Option<u16>,
    #[arg(long, env = "AMBILIGHT_BOTTOM_LED_COUNT")]
    pub bottom: Option<u16>,
    #[arg(long, env = "AMBILIGHT_LEFT_LED_COUNT")]
    pub left: Option<u16>,
    #[arg(long, env = "AMBILIGHT_RIGHT_LED_COUNT")]
    pub right: Option<u16>,
    #[arg(
        long,
        env = "AMBILIGHT_INPUT_POSITION",
        default_value_t = 0,
        allow_negative_numbers = true
    )]
    pub input_position: i32,
}

impl LayoutArgs {
    /// Missing edges fall back to the stream's own counts, at least one each.
    pub fn counts(&self, source: LedCounts) -> LedCounts {
        LedCounts::new(
            self.top.unwrap_or(source.top.max(1)),
            self.bottom.unwrap_or(source.bottom.max(1)),
            self.left.unwrap_or(source.left.max(1)),
            self.right.unwrap_or(source.right.max(1)),
        )
    }
}

impl Cli {
    pub fn playback_settings(&self) -> PlaybackSettings {
        PlaybackSettings {
            sync_lead_seconds: self.sync_lead,
            ..PlaybackSettings::default()
        }
    }

    /// The single destination described by `--host` and the layout flags.
    pub fn host_target(&self, host: &str, header: &StreamHeader) -> DeviceTarget {
        DeviceTarget {
            name: String::new(),
            host: host.to_string(),
            port: self.port,
            counts: self.layout.counts(header.counts),
            input_position: self.layout.input_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambilight_core::ColorFormat;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_library_defaults() {
        let cli = Cli::parse_from(["ambilight-player", "--file", "a.bin", "--host", "wled"]);
        assert_eq!(ColorSettings::from(&cli.color), ColorSettings::default());
        assert_eq!(cli.playback_settings(), PlaybackSettings::default());
        assert_eq!(cli.port, DEFAULT_PORT);
    }

    #[test]
    fn host_or_targets_is_required() {
        assert!(Cli::try_parse_from(["ambilight-player", "--file", "a.bin"]).is_err());
        assert!(Cli::try_parse_from([
            "ambilight-player",
            "--file",
            "a.bin",
            "--host",
            "wled",
            "--targets",
            "t.json"
        ])
        .is_err());
    }

    #[test]
    fn layout_falls_back_to_stream_counts() {
        let cli = Cli::parse_from([
            "ambilight-player",
            "--file",
            "a.bin",
            "--host",
            "wled",
            "--top",
            "40",
            "--input-position",
            "-5",
            "--order",
            "grb",
            "--sync-lead",
            "-0.25",
        ]);
        let header = StreamHeader::new(24.0, LedCounts::new(10, 10, 0, 6), ColorFormat::Rgb);
        let target = cli.host_target("wled", &header);

        assert_eq!(target.counts, LedCounts::new(40, 10, 1, 6));
        assert_eq!(target.input_position, -5);
        assert_eq!(target.port, DEFAULT_PORT);
        assert_eq!(cli.color.order, ChannelOrder::Grb);
        assert_eq!(cli.playback_settings().sync_lead_seconds, -0.25);
    }
}
