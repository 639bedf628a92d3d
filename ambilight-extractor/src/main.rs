use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Instant;

use ambilight_core::{
    extract_stream, CancelToken, ColorFormat, ExtractOutcome, FrameExtractor, LedCounts,
    StreamEncoder, StreamHeader,
};
use anyhow::Context;
use clap::Parser;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod ffmpeg;

use ffmpeg::FfmpegSource;

#[derive(Parser, Debug)]
#[command(name = "ambilight-extractor", about = "Extract ambilight data from video files")]
struct Cli {
    #[arg(long, help = "Path to input video file")]
    input: PathBuf,

    #[arg(long, help = "Path to output binary file")]
    output: PathBuf,

    #[arg(long, default_value_t = 150, help = "Number of top LEDs")]
    top: u16,

    #[arg(long, default_value_t = 150, help = "Number of bottom LEDs")]
    bottom: u16,

    #[arg(long, help = "Number of left LEDs (derived from the aspect ratio if omitted)")]
    left: Option<u16>,

    #[arg(long, help = "Number of right LEDs (derived from the aspect ratio if omitted)")]
    right: Option<u16>,

    #[arg(long, help = "Enable RGBW output (4 bytes per LED instead of 3)")]
    rgbw: bool,

    #[arg(long, default_value_t = 480, help = "Sampling width in pixels")]
    width: u32,

    #[arg(long, default_value_t = 270, help = "Sampling height in pixels")]
    height: u32,
}

impl Cli {
    fn counts(&self) -> LedCounts {
        match (self.left, self.right) {
            (Some(left), Some(right)) => LedCounts::new(self.top, self.bottom, left, right),
            _ => LedCounts::with_proportional_sides(self.top, self.bottom, self.width, self.height),
        }
    }

    fn format(&self) -> ColorFormat {
        if self.rgbw {
            ColorFormat::Rgbw
        } else {
            ColorFormat::Rgb
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .init();
}

/// Cancels `token` on the first SIGINT or SIGTERM.
fn cancel_on_signal(token: CancelToken) -> anyhow::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handlers")?;
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!(signal = sig, "shutdown requested");
                token.cancel();
            }
        })
        .context("spawning signal thread")?;
    Ok(())
}

fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let started = Instant::now();

    let cancel = CancelToken::new();
    cancel_on_signal(cancel.clone())?;

    let video = ffmpeg::probe(&cli.input);
    info!(
        input = %cli.input.display(),
        fps = video.fps,
        duration = video.duration_seconds,
        "video probed"
    );

    let counts = cli.counts();
    let format = cli.format();
    info!(
        top = counts.top,
        bottom = counts.bottom,
        left = counts.left,
        right = counts.right,
        total = counts.total(),
        rgbw = cli.rgbw,
        "LED distribution"
    );

    let extractor = FrameExtractor::new(cli.width, cli.height, counts, format)
        .context("computing LED zones")?;
    let mut encoder = StreamEncoder::new(StreamHeader::new(video.fps as f32, counts, format))?;
    let mut source = FfmpegSource::spawn(&cli.input, cli.width, cli.height)
        .with_context(|| format!("decoding '{}'", cli.input.display()))?;

    let outcome = extract_stream(
        &mut source,
        &extractor,
        &mut encoder,
        &cancel,
        Some(video.expected_frames()),
    )
    .with_context(|| format!("extracting '{}'", cli.input.display()))?;
    drop(source);

    match outcome {
        ExtractOutcome::Completed { frames } => {
            encoder
                .persist(&cli.output)
                .with_context(|| format!("writing '{}'", cli.output.display()))?;
            info!(
                output = %cli.output.display(),
                frames,
                fps = video.fps,
                elapsed_secs = started.elapsed().as_secs_f64(),
                "extraction done"
            );
            Ok(ExitCode::SUCCESS)
        }
        ExtractOutcome::Cancelled { frames } => {
            warn!(frames, "extraction cancelled, nothing written");
            Ok(ExitCode::from(130))
        }
    }
}
