use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ambilight_core::playback::PlaybackOutcome;
use ambilight_core::{
    CancelToken, ColorSettings, Command, DeviceTarget, Player, SessionHandle, StreamHeader,
};
use anyhow::Context;
use clap::Parser;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Cli;

/// How often the main thread checks whether every loop has exited.
const FINISH_POLL: Duration = Duration::from_millis(100);

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .init();
}

/// Seconds elapsed since the launcher stamped `ref_epoch`.
fn launch_delay(ref_epoch: Option<f64>) -> f64 {
    let Some(reference) = ref_epoch else {
        return 0.0;
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    (now - reference).max(0.0)
}

fn stop_on_signal(token: CancelToken) -> anyhow::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handlers")?;
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!(signal = sig, "shutdown requested, blanking");
                token.cancel();
            }
        })
        .context("spawning signal thread")?;
    Ok(())
}

/// Forwards parsed stdin commands until EOF or a read error.
fn read_commands(tx: Sender<Command>) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "stdin closed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(cmd) => {
                        let stop = cmd == Command::Stop;
                        if tx.send(cmd).is_err() || stop {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "ignoring control line"),
                }
            }
        })
        .context("spawning stdin thread")?;
    Ok(())
}

fn apply(handle: &SessionHandle, cmd: Command) {
    match cmd {
        Command::Pause => {
            info!("pause");
            handle.pause();
        }
        Command::Resume => {
            info!("resume");
            handle.resume();
        }
        Command::Seek(seconds) => {
            info!(seconds, "seek");
            handle.seek(seconds);
        }
        Command::Stop => {
            info!("stop received, blanking");
            handle.stop();
        }
        Command::Beat => debug!("heartbeat"),
    }
}

fn targets(cli: &Cli) -> anyhow::Result<Vec<DeviceTarget>> {
    if let Some(path) = &cli.targets {
        return DeviceTarget::load_all(path)
            .with_context(|| format!("reading targets from '{}'", path.display()));
    }
    let host = cli
        .host
        .as_deref()
        .context("either --host or --targets is required")?;
    let header = StreamHeader::peek(&cli.file)
        .with_context(|| format!("reading header of '{}'", cli.file.display()))?;
    Ok(vec![cli.host_target(host, &header)])
}

fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let targets = targets(&cli)?;
    for t in &targets {
        info!(
            device = t.label(),
            port = t.port,
            leds = t.total_leds(),
            input_position = t.input_position,
            "destination"
        );
    }

    let color = ColorSettings::from(&cli.color);
    let start = cli.start + launch_delay(cli.ref_epoch);
    let player = Player::new(targets, color, cli.playback_settings())?;
    let handle = player
        .start(&cli.file, start)
        .with_context(|| format!("starting playback of '{}'", cli.file.display()))?;

    stop_on_signal(handle.cancel_token())?;
    let (tx, rx) = mpsc::channel();
    read_commands(tx)?;

    while !handle.is_finished() {
        match rx.recv_timeout(FINISH_POLL) {
            Ok(cmd) => apply(&handle, cmd),
            Err(RecvTimeoutError::Timeout) => {}
            // No more commands; playback still runs to its end or a signal.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let outcomes = handle.wait();
    let stopped = outcomes.iter().any(|o| *o == PlaybackOutcome::Stopped);
    info!(destinations = outcomes.len(), stopped, "playback finished");
    Ok(ExitCode::SUCCESS)
}
