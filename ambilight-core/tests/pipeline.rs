use std::collections::VecDeque;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use ambilight_core::config::{ColorSettings, DeviceTarget, PlaybackSettings};
use ambilight_core::playback::{PlaybackOutcome, Player};
use ambilight_core::{
    extract_stream, CancelToken, ColorFormat, ExtractOutcome, FrameExtractor, FrameSource,
    LedCounts, Result, Stream, StreamEncoder, StreamHeader,
};
use image::{Rgb, RgbImage};
use pretty_assertions::assert_eq;
use rstest::rstest;
use tempfile::TempDir;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 36;
const FPS: f32 = 100.0;

struct Synthetic(VecDeque<RgbImage>);

impl Synthetic {
    /// Frames fading from black to `color`.
    fn fade(frames: u32, color: [u8; 3]) -> Self {
        let images = (0..frames)
            .map(|i| {
                let scale = (i + 1) as f32 / frames as f32;
                let px = color.map(|c| (c as f32 * scale).round() as u8);
                RgbImage::from_pixel(WIDTH, HEIGHT, Rgb(px))
            })
            .collect();
        Self(images)
    }
}

impl FrameSource for Synthetic {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.0.pop_front())
    }
}

fn fast_settings() -> PlaybackSettings {
    PlaybackSettings {
        pause_poll: Duration::from_millis(2),
        blank_interval: Duration::from_millis(1),
        ..PlaybackSettings::default()
    }
}

fn extract_to(dir: &TempDir, frames: u32, counts: LedCounts, format: ColorFormat) -> PathBuf {
    let extractor = FrameExtractor::new(WIDTH, HEIGHT, counts, format).unwrap();
    let mut encoder = StreamEncoder::new(StreamHeader::new(FPS, counts, format)).unwrap();
    let mut source = Synthetic::fade(frames, [200, 40, 10]);

    let outcome = extract_stream(
        &mut source,
        &extractor,
        &mut encoder,
        &CancelToken::new(),
        Some(frames as u64),
    )
    .unwrap();
    assert_eq!(outcome, ExtractOutcome::Completed { frames: frames as u64 });

    let path = dir.path().join("library").join("movie.bin");
    assert_eq!(encoder.persist(&path).unwrap(), frames as u64);
    path
}

#[rstest]
#[case(ColorFormat::Rgb)]
#[case(ColorFormat::Rgbw)]
fn extracted_stream_loads_back(#[case] format: ColorFormat) {
    let dir = TempDir::new().unwrap();
    let counts = LedCounts::new(6, 6, 3, 3);
    let path = extract_to(&dir, 10, counts, format);

    let stream = Stream::load(&path).unwrap();
    assert_eq!(stream.len(), 10);
    assert_eq!(stream.header().counts, counts);
    assert_eq!(stream.header().format, format);
    assert_eq!(stream.fps(), FPS as f64);
    assert_eq!(stream.timestamps()[..3], [0, 10_000, 20_000]);

    // A flat frame gives the same color on every zone.
    let last = stream.frame(9);
    let bpl = format.bytes_per_led();
    let first_led = &last[..bpl];
    assert!(last.chunks_exact(bpl).all(|led| led == first_led));
    match format {
        ColorFormat::Rgb => assert_eq!(first_led, [200, 40, 10]),
        ColorFormat::Rgbw => assert_eq!(first_led, [190, 30, 0, 10]),
    }
    assert!(!path.with_extension("bin.tmp").exists());
}

#[test]
fn extracted_stream_plays_to_every_destination() {
    let dir = TempDir::new().unwrap();
    let path = extract_to(&dir, 12, LedCounts::new(4, 4, 2, 2), ColorFormat::Rgb);

    let targets = vec![
        DeviceTarget {
            name: "desk".into(),
            host: "127.0.0.1".into(),
            port: 0,
            counts: LedCounts::new(4, 4, 2, 2),
            input_position: 0,
        },
        DeviceTarget {
            name: "tv".into(),
            host: "127.0.0.1".into(),
            port: 0,
            counts: LedCounts::new(8, 8, 4, 4),
            input_position: 3,
        },
    ];
    let player = Player::new(targets, ColorSettings::default(), fast_settings()).unwrap();

    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();
    let handle = player.start_with_sinks(&path, 0.0, vec![tx_a, tx_b]).unwrap();
    assert_eq!(
        handle.wait(),
        vec![PlaybackOutcome::Completed, PlaybackOutcome::Completed]
    );

    for (rx, leds) in [(rx_a, 12usize), (rx_b, 24)] {
        let frames: Vec<Vec<u8>> = rx.try_iter().collect();
        assert!(frames.iter().all(|f| f.len() == leds * 3));
        let (played, blanks) = frames.split_at(frames.len() - 3);
        assert!(blanks.iter().all(|f| f.iter().all(|&b| b == 0)));
        // The final stream frame is bright; its graded output must be lit.
        assert!(played.last().unwrap().iter().any(|&b| b > 0));
    }
}

#[test]
fn plays_over_udp_loopback() {
    let dir = TempDir::new().unwrap();
    let path = extract_to(&dir, 5, LedCounts::new(3, 3, 1, 1), ColorFormat::Rgb);

    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let port = receiver.local_addr().unwrap().port();

    let target = DeviceTarget {
        name: String::new(),
        host: "127.0.0.1".into(),
        port,
        counts: LedCounts::new(3, 3, 1, 1),
        input_position: 0,
    };
    let player = Player::new(vec![target], ColorSettings::default(), fast_settings()).unwrap();
    let outcomes = player.start(&path, 0.0).unwrap().wait();
    assert_eq!(outcomes, vec![PlaybackOutcome::Completed]);

    let mut datagrams = Vec::new();
    let mut buf = [0u8; 1500];
    while let Ok(n) = receiver.recv(&mut buf) {
        datagrams.push(buf[..n].to_vec());
    }
    // Loading frames, five stream frames, then three blanks.
    assert!(datagrams.len() >= 8);
    assert!(datagrams.iter().all(|d| d.len() == 8 * 3));
    let blanks = &datagrams[datagrams.len() - 3..];
    assert!(blanks.iter().all(|d| d.iter().all(|&b| b == 0)));
}
