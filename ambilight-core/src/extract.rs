//! Zone color extraction and the frame-by-frame extraction pipeline.

use image::{imageops, RgbImage};
use imageproc::gradients::sobel_gradients;
use tracing::info;

use crate::control::CancelToken;
use crate::error::{AmbilightError, Result};
use crate::stream::{ColorFormat, StreamEncoder};
use crate::zones::{compute_zones, LedCounts, Zone};

const EDGE_WEIGHT: f64 = 0.7;
const CENTER_WEIGHT: f64 = 0.3;
const MIN_WEIGHT: f64 = 0.01;
const PROGRESS_EVERY: u64 = 200;

/// Split RGB into RGBW by moving the common gray component into white.
///
/// `min(r, g, b)` is a heuristic, not a colorimetric conversion.
#[inline]
pub fn rgb_to_rgbw([r, g, b]: [u8; 3]) -> [u8; 4] {
    let w = r.min(g).min(b);
    [r - w, g - w, b - w, w]
}

/// Representative color of one zone.
///
/// Pixels are weighted by normalized Sobel magnitude (70%) plus a Gaussian
/// centered on the zone (30%), with a floor so every pixel contributes.
pub fn extract_zone_color(frame: &RgbImage, zone: &Zone) -> [u8; 3] {
    if zone.is_degenerate() {
        return [0, 0, 0];
    }

    let x1 = zone.x1.max(0) as u32;
    let y1 = zone.y1.max(0) as u32;
    let x2 = (zone.x2.max(0) as u32).min(frame.width());
    let y2 = (zone.y2.max(0) as u32).min(frame.height());
    if x2 <= x1 || y2 <= y1 {
        return [0, 0, 0];
    }

    let roi = imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image();
    let gray = imageops::grayscale(&roi);
    let gradients = sobel_gradients(&gray);
    let max_gradient = gradients.pixels().map(|p| p.0[0]).max().unwrap_or(0) as f64;

    let (w, h) = roi.dimensions();
    let center_x = (w / 2) as f64;
    let center_y = (h / 2) as f64;
    let sigma = (w.min(h) as f64 / 4.0).max(1.0);
    let two_sigma_sq = 2.0 * sigma * sigma;

    let mut sums = [0.0f64; 3];
    let mut total_weight = 0.0f64;

    for (x, y, px) in roi.enumerate_pixels() {
        let edge = if max_gradient > 0.0 {
            gradients.get_pixel(x, y).0[0] as f64 / max_gradient
        } else {
            0.0
        };

        let dx = x as f64 - center_x;
        let dy = y as f64 - center_y;
        let center = (-(dx * dx + dy * dy) / two_sigma_sq).exp();

        let weight = (EDGE_WEIGHT * edge + CENTER_WEIGHT * center).max(MIN_WEIGHT);
        for (sum, &c) in sums.iter_mut().zip(px.0.iter()) {
            *sum += c as f64 * weight;
        }
        total_weight += weight;
    }

    sums.map(|s| (s / total_weight).round().clamp(0.0, 255.0) as u8)
}

/// Fixed zone layout applied to every frame of one video.
#[derive(Clone, Debug)]
pub struct FrameExtractor {
    zones: Vec<Zone>,
    format: ColorFormat,
}

impl FrameExtractor {
    pub fn new(width: u32, height: u32, counts: LedCounts, format: ColorFormat) -> Result<Self> {
        Ok(Self {
            zones: compute_zones(width, height, counts)?,
            format,
        })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn format(&self) -> ColorFormat {
        self.format
    }

    /// Packed zone colors in ring order.
    pub fn extract(&self, frame: &RgbImage) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.zones.len() * self.format.bytes_per_led());
        for zone in &self.zones {
            let rgb = extract_zone_color(frame, zone);
            match self.format {
                ColorFormat::Rgb => out.extend_from_slice(&rgb),
                ColorFormat::Rgbw => out.extend_from_slice(&rgb_to_rgbw(rgb)),
            }
        }
        out
    }
}

/// Supplier of decoded RGB frames, one at a time.
pub trait FrameSource {
    /// `Ok(None)` at end of input.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractOutcome {
    Completed { frames: u64 },
    Cancelled { frames: u64 },
}

/// Runs `source` dry through `extractor` into `encoder`.
///
/// Checks `cancel` once per frame. Finishing with zero frames is
/// [`AmbilightError::EmptyStream`].
pub fn extract_stream<S: FrameSource + ?Sized>(
    source: &mut S,
    extractor: &FrameExtractor,
    encoder: &mut StreamEncoder,
    cancel: &CancelToken,
    expected_frames: Option<u64>,
) -> Result<ExtractOutcome> {
    let mut frame_index = 0u64;

    loop {
        if cancel.is_cancelled() {
            info!(frames = frame_index, "extraction cancelled");
            return Ok(ExtractOutcome::Cancelled {
                frames: frame_index,
            });
        }

        let Some(frame) = source.next_frame()? else {
            // A signal can end the source before the next checkpoint.
            if cancel.is_cancelled() {
                info!(frames = frame_index, "extraction cancelled");
                return Ok(ExtractOutcome::Cancelled {
                    frames: frame_index,
                });
            }
            break;
        };
        encoder.push_frame(frame_index, &extractor.extract(&frame))?;
        frame_index += 1;

        if frame_index % PROGRESS_EVERY == 0 {
            match expected_frames {
                Some(total) if total > 0 => info!(
                    frames = frame_index,
                    percent = format_args!("{:.1}", frame_index as f64 * 100.0 / total as f64),
                    "extraction progress"
                ),
                _ => info!(frames = frame_index, "extraction progress"),
            }
        }
    }

    if frame_index == 0 {
        return Err(AmbilightError::EmptyStream);
    }
    Ok(ExtractOutcome::Completed {
        frames: frame_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{Stream, StreamHeader};
    use image::Rgb;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::collections::VecDeque;

    struct VecSource(VecDeque<RgbImage>);

    impl FrameSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            Ok(self.0.pop_front())
        }
    }

    fn zone(x1: i32, y1: i32, x2: i32, y2: i32) -> Zone {
        Zone {
            index: 0,
            x1,
            y1,
            x2,
            y2,
        }
    }

    #[rstest]
    #[case([255, 255, 255], [0, 0, 0, 255])]
    #[case([200, 100, 50], [150, 50, 0, 50])]
    #[case([0, 10, 20], [0, 10, 20, 0])]
    fn rgbw_split(#[case] rgb: [u8; 3], #[case] expected: [u8; 4]) {
        assert_eq!(rgb_to_rgbw(rgb), expected);
    }

    #[rstest]
    #[case([0, 0, 0])]
    #[case([37, 142, 201])]
    #[case([255, 255, 255])]
    fn flat_zone_returns_its_color(#[case] color: [u8; 3]) {
        let frame = RgbImage::from_pixel(64, 36, Rgb(color));
        assert_eq!(extract_zone_color(&frame, &zone(8, 4, 40, 30)), color);
    }

    #[test]
    fn degenerate_zone_is_black() {
        let frame = RgbImage::from_pixel(16, 16, Rgb([200, 200, 200]));
        assert_eq!(extract_zone_color(&frame, &zone(5, 5, 5, 10)), [0, 0, 0]);
        assert_eq!(extract_zone_color(&frame, &zone(20, 20, 30, 30)), [0, 0, 0]);
    }

    #[test]
    fn content_edges_dominate_the_average() {
        // Mostly black zone with a thin white bar on the right: the bar and
        // its boundary carry all of the gradient energy.
        let mut frame = RgbImage::from_pixel(40, 20, Rgb([0, 0, 0]));
        for y in 0..20 {
            for x in 36..40 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let [r, g, b] = extract_zone_color(&frame, &zone(0, 0, 40, 20));
        let plain_mean = 255.0 * 4.0 / 40.0;
        assert!(r as f64 > plain_mean, "r={r} should exceed the unweighted mean");
        assert_eq!((r, g), (g, b));
    }

    #[test]
    fn extractor_packs_rgbw_in_ring_order() {
        let extractor =
            FrameExtractor::new(100, 60, LedCounts::new(2, 2, 1, 1), ColorFormat::Rgbw).unwrap();
        let frame = RgbImage::from_pixel(100, 60, Rgb([90, 60, 30]));
        let packed = extractor.extract(&frame);
        assert_eq!(packed.len(), 6 * 4);
        for led in packed.chunks_exact(4) {
            assert_eq!(led, &[60, 30, 0, 30]);
        }
    }

    #[test]
    fn pipeline_encodes_every_frame() {
        let counts = LedCounts::new(2, 2, 1, 1);
        let extractor = FrameExtractor::new(64, 36, counts, ColorFormat::Rgb).unwrap();
        let mut encoder =
            StreamEncoder::new(StreamHeader::new(25.0, counts, ColorFormat::Rgb)).unwrap();
        let mut source = VecSource(
            (0..3u8)
                .map(|i| RgbImage::from_pixel(64, 36, Rgb([i * 50, 0, 0])))
                .collect(),
        );

        let outcome = extract_stream(
            &mut source,
            &extractor,
            &mut encoder,
            &CancelToken::new(),
            Some(3),
        )
        .unwrap();
        assert_eq!(outcome, ExtractOutcome::Completed { frames: 3 });

        let stream = Stream::decode(encoder.as_bytes()).unwrap();
        assert_eq!(stream.timestamps(), &[0, 40_000, 80_000]);
        assert_eq!(stream.frame(2)[..3], [100, 0, 0]);
    }

    #[test]
    fn empty_source_is_an_error() {
        let counts = LedCounts::new(1, 0, 0, 0);
        let extractor = FrameExtractor::new(64, 36, counts, ColorFormat::Rgb).unwrap();
        let mut encoder =
            StreamEncoder::new(StreamHeader::new(25.0, counts, ColorFormat::Rgb)).unwrap();
        let result = extract_stream(
            &mut VecSource(VecDeque::new()),
            &extractor,
            &mut encoder,
            &CancelToken::new(),
            None,
        );
        assert!(matches!(result, Err(AmbilightError::EmptyStream)));
    }

    #[test]
    fn cancellation_is_not_an_error() {
        let counts = LedCounts::new(1, 0, 0, 0);
        let extractor = FrameExtractor::new(64, 36, counts, ColorFormat::Rgb).unwrap();
        let mut encoder =
            StreamEncoder::new(StreamHeader::new(25.0, counts, ColorFormat::Rgb)).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut source = VecSource(vec![RgbImage::new(64, 36)].into());

        let outcome =
            extract_stream(&mut source, &extractor, &mut encoder, &cancel, None).unwrap();
        assert_eq!(outcome, ExtractOutcome::Cancelled { frames: 0 });
        assert_eq!(source.0.len(), 1);
    }

    /// Serves its frames, then cancels mid-read and reports end of input,
    /// the way a decoder killed by the same Ctrl-C does.
    struct InterruptedSource {
        frames: VecDeque<RgbImage>,
        cancel: CancelToken,
    }

    impl FrameSource for InterruptedSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            let frame = self.frames.pop_front();
            if frame.is_none() {
                self.cancel.cancel();
            }
            Ok(frame)
        }
    }

    #[test]
    fn cancel_during_read_is_not_completion() {
        let counts = LedCounts::new(1, 0, 0, 0);
        let extractor = FrameExtractor::new(64, 36, counts, ColorFormat::Rgb).unwrap();
        let mut encoder =
            StreamEncoder::new(StreamHeader::new(25.0, counts, ColorFormat::Rgb)).unwrap();
        let cancel = CancelToken::new();
        let mut source = InterruptedSource {
            frames: (0..5).map(|_| RgbImage::new(64, 36)).collect(),
            cancel: cancel.clone(),
        };

        let outcome =
            extract_stream(&mut source, &extractor, &mut encoder, &cancel, None).unwrap();
        assert_eq!(outcome, ExtractOutcome::Cancelled { frames: 5 });
    }
}
