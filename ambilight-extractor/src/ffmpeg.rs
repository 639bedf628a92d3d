//! The external decode process: `ffprobe` for metadata, `ffmpeg` for raw
//! RGB24 frames at a fixed sampling resolution.

use std::io::{self, BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use ambilight_core::{AmbilightError, FrameSource, Result};
use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, warn};

pub const FALLBACK_FPS: f64 = 24.0;
pub const FALLBACK_DURATION: f64 = 60.0;

/// Best-effort metadata. Only used to size progress estimates and stamp the
/// stream header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    pub duration_seconds: f64,
}

impl Default for VideoInfo {
    fn default() -> Self {
        Self {
            fps: FALLBACK_FPS,
            duration_seconds: FALLBACK_DURATION,
        }
    }
}

impl VideoInfo {
    pub fn expected_frames(&self) -> u64 {
        (self.fps * self.duration_seconds).round().max(0.0) as u64
    }

    /// Reads `ffprobe -print_format json` output, falling back per field.
    pub fn from_probe_json(raw: &[u8]) -> Self {
        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: Option<String>,
            r_frame_rate: Option<String>,
            avg_frame_rate: Option<String>,
            duration: Option<String>,
        }
        #[derive(Deserialize)]
        struct ProbeFormat {
            duration: Option<String>,
        }
        #[derive(Deserialize)]
        struct ProbeOut {
            #[serde(default)]
            streams: Vec<ProbeStream>,
            format: Option<ProbeFormat>,
        }

        let parsed: ProbeOut = match serde_json::from_slice(raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "unreadable ffprobe output, using fallbacks");
                return Self::default();
            }
        };

        let video = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"));

        let fps = video
            .and_then(|s| {
                s.r_frame_rate
                    .as_deref()
                    .and_then(parse_frame_rate)
                    .or_else(|| s.avg_frame_rate.as_deref().and_then(parse_frame_rate))
            })
            .filter(|f| *f <= 300.0)
            .unwrap_or(FALLBACK_FPS);

        let duration_seconds = parsed
            .format
            .and_then(|f| f.duration)
            .or_else(|| video.and_then(|s| s.duration.clone()))
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(FALLBACK_DURATION);

        Self {
            fps,
            duration_seconds,
        }
    }
}

/// Parses `num/den` or a plain number into a positive frame rate.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let fps = match raw.trim().split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Runs `ffprobe` on `path`. Never fails; a missing binary or odd output
/// yields the fallbacks.
pub fn probe(path: &Path) -> VideoInfo {
    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output();

    match out {
        Ok(out) if out.status.success() => VideoInfo::from_probe_json(&out.stdout),
        Ok(out) => {
            warn!(
                path = %path.display(),
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "ffprobe failed, using fallbacks"
            );
            VideoInfo::default()
        }
        Err(e) => {
            warn!(error = %e, "cannot run ffprobe, using fallbacks");
            VideoInfo::default()
        }
    }
}

/// Fills `buf` as far as the reader allows. Returns the byte count read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Packed RGB24 frames of a known size from any byte stream.
pub struct RawRgbSource<R> {
    reader: R,
    width: u32,
    height: u32,
    frames: u64,
}

impl<R: Read> RawRgbSource<R> {
    pub fn new(reader: R, width: u32, height: u32) -> Self {
        Self {
            reader,
            width,
            height,
            frames: 0,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames
    }
}

impl<R: Read> FrameSource for RawRgbSource<R> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 3];
        let n = read_full(&mut self.reader, &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if n < buf.len() {
            warn!(bytes = n, expected = buf.len(), "dropping truncated trailing frame");
            return Ok(None);
        }
        self.frames += 1;
        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| AmbilightError::decoder("frame buffer size mismatch"))
    }
}

/// A running `ffmpeg` decode. The child is killed if dropped early.
pub struct FfmpegSource {
    child: Child,
    frames: RawRgbSource<BufReader<ChildStdout>>,
}

impl FfmpegSource {
    pub fn spawn(input: &Path, width: u32, height: u32) -> Result<Self> {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-nostdin", "-v", "error", "-i"])
            .arg(input)
            .args(["-an", "-sn", "-vf"])
            .arg(format!("scale={width}:{height}"))
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"]);
        Self::from_command(cmd, width, height)
    }

    /// Runs `cmd` as a decoder writing packed RGB24 frames to stdout.
    ///
    /// The child gets its own process group so a terminal Ctrl-C reaches only
    /// us; we decide whether the decode was cancelled.
    pub fn from_command(mut cmd: Command, width: u32, height: u32) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| AmbilightError::decoder(format!("failed to run decoder: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AmbilightError::decoder("decoder stdout not captured"))?;
        debug!(pid = child.id(), width, height, "decoder started");

        Ok(Self {
            child,
            frames: RawRgbSource::new(BufReader::new(stdout), width, height),
        })
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let frame = self.frames.next_frame()?;
        if frame.is_none() {
            let status = self.child.wait()?;
            if !status.success() {
                return Err(AmbilightError::decoder(format!(
                    "decoder exited with {status} after {} frames",
                    self.frames.frames_read()
                )));
            }
        }
        Ok(frame)
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::io::Cursor;

    #[rstest]
    #[case("24000/1001", Some(24000.0 / 1001.0))]
    #[case("25/1", Some(25.0))]
    #[case("30", Some(30.0))]
    #[case("0/0", None)]
    #[case("0/1", None)]
    #[case("abc", None)]
    fn frame_rates(#[case] raw: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_frame_rate(raw), expected);
    }

    #[test]
    fn probe_json_picks_video_stream() {
        let raw = br#"{
            "streams": [
                {"codec_type": "audio", "r_frame_rate": "0/0"},
                {"codec_type": "video", "r_frame_rate": "30000/1001"}
            ],
            "format": {"duration": "120.5"}
        }"#;
        let info = VideoInfo::from_probe_json(raw);
        assert!((info.fps - 29.97).abs() < 0.01);
        assert_eq!(info.duration_seconds, 120.5);
        assert_eq!(info.expected_frames(), 3611);
    }

    #[rstest]
    #[case(b"not json".as_slice())]
    #[case(br#"{"streams": []}"#.as_slice())]
    #[case(br#"{"streams": [{"codec_type": "video", "r_frame_rate": "1000/1"}]}"#.as_slice())]
    fn probe_json_falls_back(#[case] raw: &[u8]) {
        assert_eq!(VideoInfo::from_probe_json(raw), VideoInfo::default());
    }

    #[test]
    fn raw_source_splits_frames_and_drops_partial_tail() {
        let mut bytes: Vec<u8> = (0..2 * 2 * 3 * 2).map(|i| i as u8).collect();
        bytes.extend_from_slice(&[9, 9, 9]);
        let mut source = RawRgbSource::new(Cursor::new(bytes), 2, 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.get_pixel(1, 0).0, [3, 4, 5]);
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.get_pixel(0, 0).0, [12, 13, 14]);
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.frames_read(), 2);
    }

    #[cfg(unix)]
    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[cfg(unix)]
    #[test]
    fn clean_exit_ends_the_stream() {
        let mut source = FfmpegSource::from_command(shell("head -c 24 /dev/zero"), 2, 2).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn failed_exit_after_frames_is_an_error() {
        let mut source =
            FfmpegSource::from_command(shell("head -c 12 /dev/zero; exit 3"), 2, 2).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(matches!(
            source.next_frame(),
            Err(AmbilightError::Decoder(_))
        ));
    }
}
