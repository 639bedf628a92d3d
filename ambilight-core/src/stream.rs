//! The `AMb2` stream format.
//!
//! ```text
//! header: magic[4] | fps:f32 | top:u16 | bottom:u16 | left:u16 | right:u16 | format:u8
//! record: timestamp_us:u64 | colors[bytes_per_led * total_leds]
//! ```
//!
//! All integers little-endian. Records run to the end of the file; a partial
//! trailing record is dropped.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info, warn};

use crate::error::{AmbilightError, Result};
use crate::zones::LedCounts;

pub const MAGIC: &[u8; 4] = b"AMb2";
pub const HEADER_LEN: usize = 17;
pub const FALLBACK_FPS: f64 = 24.0;
const MAX_PLAUSIBLE_FPS: f64 = 300.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorFormat {
    #[default]
    Rgb,
    Rgbw,
}

impl ColorFormat {
    pub fn bytes_per_led(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgbw => 4,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::Rgb => 0,
            Self::Rgbw => 1,
        }
    }

    fn from_byte(b: u8) -> Self {
        if b == 1 {
            Self::Rgbw
        } else {
            Self::Rgb
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamHeader {
    /// Source frame rate; zero means unknown.
    pub fps: f32,
    pub counts: LedCounts,
    pub format: ColorFormat,
}

impl StreamHeader {
    pub fn new(fps: f32, counts: LedCounts, format: ColorFormat) -> Self {
        Self {
            fps,
            counts,
            format,
        }
    }

    /// Payload bytes per record.
    pub fn frame_size(&self) -> usize {
        self.counts.total() * self.format.bytes_per_led()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_f32::<LittleEndian>(self.fps)?;
        w.write_u16::<LittleEndian>(self.counts.top)?;
        w.write_u16::<LittleEndian>(self.counts.bottom)?;
        w.write_u16::<LittleEndian>(self.counts.left)?;
        w.write_u16::<LittleEndian>(self.counts.right)?;
        w.write_u8(self.format.to_byte())
    }

    /// Reads and validates a header. A short read or wrong magic is
    /// [`AmbilightError::InvalidHeader`].
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut raw = [0u8; HEADER_LEN];
        r.read_exact(&mut raw).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => AmbilightError::InvalidHeader,
            _ => AmbilightError::Io(e),
        })?;
        if &raw[..4] != MAGIC {
            return Err(AmbilightError::InvalidHeader);
        }

        let mut cur = &raw[4..];
        let fps = cur.read_f32::<LittleEndian>()?;
        let top = cur.read_u16::<LittleEndian>()?;
        let bottom = cur.read_u16::<LittleEndian>()?;
        let left = cur.read_u16::<LittleEndian>()?;
        let right = cur.read_u16::<LittleEndian>()?;
        let format = ColorFormat::from_byte(cur.read_u8()?);

        Ok(Self::new(fps, LedCounts::new(top, bottom, left, right), format))
    }

    /// Reads just the header of the file at `path`.
    pub fn peek(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        Self::read_from(&mut file)
    }
}

/// Timestamp of frame `frame_index` at a constant `fps`.
pub fn frame_timestamp_us(frame_index: u64, fps: f64) -> u64 {
    ((frame_index as f64 / fps) * 1_000_000.0) as u64
}

/// Accumulates a whole stream in memory and publishes it with one atomic
/// rename.
#[derive(Debug)]
pub struct StreamEncoder {
    header: StreamHeader,
    data: Vec<u8>,
    frames: u64,
}

impl StreamEncoder {
    pub fn new(header: StreamHeader) -> Result<Self> {
        if header.counts.total() == 0 {
            return Err(AmbilightError::NoZones);
        }
        let mut data = Vec::with_capacity(HEADER_LEN);
        header.write_to(&mut data)?;
        Ok(Self {
            header,
            data,
            frames: 0,
        })
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Appends a frame stamped from its index and the header's fps.
    pub fn push_frame(&mut self, frame_index: u64, colors: &[u8]) -> Result<()> {
        let fps = self.header.fps as f64;
        if !(fps.is_finite() && fps > 0.0) {
            return Err(AmbilightError::config("encoder needs a positive fps"));
        }
        self.push_record(frame_timestamp_us(frame_index, fps), colors)
    }

    pub fn push_record(&mut self, timestamp_us: u64, colors: &[u8]) -> Result<()> {
        if colors.len() != self.header.frame_size() {
            return Err(AmbilightError::config(format!(
                "frame payload is {} bytes, expected {}",
                colors.len(),
                self.header.frame_size()
            )));
        }
        self.data.write_u64::<LittleEndian>(timestamp_us)?;
        self.data.extend_from_slice(colors);
        self.frames += 1;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Writes everything to `<path>.bin.tmp` and renames it over `path`.
    pub fn persist(&self, path: &Path) -> Result<u64> {
        if self.frames == 0 {
            return Err(AmbilightError::EmptyStream);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = path.with_extension("bin.tmp");
        fs::write(&temp_path, &self.data)?;
        fs::rename(&temp_path, path)?;

        info!(
            path = %path.display(),
            frames = self.frames,
            bytes = self.data.len(),
            "stream persisted"
        );
        Ok(self.frames)
    }
}

/// A fully decoded stream. Read-only once loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct Stream {
    header: StreamHeader,
    fps: f64,
    timestamps: Vec<u64>,
    payload: Vec<u8>,
}

impl Stream {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::decode(BufReader::new(file))
    }

    pub fn decode<R: Read>(mut reader: R) -> Result<Self> {
        let header = StreamHeader::read_from(&mut reader)?;
        if header.counts.total() == 0 {
            return Err(AmbilightError::NoZones);
        }
        let frame_size = header.frame_size();

        let mut timestamps = Vec::new();
        let mut payload = Vec::new();
        let mut record = vec![0u8; frame_size];

        loop {
            let ts = match reader.read_u64::<LittleEndian>() {
                Ok(ts) => ts,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            match reader.read_exact(&mut record) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!(frame = timestamps.len(), "short payload at end of stream, dropping");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            timestamps.push(ts);
            payload.extend_from_slice(&record);
        }

        if timestamps.is_empty() {
            return Err(AmbilightError::EmptyStream);
        }

        let fps = effective_fps(header.fps, &timestamps);
        info!(
            frames = timestamps.len(),
            leds = header.counts.total(),
            fps,
            rgbw = header.format == ColorFormat::Rgbw,
            "stream loaded"
        );

        Ok(Self {
            header,
            fps,
            timestamps,
            payload,
        })
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// Header fps, or the rate inferred from the first two timestamps.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }

    pub fn frame(&self, index: usize) -> &[u8] {
        let size = self.header.frame_size();
        &self.payload[index * size..(index + 1) * size]
    }

    pub fn frames(&self) -> impl Iterator<Item = &[u8]> {
        self.payload.chunks_exact(self.header.frame_size())
    }

    /// Index of the first frame at or after `us`, clamped to the last frame.
    pub fn frame_at_or_after(&self, us: u64) -> usize {
        let idx = self
            .timestamps
            .iter()
            .position(|&ts| ts >= us)
            .unwrap_or(self.timestamps.len());
        idx.min(self.timestamps.len().saturating_sub(1))
    }

    /// Seconds between frame `index` and its predecessor, or one nominal
    /// frame period where that delta is unusable.
    pub fn frame_dt_seconds(&self, index: usize) -> f32 {
        let nominal = (1.0 / self.fps) as f32;
        if index == 0 || index >= self.timestamps.len() {
            return nominal;
        }
        let dt = self.timestamps[index].saturating_sub(self.timestamps[index - 1]) as f64 / 1e6;
        if dt > 0.0 {
            dt as f32
        } else {
            nominal
        }
    }
}

fn effective_fps(header_fps: f32, timestamps: &[u64]) -> f64 {
    let fps = header_fps as f64;
    if fps.is_finite() && fps > 0.001 && fps <= MAX_PLAUSIBLE_FPS {
        return fps;
    }
    if let [first, second, ..] = timestamps {
        let dt_us = second.abs_diff(*first) as f64;
        if dt_us > 0.0 {
            let derived = 1e6 / dt_us;
            if derived <= MAX_PLAUSIBLE_FPS {
                info!(fps = derived, "derived fps from timestamps");
                return derived;
            }
        }
    }
    warn!(header_fps, "no usable fps, falling back to {FALLBACK_FPS}");
    FALLBACK_FPS
}
