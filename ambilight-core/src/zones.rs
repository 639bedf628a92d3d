//! Border zone geometry.
//!
//! Zones are emitted in ring order: top left→right, right top→bottom,
//! bottom right→left, left bottom→top. A strip wired continuously around the
//! screen maps index `i` of this list to its `i`-th LED.

use serde::{Deserialize, Serialize};

use crate::error::{AmbilightError, Result};

/// Minimum band thickness in pixels.
const MIN_BAND: i32 = 12;
/// Maximum band thickness as a share of the frame dimension.
const MAX_BAND_SHARE: f64 = 0.12;

/// Per-edge LED counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedCounts {
    pub top: u16,
    pub bottom: u16,
    pub left: u16,
    pub right: u16,
}

impl LedCounts {
    pub fn new(top: u16, bottom: u16, left: u16, right: u16) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    pub fn total(&self) -> usize {
        self.top as usize + self.bottom as usize + self.left as usize + self.right as usize
    }

    /// Derives equal left/right counts from the horizontal counts, in
    /// proportion to the frame's share of vertical perimeter.
    pub fn with_proportional_sides(top: u16, bottom: u16, width: u32, height: u32) -> Self {
        let perimeter = 2.0 * (width as f64 + height as f64);
        let side = if perimeter > 0.0 {
            let vertical_share = (2.0 * height as f64) / perimeter;
            ((top as f64 + bottom as f64) * vertical_share).round() as u16
        } else {
            0
        };
        Self::new(top, bottom, side, side)
    }
}

/// One LED's sampling rectangle, `x2`/`y2` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Zone {
    pub index: usize,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Zone {
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

fn band_thickness(extent: i32, count: u16, across: i32) -> i32 {
    let spacing = if count > 0 {
        extent as f64 / count as f64
    } else {
        extent as f64
    };
    let limit = (across as f64 * MAX_BAND_SHARE) as i32;
    // The upper limit wins when a tiny frame makes it smaller than MIN_BAND.
    ((spacing * 2.0).round() as i32).max(MIN_BAND).min(limit)
}

#[inline]
fn slice(i: u32, extent: i32, count: u16) -> i32 {
    (i as f64 * extent as f64 / count as f64) as i32
}

/// Computes the ring-ordered zones for a `width`x`height` frame.
pub fn compute_zones(width: u32, height: u32, counts: LedCounts) -> Result<Vec<Zone>> {
    if counts.total() == 0 {
        return Err(AmbilightError::NoZones);
    }

    let w = width as i32;
    let h = height as i32;

    let top_h = band_thickness(w, counts.top, h);
    let bottom_h = band_thickness(w, counts.bottom, h);
    let left_w = band_thickness(h, counts.left, w);
    let right_w = band_thickness(h, counts.right, w);

    let mut zones = Vec::with_capacity(counts.total());
    let mut push = |x1, y1, x2, y2| {
        let index = zones.len();
        zones.push(Zone {
            index,
            x1,
            y1,
            x2,
            y2,
        });
    };

    for i in 0..counts.top as u32 {
        push(slice(i, w, counts.top), 0, slice(i + 1, w, counts.top), top_h);
    }

    for i in 0..counts.right as u32 {
        push(w - right_w, slice(i, h, counts.right), w, slice(i + 1, h, counts.right));
    }

    for i in 0..counts.bottom as u32 {
        let x2 = w - slice(i, w, counts.bottom);
        let x1 = w - slice(i + 1, w, counts.bottom);
        push(x1, h - bottom_h, x2, h);
    }

    for i in 0..counts.left as u32 {
        let y2 = h - slice(i, h, counts.left);
        let y1 = h - slice(i + 1, h, counts.left);
        push(0, y1, left_w, y2);
    }

    Ok(zones)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn zero_total_is_an_error() {
        let err = compute_zones(640, 360, LedCounts::default()).unwrap_err();
        assert!(matches!(err, AmbilightError::NoZones));
    }

    #[rstest]
    #[case(480, 270, LedCounts::new(4, 4, 2, 2))]
    #[case(1920, 1080, LedCounts::new(150, 150, 84, 84))]
    #[case(97, 61, LedCounts::new(7, 3, 5, 1))]
    #[case(480, 270, LedCounts::new(10, 0, 0, 3))]
    fn zone_count_matches_total(#[case] w: u32, #[case] h: u32, #[case] counts: LedCounts) {
        let zones = compute_zones(w, h, counts).unwrap();
        assert_eq!(zones.len(), counts.total());
        for (i, z) in zones.iter().enumerate() {
            assert_eq!(z.index, i);
        }
    }

    #[rstest]
    #[case(480, 270, LedCounts::new(4, 4, 2, 2))]
    #[case(1920, 1080, LedCounts::new(150, 150, 84, 84))]
    #[case(97, 61, LedCounts::new(7, 3, 5, 1))]
    #[case(333, 129, LedCounts::new(31, 17, 13, 11))]
    fn edges_tile_without_gaps(#[case] w: u32, #[case] h: u32, #[case] counts: LedCounts) {
        let (w, h) = (w as i32, h as i32);
        let zones = compute_zones(w as u32, h as u32, counts).unwrap();
        let (top, rest) = zones.split_at(counts.top as usize);
        let (right, rest) = rest.split_at(counts.right as usize);
        let (bottom, left) = rest.split_at(counts.bottom as usize);

        assert_eq!(top.first().unwrap().x1, 0);
        assert_eq!(top.last().unwrap().x2, w);
        for pair in top.windows(2) {
            assert_eq!(pair[0].x2, pair[1].x1);
        }

        assert_eq!(right.first().unwrap().y1, 0);
        assert_eq!(right.last().unwrap().y2, h);
        for pair in right.windows(2) {
            assert_eq!(pair[0].y2, pair[1].y1);
        }

        assert_eq!(bottom.first().unwrap().x2, w);
        assert_eq!(bottom.last().unwrap().x1, 0);
        for pair in bottom.windows(2) {
            assert_eq!(pair[0].x1, pair[1].x2);
        }

        assert_eq!(left.first().unwrap().y2, h);
        assert_eq!(left.last().unwrap().y1, 0);
        for pair in left.windows(2) {
            assert_eq!(pair[0].y1, pair[1].y2);
        }
    }

    #[test]
    fn bands_hug_their_edges() {
        let zones = compute_zones(480, 270, LedCounts::new(4, 4, 2, 2)).unwrap();
        // 12% of 270 caps the horizontal bands, 12% of 480 the vertical ones.
        assert_eq!((zones[0].y1, zones[0].y2), (0, 32));
        assert_eq!((zones[4].x1, zones[4].x2), (480 - 57, 480));
        assert_eq!((zones[6].y1, zones[6].y2), (270 - 32, 270));
        assert_eq!((zones[10].x1, zones[10].x2), (0, 57));
    }

    #[test]
    fn dense_strips_use_the_minimum_band() {
        let zones = compute_zones(480, 270, LedCounts::new(200, 0, 0, 0)).unwrap();
        assert!(zones.iter().all(|z| z.height() == MIN_BAND));
    }

    #[test]
    fn ring_order_walks_clockwise() {
        let zones = compute_zones(100, 100, LedCounts::new(2, 2, 2, 2)).unwrap();
        assert_eq!((zones[0].x1, zones[1].x1), (0, 50));
        assert_eq!((zones[2].y1, zones[3].y1), (0, 50));
        assert_eq!((zones[4].x1, zones[5].x1), (50, 0));
        assert_eq!((zones[6].y1, zones[7].y1), (50, 0));
    }

    #[test]
    fn proportional_sides_follow_aspect_ratio() {
        let counts = LedCounts::with_proportional_sides(150, 150, 1920, 1080);
        assert_eq!(counts.left, counts.right);
        assert_eq!(counts.left, 108);
    }
}
