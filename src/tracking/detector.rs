//! Colour-threshold ball detection.

use super::FrameDetector;
use crate::core::{BYTES_PER_PIXEL, TrackedCoordinate};

/// Centroid of the pixels matching a colour threshold.
///
/// The default matches saturated blue: red and green below 50, blue and
/// alpha above 200. The centroid is rounded to the nearest pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorThresholdDetector {
    /// Red must be below this.
    pub max_red: u8,
    /// Green must be below this.
    pub max_green: u8,
    /// Blue must be above this.
    pub min_blue: u8,
    /// Alpha must be above this.
    pub min_alpha: u8,
}

impl Default for ColorThresholdDetector {
    fn default() -> Self {
        Self {
            max_red: 50,
            max_green: 50,
            min_blue: 200,
            min_alpha: 200,
        }
    }
}

impl ColorThresholdDetector {
    fn matches(&self, px: &[u8]) -> bool {
        px[0] < self.max_red && px[1] < self.max_green && px[2] > self.min_blue && px[3] > self.min_alpha
    }
}

impl FrameDetector for ColorThresholdDetector {
    fn detect(&self, pixels: &[u8], width: u32, height: u32) -> Option<TrackedCoordinate> {
        if width == 0 {
            return None;
        }
        let width = width as u64;
        let limit = (width * height as u64) as usize;

        let (mut sum_x, mut sum_y, mut count) = (0u64, 0u64, 0u64);
        for (i, px) in pixels.chunks_exact(BYTES_PER_PIXEL).take(limit).enumerate() {
            if self.matches(px) {
                sum_x += i as u64 % width;
                sum_y += i as u64 / width;
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }
        let cx = (sum_x as f64 / count as f64).round() as i32;
        let cy = (sum_y as f64 / count as f64).round() as i32;
        Some(TrackedCoordinate::new(cx, cy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLUE: [u8; 4] = [0, 0, 255, 255];
    const WHITE: [u8; 4] = [255, 255, 255, 255];

    fn frame(width: u32, height: u32, blue: &[(u32, u32)]) -> Vec<u8> {
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let px = if blue.contains(&(x, y)) { BLUE } else { WHITE };
                pixels.extend_from_slice(&px);
            }
        }
        pixels
    }

    #[test]
    fn test_empty_frame_has_no_detection() {
        let detector = ColorThresholdDetector::default();
        assert_eq!(detector.detect(&frame(8, 8, &[]), 8, 8), None);
        assert_eq!(detector.detect(&[], 0, 0), None);
    }

    #[test]
    fn test_centroid() {
        let detector = ColorThresholdDetector::default();
        let pixels = frame(10, 10, &[(2, 3), (4, 3), (2, 5), (4, 5)]);
        assert_eq!(
            detector.detect(&pixels, 10, 10),
            Some(TrackedCoordinate::new(3, 4))
        );
    }

    #[test]
    fn test_centroid_rounds_half_up() {
        let detector = ColorThresholdDetector::default();
        let pixels = frame(4, 1, &[(0, 0), (1, 0)]);
        assert_eq!(
            detector.detect(&pixels, 4, 1),
            Some(TrackedCoordinate::new(1, 0))
        );
    }

    #[test]
    fn test_transparent_blue_ignored() {
        let detector = ColorThresholdDetector::default();
        let pixels = [0, 0, 255, 10];
        assert_eq!(detector.detect(&pixels, 1, 1), None);
    }
}
