//! Color-threshold lane segmentation.
//!
//! Each pixel is converted to HSV on the 8-bit scale used by common image
//! libraries (H in 0..180, S and V in 0..=255) and labeled:
//!
//! - lane-white: low saturation and high value, any hue
//! - lane-yellow: hue inside the yellow band, enough saturation and value
//!
//! White is applied first and yellow second, so a pixel matching both is
//! yellow. The engine keeps no state between frames.

use serde::Deserialize;

use crate::frame::FrameSample;

/// Per-pixel label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LaneClass {
    Background = 0,
    White = 1,
    Yellow = 2,
}

impl LaneClass {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LaneClass::Background),
            1 => Some(LaneClass::White),
            2 => Some(LaneClass::Yellow),
            _ => None,
        }
    }

    /// Color used when the mask is rendered to an image.
    pub fn render_rgb(self) -> [u8; 3] {
        match self {
            LaneClass::Background => [0, 0, 0],
            LaneClass::White => [255, 255, 255],
            LaneClass::Yellow => [255, 255, 0],
        }
    }
}

/// Inclusive HSV bounds for both lane classes.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SegmentationThresholds {
    pub yellow_hue_min: u8,
    pub yellow_hue_max: u8,
    pub yellow_saturation_min: u8,
    pub yellow_value_min: u8,
    pub white_saturation_max: u8,
    pub white_value_min: u8,
}

impl Default for SegmentationThresholds {
    fn default() -> Self {
        Self {
            yellow_hue_min: 18,
            yellow_hue_max: 40,
            yellow_saturation_min: 50,
            yellow_value_min: 150,
            white_saturation_max: 30,
            white_value_min: 200,
        }
    }
}

impl SegmentationThresholds {
    fn is_white(&self, (_h, s, v): (u8, u8, u8)) -> bool {
        s <= self.white_saturation_max && v >= self.white_value_min
    }

    fn is_yellow(&self, (h, s, v): (u8, u8, u8)) -> bool {
        (self.yellow_hue_min..=self.yellow_hue_max).contains(&h)
            && s >= self.yellow_saturation_min
            && v >= self.yellow_value_min
    }

    /// Label a single RGB pixel. Yellow wins over white.
    pub fn classify(&self, r: u8, g: u8, b: u8) -> LaneClass {
        let hsv = rgb_to_hsv(r, g, b);
        let mut class = LaneClass::Background;
        if self.is_white(hsv) {
            class = LaneClass::White;
        }
        if self.is_yellow(hsv) {
            class = LaneClass::Yellow;
        }
        class
    }
}

/// Convert one RGB pixel to 8-bit HSV (H in 0..180, S/V in 0..=255).
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };

    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    // 0..360 degrees folded into a byte; 360 wraps back to 0.
    let h = ((h / 2.0).round() as u32 % 180) as u8;
    (h, s.round() as u8, v as u8)
}

/// Per-pixel lane labels for one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SemanticMask {
    classes: Vec<u8>,
    width: u32,
    height: u32,
}

impl SemanticMask {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn class_at(&self, x: u32, y: u32) -> Option<LaneClass> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.width as usize + x as usize;
        self.classes.get(idx).copied().and_then(LaneClass::from_u8)
    }

    /// Raw class bytes, row-major.
    pub fn classes(&self) -> &[u8] {
        &self.classes
    }

    /// Number of pixels carrying `class`.
    pub fn count(&self, class: LaneClass) -> usize {
        self.classes.iter().filter(|&&c| c == class as u8).count()
    }

    /// RGB image of the mask: white lanes white, yellow lanes yellow, rest black.
    pub fn render_rgb(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.classes.len() * 3);
        for &c in &self.classes {
            let class = LaneClass::from_u8(c).unwrap_or(LaneClass::Background);
            out.extend_from_slice(&class.render_rgb());
        }
        out
    }
}

/// Stateless segmentation engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct Segmenter {
    thresholds: SegmentationThresholds,
}

impl Segmenter {
    pub fn new(thresholds: SegmentationThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SegmentationThresholds {
        &self.thresholds
    }

    pub fn segment(&self, frame: &FrameSample) -> SemanticMask {
        let classes = frame
            .rgb()
            .chunks_exact(3)
            .map(|px| self.thresholds.classify(px[0], px[1], px[2]) as u8)
            .collect();
        SemanticMask {
            classes,
            width: frame.width(),
            height: frame.height(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsv_of_primary_colors() {
        assert_eq!(rgb_to_hsv(255, 0, 0), (0, 255, 255));
        assert_eq!(rgb_to_hsv(255, 255, 0), (30, 255, 255));
        assert_eq!(rgb_to_hsv(0, 0, 255), (120, 255, 255));
        assert_eq!(rgb_to_hsv(244, 244, 244), (0, 0, 244));
        assert_eq!(rgb_to_hsv(0, 0, 0), (0, 0, 0));
    }

    #[test]
    fn near_white_pixel_is_white() {
        let t = SegmentationThresholds::default();
        assert_eq!(t.classify(244, 244, 244), LaneClass::White);
        assert_eq!(t.classify(200, 200, 210), LaneClass::White);
    }

    #[test]
    fn road_yellow_pixel_is_yellow() {
        let t = SegmentationThresholds::default();
        assert_eq!(t.classify(230, 200, 40), LaneClass::Yellow);
    }

    #[test]
    fn asphalt_and_dim_paint_are_background() {
        let t = SegmentationThresholds::default();
        assert_eq!(t.classify(80, 80, 80), LaneClass::Background);
        assert_eq!(t.classify(190, 190, 190), LaneClass::Background);
        assert_eq!(t.classify(120, 100, 20), LaneClass::Background);
        assert_eq!(t.classify(20, 40, 230), LaneClass::Background);
    }

    #[test]
    fn bounds_are_inclusive() {
        let t = SegmentationThresholds::default();
        // V exactly at the white minimum.
        assert_eq!(t.classify(200, 200, 200), LaneClass::White);
        assert_eq!(t.classify(199, 199, 199), LaneClass::Background);
    }

    #[test]
    fn yellow_overrides_white_when_both_match() {
        // Overlapping bands so a single pixel satisfies both rules.
        let t = SegmentationThresholds {
            yellow_hue_min: 18,
            yellow_hue_max: 40,
            yellow_saturation_min: 10,
            yellow_value_min: 150,
            white_saturation_max: 60,
            white_value_min: 200,
        };
        let (h, s, v) = rgb_to_hsv(240, 230, 200);
        assert!((18..=40).contains(&h) && s >= 10 && s <= 60 && v >= 200);
        assert_eq!(t.classify(240, 230, 200), LaneClass::Yellow);
    }

    #[test]
    fn segment_renders_mask_colors() {
        let rgb = vec![
            244, 244, 244, // white
            230, 200, 40, // yellow
            50, 50, 50, // asphalt
            0, 0, 0, // black
        ];
        let frame = FrameSample::from_rgb(rgb, 2, 2).unwrap();
        let mask = Segmenter::default().segment(&frame);

        assert_eq!(mask.class_at(0, 0), Some(LaneClass::White));
        assert_eq!(mask.class_at(1, 0), Some(LaneClass::Yellow));
        assert_eq!(mask.class_at(0, 1), Some(LaneClass::Background));
        assert_eq!(mask.class_at(2, 0), None);
        assert_eq!(mask.count(LaneClass::White), 1);
        assert_eq!(mask.count(LaneClass::Yellow), 1);
        assert_eq!(
            mask.render_rgb(),
            vec![255, 255, 255, 255, 255, 0, 0, 0, 0, 0, 0, 0]
        );
    }
}
