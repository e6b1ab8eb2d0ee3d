//! Composite image-quality score for one detected face.
//!
//! Six independent sub-metrics are computed on the grayscale face crop (or
//! on the box and landmarks) and summed with fixed weights:
//!
//! | metric     | input                             | default max |
//! |------------|-----------------------------------|-------------|
//! | blur       | variance of the Laplacian         | 30          |
//! | brightness | mean intensity vs. mid-gray       | 20          |
//! | contrast   | intensity standard deviation      | 15          |
//! | size       | box area                          | 20          |
//! | centered   | box center near frame center      | 10          |
//! | angle      | nose offset from eye midpoint     | 5           |
//!
//! The total is not clamped; the acceptance threshold is tuned against the
//! raw sum.

use crate::config::QualityWeights;
use crate::frame::{Crop, Frame};
use crate::types::{FaceBox, FaceLandmarks};
use serde::Serialize;

/// Per-metric contributions to a composite quality score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QualityBreakdown {
    pub blur: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub size: f32,
    pub centered: f32,
    pub angle: f32,
}

impl QualityBreakdown {
    pub fn total(&self) -> f32 {
        self.metrics().iter().map(|(_, v)| v).sum()
    }

    /// `(metric name, contribution)` pairs in display order.
    pub fn metrics(&self) -> [(&'static str, f32); 6] {
        [
            ("blur", self.blur),
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("size", self.size),
            ("centered", self.centered),
            ("angle", self.angle),
        ]
    }
}

/// Composite score plus the breakdown that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityAssessment {
    pub total: f32,
    pub breakdown: QualityBreakdown,
}

impl QualityAssessment {
    pub fn from_breakdown(breakdown: QualityBreakdown) -> Self {
        Self {
            total: breakdown.total(),
            breakdown,
        }
    }
}

/// Operator-facing band of a score relative to the acceptance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// At or above the threshold: the frame is sampled.
    Excellent,
    /// Within 80% of the threshold.
    Fair,
    Low,
}

impl QualityTier {
    pub fn classify(score: f32, threshold: f32) -> Self {
        if score >= threshold {
            QualityTier::Excellent
        } else if score >= threshold * 0.8 {
            QualityTier::Fair
        } else {
            QualityTier::Low
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            QualityTier::Excellent => "EXCELLENT",
            QualityTier::Fair => "fair",
            QualityTier::Low => "low",
        })
    }
}

/// Strategy for scoring one face candidate.
pub trait FrameScorer {
    fn score(
        &self,
        frame: &Frame,
        face: &FaceBox,
        landmarks: Option<&FaceLandmarks>,
    ) -> QualityAssessment;
}

/// The weighted six-metric rubric.
#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    weights: QualityWeights,
}

impl QualityScorer {
    pub fn new(weights: QualityWeights) -> Self {
        Self { weights }
    }

    /// Blur, brightness and contrast from the face crop. An empty crop
    /// contributes nothing.
    fn crop_metrics(&self, crop: &Crop) -> (f32, f32, f32) {
        let w = &self.weights;
        let Some((mean, std_dev)) = mean_and_std(crop) else {
            return (0.0, 0.0, 0.0);
        };

        let sharpness = laplacian_variance(crop);
        let blur = (sharpness / f64::from(w.blur_scale)).min(1.0) as f32 * w.blur_weight;

        let midpoint = f64::from(w.brightness_midpoint);
        let brightness = (1.0 - (mean - midpoint).abs() / midpoint) as f32 * w.brightness_weight;

        let contrast = (std_dev / f64::from(w.contrast_scale)).min(1.0) as f32 * w.contrast_weight;

        (blur, brightness, contrast)
    }
}

impl FrameScorer for QualityScorer {
    fn score(
        &self,
        frame: &Frame,
        face: &FaceBox,
        landmarks: Option<&FaceLandmarks>,
    ) -> QualityAssessment {
        let w = &self.weights;
        let crop = frame.crop(face);
        let (blur, brightness, contrast) = self.crop_metrics(&crop);

        let size = (face.area() as f64 / f64::from(w.size_scale)).min(1.0) as f32 * w.size_weight;

        let centered = if is_centered(face, frame.width, frame.height, w.center_tolerance) {
            w.centered_weight
        } else {
            0.0
        };

        let angle = landmarks
            .and_then(nose_offset)
            .map(|offset| (w.angle_scale - offset).max(0.0) / w.angle_scale * w.angle_weight)
            .unwrap_or(0.0);

        QualityAssessment::from_breakdown(QualityBreakdown {
            blur,
            brightness,
            contrast,
            size,
            centered,
            angle,
        })
    }
}

/// Mean and population standard deviation of the crop intensities.
fn mean_and_std(crop: &Crop) -> Option<(f64, f64)> {
    if crop.is_empty() {
        return None;
    }
    let n = crop.data.len() as f64;
    let mean = crop.data.iter().map(|&p| f64::from(p)).sum::<f64>() / n;
    let var = crop
        .data
        .iter()
        .map(|&p| (f64::from(p) - mean).powi(2))
        .sum::<f64>()
        / n;
    Some((mean, var.sqrt()))
}

/// Reflect-101 border: `-1 → 1`, `n → n - 2`.
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    while i < 0 || i >= n {
        i = if i < 0 { -i } else { 2 * n - 2 - i };
    }
    i as usize
}

/// Population variance of the 4-neighbour Laplacian over every crop pixel.
///
/// Kernel `[[0, 1, 0], [1, -4, 1], [0, 1, 0]]` with reflect-101 borders.
fn laplacian_variance(crop: &Crop) -> f64 {
    if crop.is_empty() {
        return 0.0;
    }
    let (w, h) = (crop.width, crop.height);
    let at = |x: isize, y: isize| f64::from(crop.pixel(reflect_101(x, w), reflect_101(y, h)));

    let mut responses = Vec::with_capacity(w * h);
    for y in 0..h as isize {
        for x in 0..w as isize {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            responses.push(lap);
        }
    }

    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
}

/// True when the box center lies strictly within `tolerance` of the frame
/// center on both axes (as a fraction of frame width and height).
fn is_centered(face: &FaceBox, frame_width: u32, frame_height: u32, tolerance: f32) -> bool {
    let (cx, cy) = face.center();
    let frame_cx = i64::from(frame_width / 2);
    let frame_cy = i64::from(frame_height / 2);

    let tol_x = f64::from(frame_width) * f64::from(tolerance);
    let tol_y = f64::from(frame_height) * f64::from(tolerance);

    ((cx - frame_cx).abs() as f64) < tol_x && ((cy - frame_cy).abs() as f64) < tol_y
}

/// Horizontal distance between the nose-tip centroid and the midpoint of the
/// two eye centroids. `None` if any of the three groups is missing.
fn nose_offset(landmarks: &FaceLandmarks) -> Option<f32> {
    let left = FaceLandmarks::centroid(&landmarks.left_eye)?;
    let right = FaceLandmarks::centroid(&landmarks.right_eye)?;
    let nose = FaceLandmarks::centroid(&landmarks.nose_tip)?;
    let eye_mid_x = (left.0 + right.0) / 2.0;
    Some((nose.0 - eye_mid_x).abs())
}
