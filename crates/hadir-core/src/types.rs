use serde::{Deserialize, Serialize};

/// Length of every identity embedding produced by the face encoder.
pub const EMBEDDING_DIM: usize = 128;

/// Bounding box of a detected face in pixel coordinates.
///
/// Field order follows the detector convention `(top, right, bottom, left)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }

    /// Box area in pixels. Degenerate boxes have zero area.
    pub fn area(&self) -> i64 {
        (self.width() * self.height()).max(0)
    }

    /// Integer box center, rounded toward negative infinity on both axes.
    pub fn center(&self) -> (i64, i64) {
        (
            (i64::from(self.left) + i64::from(self.right)).div_euclid(2),
            (i64::from(self.top) + i64::from(self.bottom)).div_euclid(2),
        )
    }
}

/// Named facial landmark groups for one face.
///
/// Only the groups the quality rubric needs are kept. Any group may be empty
/// when the landmark model could not place it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    #[serde(default)]
    pub left_eye: Vec<(f32, f32)>,
    #[serde(default)]
    pub right_eye: Vec<(f32, f32)>,
    #[serde(default)]
    pub nose_tip: Vec<(f32, f32)>,
}

impl FaceLandmarks {
    /// Centroid of a point group, or `None` for an empty group.
    pub fn centroid(points: &[(f32, f32)]) -> Option<(f32, f32)> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f32;
        let (sx, sy) = points
            .iter()
            .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
        Some((sx / n, sy / n))
    }
}

/// Identity embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A zero vector is
    /// dissimilar to everything (similarity 0).
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Whether `candidate` is the same identity as `self` under the encoder's
    /// distance tolerance (0.6 is the usual value for 128-d face encodings).
    pub fn matches(&self, candidate: &Embedding, tolerance: f32) -> bool {
        self.dim() == candidate.dim() && self.euclidean_distance(candidate) <= tolerance
    }
}

/// Instructed head orientation used to diversify captured samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pose {
    Straight,
    Left,
    Right,
    Up,
    Down,
}

impl Pose {
    /// Poses in the order they are requested from the operator.
    pub const SEQUENCE: [Pose; 5] = [Pose::Straight, Pose::Left, Pose::Right, Pose::Up, Pose::Down];

    pub fn from_index(index: usize) -> Pose {
        Self::SEQUENCE[index % Self::SEQUENCE.len()]
    }

    pub fn instruction(self) -> &'static str {
        match self {
            Pose::Straight => "Look STRAIGHT at the camera",
            Pose::Left => "Turn slightly to the LEFT",
            Pose::Right => "Turn slightly to the RIGHT",
            Pose::Up => "Tilt slightly UP",
            Pose::Down => "Tilt slightly DOWN",
        }
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.instruction())
    }
}

/// One accepted enrollment sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub embedding: Embedding,
    pub quality: f32,
    pub pose: Pose,
}

/// An identity ready to be written to a store by the enrollment workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIdentity {
    pub identifier: String,
    pub embedding: Embedding,
    pub sample_count: usize,
    pub mean_quality: f32,
}
