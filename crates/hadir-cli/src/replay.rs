//! Recorded capture sessions.
//!
//! A session directory holds `session.json` and one image per frame. The
//! manifest carries what a live detector/encoder and the operator's keyboard
//! produced for each frame, so an enrollment can be replayed offline:
//!
//! ```json
//! {
//!   "frames": [
//!     { "image": "0000.png", "timestamp_ms": 0, "faces": [] },
//!     { "image": "0001.png", "timestamp_ms": 3100,
//!       "faces": [{ "box": { "top": 80, "right": 240, "bottom": 280, "left": 40 },
//!                   "landmarks": { "left_eye": [[100, 150]], "right_eye": [[180, 150]],
//!                                  "nose_tip": [[140, 200]] },
//!                   "embedding": [0.01, ...] }],
//!       "signal": "next_pose" }
//!   ]
//! }
//! ```

use hadir_core::{
    CaptureError, Embedding, FaceAnalyzer, FaceBox, FaceLandmarks, Frame, FrameSource, Operator,
    OperatorSignal, Pose, Progress, QualityAssessment, QualityTier, SamplerEvent,
};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const MANIFEST: &str = "session.json";

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceEntry {
    #[serde(rename = "box")]
    pub face_box: FaceBox,
    #[serde(default)]
    pub landmarks: Option<FaceLandmarks>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameEntry {
    pub image: PathBuf,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub faces: Vec<FaceEntry>,
    #[serde(default)]
    pub signal: Option<Signal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    NextPose,
    Finish,
    Cancel,
}

impl From<Signal> for OperatorSignal {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::NextPose => OperatorSignal::NextPose,
            Signal::Finish => OperatorSignal::Finish,
            Signal::Cancel => OperatorSignal::Cancel,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    frames: Vec<FrameEntry>,
}

/// A loaded session directory.
#[derive(Debug)]
pub struct ReplaySession {
    dir: PathBuf,
    frames: Vec<FrameEntry>,
}

impl ReplaySession {
    pub fn load(dir: &Path) -> Result<Self, ReplayError> {
        let path = dir.join(MANIFEST);
        let src = std::fs::read_to_string(&path).map_err(|source| ReplayError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest: Manifest =
            serde_json::from_str(&src).map_err(|source| ReplayError::Manifest { path, source })?;

        tracing::info!(
            dir = %dir.display(),
            frames = manifest.frames.len(),
            "capture session loaded"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            frames: manifest.frames,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> ReplayFrames<'_> {
        ReplayFrames {
            session: self,
            next: 0,
        }
    }

    pub fn analyzer(&self) -> ReplayAnalyzer<'_> {
        ReplayAnalyzer { session: self }
    }

    fn entry(&self, frame: &Frame) -> Option<&FrameEntry> {
        self.frames.get(frame.sequence as usize)
    }
}

/// Decodes session images to grayscale frames in manifest order.
pub struct ReplayFrames<'a> {
    session: &'a ReplaySession,
    next: usize,
}

impl FrameSource for ReplayFrames<'_> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(entry) = self.session.frames.get(self.next) else {
            return Ok(None);
        };
        let sequence = self.next as u32;
        self.next += 1;

        let path = self.session.dir.join(&entry.image);
        let gray = image::open(&path)
            .map_err(|e| CaptureError::ReadFailed(format!("{}: {e}", path.display())))?
            .to_luma8();
        let (width, height) = gray.dimensions();

        let frame = Frame::from_gray(
            gray.into_raw(),
            width,
            height,
            Duration::from_millis(entry.timestamp_ms),
            sequence,
        )?;
        tracing::trace!(sequence, width, height, "replayed frame");
        Ok(Some(frame))
    }
}

/// Serves the detections recorded alongside each frame.
pub struct ReplayAnalyzer<'a> {
    session: &'a ReplaySession,
}

impl FaceAnalyzer for ReplayAnalyzer<'_> {
    fn detect_faces(&mut self, frame: &Frame) -> Vec<FaceBox> {
        self.session
            .entry(frame)
            .map(|e| e.faces.iter().map(|f| f.face_box).collect())
            .unwrap_or_default()
    }

    fn detect_landmarks(&mut self, frame: &Frame, faces: &[FaceBox]) -> Vec<FaceLandmarks> {
        let Some(entry) = self.session.entry(frame) else {
            return Vec::new();
        };
        faces
            .iter()
            .map(|b| {
                entry
                    .faces
                    .iter()
                    .find(|f| f.face_box == *b)
                    .and_then(|f| f.landmarks.clone())
                    .unwrap_or_default()
            })
            .collect()
    }

    fn encode_face(&mut self, frame: &Frame, face: &FaceBox) -> Option<Embedding> {
        self.session
            .entry(frame)?
            .faces
            .iter()
            .find(|f| f.face_box == *face)?
            .embedding
            .clone()
            .map(Embedding::new)
    }
}

/// One-line quality summary: score, tier against `min_quality`, and the
/// per-metric breakdown.
pub fn describe_quality(assessment: &QualityAssessment, min_quality: f32) -> String {
    let tier = QualityTier::classify(assessment.total, min_quality);
    let metrics: Vec<String> = assessment
        .breakdown
        .metrics()
        .iter()
        .map(|(name, value)| format!("{name} {value:.1}"))
        .collect();
    format!("{:.1} {tier} [{}]", assessment.total, metrics.join(", "))
}

/// Operator that replays recorded key presses and prints progress.
pub struct ConsoleOperator<'a, W: Write> {
    session: &'a ReplaySession,
    min_quality: f32,
    out: W,
    last_pose: Option<Pose>,
    write_failed: bool,
}

impl<'a, W: Write> ConsoleOperator<'a, W> {
    pub fn new(session: &'a ReplaySession, min_quality: f32, out: W) -> Self {
        Self {
            session,
            min_quality,
            out,
            last_pose: None,
            write_failed: false,
        }
    }

    fn emit(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{line}") {
            if !self.write_failed {
                tracing::warn!(error = %e, "operator console write failed");
                self.write_failed = true;
            }
        }
    }
}

impl<W: Write> Operator for ConsoleOperator<'_, W> {
    fn poll(&mut self, frame: &Frame) -> Option<OperatorSignal> {
        self.session.entry(frame)?.signal.map(OperatorSignal::from)
    }

    fn show(&mut self, _frame: &Frame, event: &SamplerEvent, progress: &Progress) {
        let line = match event {
            SamplerEvent::Accepted {
                assessment,
                pose,
                total,
                ..
            } => Some(format!(
                "Sample {}/{} | {} | Score: {}",
                total,
                progress.max_samples,
                pose,
                describe_quality(assessment, self.min_quality)
            )),
            SamplerEvent::BelowThreshold { assessment, .. } => Some(format!(
                "Below threshold | Score: {}",
                describe_quality(assessment, self.min_quality)
            )),
            SamplerEvent::EncodingFailed { assessment, .. } => Some(format!(
                "Encoding failed | Score: {}",
                describe_quality(assessment, self.min_quality)
            )),
            SamplerEvent::FaceCount { count: 0 } => Some("No face detected".to_string()),
            SamplerEvent::FaceCount { count } => {
                Some(format!("{count} faces detected; only one person may be in frame"))
            }
            SamplerEvent::PoseDelay { .. } | SamplerEvent::Inactive => None,
        };
        if let Some(line) = line {
            self.emit(&line);
        }

        if self.last_pose != Some(progress.pose) && !progress.state.is_terminal() {
            self.last_pose = Some(progress.pose);
            self.emit(&format!(">> {}", progress.pose.instruction()));
        }
    }
}
