//! Pose-guided sample acquisition.
//!
//! The sampler is a state machine ticked once per captured frame. It cycles
//! through [`Pose::SEQUENCE`], shows each instruction for a settling delay,
//! then scores every single-face frame and records an embedding for each
//! candidate that clears the quality threshold.
//!
//! ```text
//! Idle ─► AwaitingPoseDelay ─► Sampling ─┬─► AwaitingPoseDelay (next pose)
//!                                        ├─► SessionComplete
//!                                        └─► Cancelled
//! ```
//!
//! Time comes from frame timestamps, never from the wall clock, so the delay
//! is a non-blocking elapsed-time check and tests run on virtual time.

use crate::config::EnrollmentConfig;
use crate::frame::Frame;
use crate::quality::{FrameScorer, QualityAssessment, QualityScorer};
use crate::types::{FaceBox, Pose, Sample, EMBEDDING_DIM};
use crate::vision::FaceAnalyzer;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    AwaitingPoseDelay,
    Sampling,
    SessionComplete,
    Cancelled,
}

impl SamplerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SamplerState::SessionComplete | SamplerState::Cancelled)
    }
}

/// Out-of-band operator input, checked once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorSignal {
    /// Skip to the next pose immediately.
    NextPose,
    /// Stop capturing and aggregate what was collected.
    Finish,
    /// Abort the session and discard every sample.
    Cancel,
}

/// Outcome of one sampler tick.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplerEvent {
    /// The pose instruction is still settling; the frame was not analyzed.
    PoseDelay { pose: Pose, remaining: Duration },
    /// Zero or several faces were detected; the frame was skipped.
    FaceCount { count: usize },
    /// The face scored below the acceptance threshold.
    BelowThreshold { face: FaceBox, assessment: QualityAssessment },
    /// The face passed the quality gate but produced no usable embedding.
    EncodingFailed { face: FaceBox, assessment: QualityAssessment },
    /// A sample was recorded. `next_pose` is set when this sample completed
    /// the current pose.
    Accepted {
        face: FaceBox,
        assessment: QualityAssessment,
        pose: Pose,
        total: usize,
        next_pose: Option<Pose>,
    },
    /// The session has already ended.
    Inactive,
}

/// Snapshot of session progress for operator feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub state: SamplerState,
    pub pose: Pose,
    pub pose_samples: usize,
    pub total: usize,
    pub max_samples: usize,
}

/// Enrollment session state and the rules that advance it.
pub struct Sampler<S = QualityScorer> {
    config: EnrollmentConfig,
    scorer: S,
    state: SamplerState,
    pose_index: usize,
    pose_samples: usize,
    pose_started_at: Duration,
    samples: Vec<Sample>,
}

impl Sampler<QualityScorer> {
    /// Sampler scoring candidates with the configured quality rubric.
    pub fn new(config: EnrollmentConfig) -> Self {
        let scorer = QualityScorer::new(config.weights.clone());
        Self::with_scorer(config, scorer)
    }
}

impl<S: FrameScorer> Sampler<S> {
    pub fn with_scorer(config: EnrollmentConfig, scorer: S) -> Self {
        Self {
            scorer,
            state: SamplerState::Idle,
            pose_index: 0,
            pose_samples: 0,
            pose_started_at: Duration::ZERO,
            samples: Vec::with_capacity(config.max_samples),
            config,
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn pose(&self) -> Pose {
        Pose::from_index(self.pose_index)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn config(&self) -> &EnrollmentConfig {
        &self.config
    }

    pub fn progress(&self) -> Progress {
        Progress {
            state: self.state,
            pose: self.pose(),
            pose_samples: self.pose_samples,
            total: self.samples.len(),
            max_samples: self.config.max_samples,
        }
    }

    /// Begin the first pose at `now`. No-op unless idle.
    pub fn start(&mut self, now: Duration) {
        if self.state == SamplerState::Idle {
            tracing::info!(
                max_samples = self.config.max_samples,
                min_quality = self.config.min_quality,
                "enrollment session started"
            );
            self.enter_pose(0, now);
        }
    }

    /// Manual pose advance. Restarts the settling delay and the per-pose count.
    pub fn next_pose(&mut self, now: Duration) {
        if self.state.is_terminal() {
            return;
        }
        tracing::info!(from = ?self.pose(), "manual pose advance");
        self.enter_pose(self.pose_index + 1, now);
    }

    /// End capture, keeping the collected samples for aggregation.
    pub fn finish(&mut self) {
        if !self.state.is_terminal() {
            tracing::info!(samples = self.samples.len(), "capture finished by operator");
            self.state = SamplerState::SessionComplete;
        }
    }

    /// Abort the session. Every collected sample is discarded.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            tracing::info!(discarded = self.samples.len(), "enrollment cancelled");
            self.samples.clear();
            self.state = SamplerState::Cancelled;
        }
    }

    /// Apply an operator signal at time `now`.
    pub fn apply(&mut self, signal: OperatorSignal, now: Duration) {
        match signal {
            OperatorSignal::NextPose => self.next_pose(now),
            OperatorSignal::Finish => self.finish(),
            OperatorSignal::Cancel => self.cancel(),
        }
    }

    /// Consume the session, yielding its samples.
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    /// Advance the session by one frame.
    pub fn on_frame<A: FaceAnalyzer + ?Sized>(
        &mut self,
        frame: &Frame,
        analyzer: &mut A,
    ) -> SamplerEvent {
        if self.state.is_terminal() {
            return SamplerEvent::Inactive;
        }
        let now = frame.timestamp;
        self.start(now);

        let delay = self.config.pose_delay();
        let elapsed = now.saturating_sub(self.pose_started_at);
        if elapsed < delay {
            return SamplerEvent::PoseDelay {
                pose: self.pose(),
                remaining: delay - elapsed,
            };
        }
        if self.state == SamplerState::AwaitingPoseDelay {
            tracing::debug!(pose = ?self.pose(), "pose delay elapsed; sampling");
            self.state = SamplerState::Sampling;
        }

        let faces = analyzer.detect_faces(frame);
        if faces.len() != 1 {
            tracing::debug!(
                seq = frame.sequence,
                count = faces.len(),
                "skipping frame: need exactly one face"
            );
            return SamplerEvent::FaceCount { count: faces.len() };
        }
        let face = faces[0];

        let landmarks = analyzer.detect_landmarks(frame, &faces);
        let assessment = self.scorer.score(frame, &face, landmarks.first());
        if assessment.total < self.config.min_quality {
            tracing::debug!(
                seq = frame.sequence,
                score = assessment.total,
                "below quality threshold"
            );
            return SamplerEvent::BelowThreshold { face, assessment };
        }

        let embedding = match analyzer.encode_face(frame, &face) {
            Some(e) if e.dim() == EMBEDDING_DIM => e,
            Some(e) => {
                tracing::warn!(
                    seq = frame.sequence,
                    dim = e.dim(),
                    expected = EMBEDDING_DIM,
                    "encoder returned wrong embedding dimension; frame dropped"
                );
                return SamplerEvent::EncodingFailed { face, assessment };
            }
            None => {
                tracing::warn!(
                    seq = frame.sequence,
                    score = assessment.total,
                    "face encoding failed; frame dropped"
                );
                return SamplerEvent::EncodingFailed { face, assessment };
            }
        };

        let pose = self.pose();
        self.samples.push(Sample {
            embedding,
            quality: assessment.total,
            pose,
        });
        self.pose_samples += 1;
        let total = self.samples.len();

        tracing::info!(
            total,
            max = self.config.max_samples,
            ?pose,
            score = assessment.total,
            "sample accepted"
        );

        let mut next_pose = None;
        if total >= self.config.max_samples {
            tracing::info!(samples = total, "sample cap reached");
            self.state = SamplerState::SessionComplete;
        } else if self.pose_samples >= self.config.samples_per_pose {
            self.enter_pose(self.pose_index + 1, now);
            next_pose = Some(self.pose());
        }

        SamplerEvent::Accepted {
            face,
            assessment,
            pose,
            total,
            next_pose,
        }
    }

    fn enter_pose(&mut self, index: usize, now: Duration) {
        self.pose_index = index % Pose::SEQUENCE.len();
        self.pose_samples = 0;
        self.pose_started_at = now;
        self.state = SamplerState::AwaitingPoseDelay;
        tracing::info!(
            pose = ?self.pose(),
            instruction = self.pose().instruction(),
            "pose instruction"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::QualityBreakdown;
    use crate::types::{Embedding, FaceLandmarks};
    use std::cell::Cell;

    const SECOND: Duration = Duration::from_secs(1);

    struct FixedScorer {
        score: f32,
        calls: Cell<usize>,
    }

    impl FixedScorer {
        fn new(score: f32) -> Self {
            Self { score, calls: Cell::new(0) }
        }
    }

    impl FrameScorer for FixedScorer {
        fn score(&self, _: &Frame, _: &FaceBox, _: Option<&FaceLandmarks>) -> QualityAssessment {
            self.calls.set(self.calls.get() + 1);
            QualityAssessment {
                total: self.score,
                breakdown: QualityBreakdown::default(),
            }
        }
    }

    struct StubAnalyzer {
        faces: usize,
        embedding: Option<Embedding>,
        encode_calls: usize,
    }

    impl StubAnalyzer {
        fn single_face() -> Self {
            Self {
                faces: 1,
                embedding: Some(Embedding::new(vec![0.5; EMBEDDING_DIM])),
                encode_calls: 0,
            }
        }
    }

    impl FaceAnalyzer for StubAnalyzer {
        fn detect_faces(&mut self, _: &Frame) -> Vec<FaceBox> {
            (0..self.faces).map(|i| FaceBox::new(0, 10 + i as i32, 10, i as i32)).collect()
        }

        fn detect_landmarks(&mut self, _: &Frame, faces: &[FaceBox]) -> Vec<FaceLandmarks> {
            vec![FaceLandmarks::default(); faces.len()]
        }

        fn encode_face(&mut self, _: &Frame, _: &FaceBox) -> Option<Embedding> {
            self.encode_calls += 1;
            self.embedding.clone()
        }
    }

    fn frame_at(t: Duration) -> Frame {
        Frame::from_gray(vec![0u8; 4], 2, 2, t, 0).unwrap()
    }

    /// Sampler whose first pose started at t = 0.
    fn sampler(score: f32) -> Sampler<FixedScorer> {
        let mut s = Sampler::with_scorer(EnrollmentConfig::default(), FixedScorer::new(score));
        s.start(Duration::ZERO);
        s
    }

    #[test]
    fn test_pose_delay_gates_capture() {
        let mut s = Sampler::with_scorer(EnrollmentConfig::default(), FixedScorer::new(85.0));
        assert_eq!(s.state(), SamplerState::Idle);
        let mut analyzer = StubAnalyzer::single_face();

        assert_eq!(
            s.on_frame(&frame_at(Duration::ZERO), &mut analyzer),
            SamplerEvent::PoseDelay { pose: Pose::Straight, remaining: 3 * SECOND }
        );
        assert_eq!(s.state(), SamplerState::AwaitingPoseDelay);

        let event = s.on_frame(&frame_at(Duration::from_millis(2999)), &mut analyzer);
        assert!(matches!(event, SamplerEvent::PoseDelay { .. }));
        assert_eq!(analyzer.encode_calls, 0);

        let event = s.on_frame(&frame_at(3 * SECOND), &mut analyzer);
        assert!(matches!(event, SamplerEvent::Accepted { total: 1, .. }));
        assert_eq!(s.state(), SamplerState::Sampling);
    }

    #[test]
    fn test_face_count_other_than_one_skips_scoring() {
        let mut s = sampler(85.0);

        for faces in [0, 2, 3] {
            let mut analyzer = StubAnalyzer { faces, ..StubAnalyzer::single_face() };
            let event = s.on_frame(&frame_at(5 * SECOND), &mut analyzer);
            assert_eq!(event, SamplerEvent::FaceCount { count: faces });
            assert_eq!(analyzer.encode_calls, 0);
        }
        assert_eq!(s.scorer.calls.get(), 0);
        assert!(s.samples().is_empty());
    }

    #[test]
    fn test_below_threshold_records_nothing() {
        let mut s = sampler(69.9);
        let mut analyzer = StubAnalyzer::single_face();

        let event = s.on_frame(&frame_at(4 * SECOND), &mut analyzer);
        assert!(matches!(event, SamplerEvent::BelowThreshold { .. }));
        assert_eq!(analyzer.encode_calls, 0);
        assert_eq!(s.progress().pose_samples, 0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut s = sampler(70.0);
        let mut analyzer = StubAnalyzer::single_face();
        let event = s.on_frame(&frame_at(4 * SECOND), &mut analyzer);
        assert!(matches!(event, SamplerEvent::Accepted { .. }));
    }

    #[test]
    fn test_encoding_failure_drops_frame() {
        let mut s = sampler(85.0);
        let mut analyzer = StubAnalyzer { embedding: None, ..StubAnalyzer::single_face() };

        let event = s.on_frame(&frame_at(4 * SECOND), &mut analyzer);
        assert!(matches!(event, SamplerEvent::EncodingFailed { .. }));
        assert_eq!(analyzer.encode_calls, 1);
        assert!(s.samples().is_empty());
        assert_eq!(s.progress().pose_samples, 0);
    }

    #[test]
    fn test_wrong_dimension_embedding_dropped() {
        let mut s = sampler(85.0);
        let mut analyzer = StubAnalyzer {
            embedding: Some(Embedding::new(vec![0.1; 512])),
            ..StubAnalyzer::single_face()
        };
        let event = s.on_frame(&frame_at(4 * SECOND), &mut analyzer);
        assert!(matches!(event, SamplerEvent::EncodingFailed { .. }));
        assert!(s.samples().is_empty());
    }

    #[test]
    fn test_pose_advances_after_exactly_three_samples() {
        let mut s = sampler(85.0);
        let mut analyzer = StubAnalyzer::single_face();

        // One frame every 3 s: each frame clears any pose delay.
        let mut poses = Vec::new();
        let mut advances = Vec::new();
        for i in 1..=15u32 {
            match s.on_frame(&frame_at(3 * i * SECOND), &mut analyzer) {
                SamplerEvent::Accepted { pose, total, next_pose, .. } => {
                    assert_eq!(total, i as usize);
                    poses.push(pose);
                    if let Some(next) = next_pose {
                        advances.push((total, next));
                    }
                }
                other => panic!("frame {i}: unexpected {other:?}"),
            }
        }

        let expected: Vec<Pose> = Pose::SEQUENCE.iter().flat_map(|&p| [p; 3]).collect();
        assert_eq!(poses, expected);
        assert_eq!(
            advances,
            vec![(3, Pose::Left), (6, Pose::Right), (9, Pose::Up), (12, Pose::Down)]
        );
        assert_eq!(s.state(), SamplerState::SessionComplete);
        assert_eq!(s.on_frame(&frame_at(100 * SECOND), &mut analyzer), SamplerEvent::Inactive);
        assert_eq!(s.samples().len(), 15);
    }

    #[test]
    fn test_pose_sequence_wraps() {
        let config = EnrollmentConfig { max_samples: 20, ..EnrollmentConfig::default() };
        let mut s = Sampler::with_scorer(config, FixedScorer::new(90.0));
        s.start(Duration::ZERO);
        let mut analyzer = StubAnalyzer::single_face();

        for i in 1..=16u32 {
            s.on_frame(&frame_at(3 * i * SECOND), &mut analyzer);
        }
        assert_eq!(s.samples()[15].pose, Pose::Straight);
        assert_eq!(s.progress().pose_samples, 1);
    }

    #[test]
    fn test_pose_delay_restarts_after_auto_advance() {
        let mut s = sampler(85.0);
        let mut analyzer = StubAnalyzer::single_face();

        for t in [3, 4, 5] {
            s.on_frame(&frame_at(t * SECOND), &mut analyzer);
        }
        assert_eq!(s.pose(), Pose::Left);
        assert_eq!(s.state(), SamplerState::AwaitingPoseDelay);

        let event = s.on_frame(&frame_at(7 * SECOND), &mut analyzer);
        assert_eq!(event, SamplerEvent::PoseDelay { pose: Pose::Left, remaining: SECOND });
        let event = s.on_frame(&frame_at(8 * SECOND), &mut analyzer);
        assert!(matches!(event, SamplerEvent::Accepted { pose: Pose::Left, .. }));
    }

    #[test]
    fn test_manual_advance_resets_delay_and_counter() {
        let mut s = sampler(85.0);
        let mut analyzer = StubAnalyzer::single_face();

        s.on_frame(&frame_at(3 * SECOND), &mut analyzer);
        s.on_frame(&frame_at(4 * SECOND), &mut analyzer);
        assert_eq!(s.progress().pose_samples, 2);

        s.apply(OperatorSignal::NextPose, 5 * SECOND);
        assert_eq!(s.pose(), Pose::Left);
        assert_eq!(s.progress().pose_samples, 0);
        assert_eq!(s.state(), SamplerState::AwaitingPoseDelay);

        // Mid-delay advance restarts the delay again.
        s.apply(OperatorSignal::NextPose, 6 * SECOND);
        assert_eq!(s.pose(), Pose::Right);
        let event = s.on_frame(&frame_at(8 * SECOND), &mut analyzer);
        assert_eq!(event, SamplerEvent::PoseDelay { pose: Pose::Right, remaining: SECOND });

        // Three more samples are needed for Right despite the two taken earlier.
        for t in [9, 10] {
            let event = s.on_frame(&frame_at(t * SECOND), &mut analyzer);
            assert!(matches!(event, SamplerEvent::Accepted { next_pose: None, .. }));
        }
        let event = s.on_frame(&frame_at(11 * SECOND), &mut analyzer);
        assert!(matches!(event, SamplerEvent::Accepted { next_pose: Some(Pose::Up), .. }));
    }

    #[test]
    fn test_cancel_discards_samples() {
        let mut s = sampler(85.0);
        let mut analyzer = StubAnalyzer::single_face();
        for t in [3, 4, 5, 9] {
            s.on_frame(&frame_at(t * SECOND), &mut analyzer);
        }
        assert_eq!(s.samples().len(), 4);

        s.apply(OperatorSignal::Cancel, 10 * SECOND);
        assert_eq!(s.state(), SamplerState::Cancelled);
        assert!(s.samples().is_empty());
        assert_eq!(s.on_frame(&frame_at(11 * SECOND), &mut analyzer), SamplerEvent::Inactive);

        // Terminal states ignore later signals.
        s.apply(OperatorSignal::Finish, 12 * SECOND);
        assert_eq!(s.state(), SamplerState::Cancelled);
    }

    #[test]
    fn test_finish_keeps_samples() {
        let mut s = sampler(85.0);
        let mut analyzer = StubAnalyzer::single_face();
        for t in [3, 4] {
            s.on_frame(&frame_at(t * SECOND), &mut analyzer);
        }
        s.apply(OperatorSignal::Finish, 5 * SECOND);
        assert_eq!(s.state(), SamplerState::SessionComplete);
        s.apply(OperatorSignal::Cancel, 6 * SECOND);
        assert_eq!(s.state(), SamplerState::SessionComplete);
        assert_eq!(s.into_samples().len(), 2);
    }

    #[test]
    fn test_samples_carry_quality_and_pose() {
        let mut s = sampler(85.0);
        let mut analyzer = StubAnalyzer::single_face();
        s.on_frame(&frame_at(3 * SECOND), &mut analyzer);
        let sample = &s.samples()[0];
        assert_eq!(sample.quality, 85.0);
        assert_eq!(sample.pose, Pose::Straight);
        assert_eq!(sample.embedding.dim(), EMBEDDING_DIM);
    }
}
