//! hadir-core — Enrollment quality gating and embedding aggregation.
//!
//! Scores candidate face crops, samples embeddings across a guided pose
//! sequence, rejects outliers, and fuses the survivors into one identity
//! embedding. Detection, encoding, capture and storage are reached through
//! the traits in [`vision`] and [`enroll`].

pub mod config;
pub mod consensus;
pub mod enroll;
pub mod frame;
pub mod quality;
pub mod sampler;
pub mod types;
pub mod vision;

pub use config::{ConfigError, EnrollmentConfig, QualityWeights};
pub use consensus::{aggregate, filter_outliers, weighted_mean, Aggregate};
pub use enroll::{
    enroll, enroll_with_sampler, CaptureError, EnrollError, EnrollmentReport, FrameSource,
    IdentityStore, Operator,
};
pub use frame::{Frame, FrameError};
pub use quality::{FrameScorer, QualityAssessment, QualityBreakdown, QualityScorer, QualityTier};
pub use sampler::{OperatorSignal, Progress, Sampler, SamplerEvent, SamplerState};
pub use types::{Embedding, FaceBox, FaceLandmarks, NewIdentity, Pose, Sample, EMBEDDING_DIM};
pub use vision::FaceAnalyzer;
