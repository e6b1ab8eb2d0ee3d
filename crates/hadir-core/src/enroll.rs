//! Enrollment workflow: identifier checks, capture loop, aggregation, and the
//! single write to the identity store.

use crate::config::EnrollmentConfig;
use crate::consensus::{self, Aggregate};
use crate::frame::{Frame, FrameError};
use crate::quality::FrameScorer;
use crate::sampler::{OperatorSignal, Progress, Sampler, SamplerEvent, SamplerState};
use crate::types::{NewIdentity, Pose, Sample};
use crate::vision::FaceAnalyzer;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame read failed: {0}")]
    ReadFailed(String),
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
}

/// Supplier of timestamped frames.
pub trait FrameSource {
    /// Next frame, `Ok(None)` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// The person running the enrollment: sees feedback, sends signals.
pub trait Operator {
    /// Signal issued while `frame` was on screen, if any.
    fn poll(&mut self, frame: &Frame) -> Option<OperatorSignal>;

    /// Feedback for one processed frame.
    fn show(&mut self, _frame: &Frame, _event: &SamplerEvent, _progress: &Progress) {}
}

/// Durable identifier → embedding records.
pub trait IdentityStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn contains(&self, identifier: &str) -> Result<bool, Self::Error>;

    /// Insert a new identity. Must fail if the identifier already exists.
    fn insert_new(&mut self, identity: &NewIdentity) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("identifier must not be empty")]
    EmptyIdentifier,
    #[error("identifier '{0}' is already enrolled")]
    DuplicateIdentifier(String),
    #[error("capture aborted: {0}")]
    Capture(#[from] CaptureError),
    #[error("enrollment cancelled by operator")]
    Cancelled,
    #[error("only {collected} samples collected (minimum {required})")]
    InsufficientSamples { collected: usize, required: usize },
    #[error("identity store: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EnrollError {
    fn store<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        EnrollError::Store(Box::new(err))
    }
}

/// Summary of a successful enrollment.
#[derive(Debug, Clone)]
pub struct EnrollmentReport {
    pub identifier: String,
    /// Samples accepted during capture.
    pub samples_collected: usize,
    /// Accepted samples per pose, in the order poses were first sampled.
    pub pose_counts: Vec<(Pose, usize)>,
    pub aggregate: Aggregate,
}

/// Enroll `identifier` with the rubric and limits from `config`.
pub fn enroll<St, Src, A, Op>(
    identifier: &str,
    config: &EnrollmentConfig,
    store: &mut St,
    source: &mut Src,
    analyzer: &mut A,
    operator: &mut Op,
) -> Result<EnrollmentReport, EnrollError>
where
    St: IdentityStore + ?Sized,
    Src: FrameSource + ?Sized,
    A: FaceAnalyzer + ?Sized,
    Op: Operator + ?Sized,
{
    let sampler = Sampler::new(config.clone());
    enroll_with_sampler(identifier, sampler, store, source, analyzer, operator)
}

/// Enroll `identifier` driving a caller-supplied sampler.
pub fn enroll_with_sampler<Sc, St, Src, A, Op>(
    identifier: &str,
    mut sampler: Sampler<Sc>,
    store: &mut St,
    source: &mut Src,
    analyzer: &mut A,
    operator: &mut Op,
) -> Result<EnrollmentReport, EnrollError>
where
    Sc: FrameScorer,
    St: IdentityStore + ?Sized,
    Src: FrameSource + ?Sized,
    A: FaceAnalyzer + ?Sized,
    Op: Operator + ?Sized,
{
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(EnrollError::EmptyIdentifier);
    }
    if store.contains(identifier).map_err(EnrollError::store)? {
        return Err(EnrollError::DuplicateIdentifier(identifier.to_string()));
    }

    tracing::info!(identifier, "enrollment starting");
    run_capture(&mut sampler, source, analyzer, operator)?;

    if sampler.state() == SamplerState::Cancelled {
        return Err(EnrollError::Cancelled);
    }

    let config = sampler.config().clone();
    let samples = sampler.into_samples();
    if samples.len() < config.min_samples {
        tracing::warn!(
            identifier,
            collected = samples.len(),
            required = config.min_samples,
            "not enough samples; nothing stored"
        );
        return Err(EnrollError::InsufficientSamples {
            collected: samples.len(),
            required: config.min_samples,
        });
    }

    let aggregate = consensus::aggregate(&samples, config.top_k, config.outlier_margin).ok_or(
        EnrollError::InsufficientSamples {
            collected: samples.len(),
            required: config.min_samples,
        },
    )?;

    store
        .insert_new(&NewIdentity {
            identifier: identifier.to_string(),
            embedding: aggregate.embedding.clone(),
            sample_count: aggregate.used,
            mean_quality: aggregate.mean_quality,
        })
        .map_err(EnrollError::store)?;

    tracing::info!(
        identifier,
        collected = samples.len(),
        used = aggregate.used,
        mean_quality = aggregate.mean_quality,
        "identity enrolled"
    );

    Ok(EnrollmentReport {
        identifier: identifier.to_string(),
        samples_collected: samples.len(),
        pose_counts: pose_counts(&samples),
        aggregate,
    })
}

/// Pull frames until the sampler reaches a terminal state.
///
/// The end of the stream finishes the session. A read failure aborts it.
fn run_capture<Sc, Src, A, Op>(
    sampler: &mut Sampler<Sc>,
    source: &mut Src,
    analyzer: &mut A,
    operator: &mut Op,
) -> Result<(), CaptureError>
where
    Sc: FrameScorer,
    Src: FrameSource + ?Sized,
    A: FaceAnalyzer + ?Sized,
    Op: Operator + ?Sized,
{
    while !sampler.state().is_terminal() {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("frame stream ended");
                sampler.finish();
                break;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    collected = sampler.samples().len(),
                    "capture failed; aborting session"
                );
                return Err(e);
            }
        };

        let event = sampler.on_frame(&frame, analyzer);
        operator.show(&frame, &event, &sampler.progress());

        if let Some(signal) = operator.poll(&frame) {
            sampler.apply(signal, frame.timestamp);
        }
    }
    Ok(())
}

fn pose_counts(samples: &[Sample]) -> Vec<(Pose, usize)> {
    let mut counts: Vec<(Pose, usize)> = Vec::new();
    for sample in samples {
        match counts.iter_mut().find(|(p, _)| *p == sample.pose) {
            Some((_, n)) => *n += 1,
            None => counts.push((sample.pose, 1)),
        }
    }
    counts
}
