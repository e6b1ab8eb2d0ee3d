//! Face detection, landmark, and encoding capabilities the pipeline consumes.

use crate::frame::Frame;
use crate::types::{Embedding, FaceBox, FaceLandmarks};

/// The capability surface of a face detection / encoding backend.
///
/// Implementations wrap whatever model stack is available; the enrollment
/// pipeline only needs these three calls.
pub trait FaceAnalyzer {
    /// Bounding boxes of every face in the frame.
    fn detect_faces(&mut self, frame: &Frame) -> Vec<FaceBox>;

    /// One landmark set per box, in box order. May be empty when the
    /// backend has no landmark model.
    fn detect_landmarks(&mut self, frame: &Frame, faces: &[FaceBox]) -> Vec<FaceLandmarks>;

    /// Identity embedding for one face, or `None` if encoding failed.
    fn encode_face(&mut self, frame: &Frame, face: &FaceBox) -> Option<Embedding>;
}
