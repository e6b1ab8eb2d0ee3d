//! Grayscale frame type and face-region cropping.

use crate::types::FaceBox;
use std::time::Duration;

/// A captured grayscale frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time as an offset from the start of the capture session.
    pub timestamp: Duration,
    pub sequence: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Wrap a grayscale buffer, checking it covers `width * height` pixels.
    pub fn from_gray(
        data: Vec<u8>,
        width: u32,
        height: u32,
        timestamp: Duration,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp,
            sequence,
        })
    }

    /// Copy out the region covered by `face`, clamped to the frame bounds.
    ///
    /// Boxes that fall entirely outside the frame produce an empty crop.
    pub fn crop(&self, face: &FaceBox) -> Crop {
        let clamp_x = |v: i32| v.clamp(0, self.width as i32) as usize;
        let clamp_y = |v: i32| v.clamp(0, self.height as i32) as usize;

        let (x0, x1) = (clamp_x(face.left), clamp_x(face.right));
        let (y0, y1) = (clamp_y(face.top), clamp_y(face.bottom));
        if x1 <= x0 || y1 <= y0 {
            return Crop::default();
        }

        let w = self.width as usize;
        let mut data = Vec::with_capacity((x1 - x0) * (y1 - y0));
        for y in y0..y1 {
            data.extend_from_slice(&self.data[y * w + x0..y * w + x1]);
        }

        Crop {
            data,
            width: x1 - x0,
            height: y1 - y0,
        }
    }
}

/// A rectangular grayscale region cut from a frame.
#[derive(Debug, Clone, Default)]
pub struct Crop {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Crop {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid grayscale length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let data = (0..width * height).map(|i| (i % 256) as u8).collect();
        Frame::from_gray(data, width, height, Duration::ZERO, 0).unwrap()
    }

    #[test]
    fn test_from_gray_rejects_short_buffer() {
        let result = Frame::from_gray(vec![0u8; 5], 2, 3, Duration::ZERO, 0);
        assert!(matches!(
            result,
            Err(FrameError::InvalidLength { expected: 6, actual: 5 })
        ));
    }

    #[test]
    fn test_crop_inside_frame() {
        let frame = gradient(4, 3);
        let crop = frame.crop(&FaceBox::new(1, 3, 3, 1));
        assert_eq!((crop.width, crop.height), (2, 2));
        // Rows 1..3, columns 1..3 of a row-major 0..12 ramp.
        assert_eq!(crop.data, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_crop_clamped_to_bounds() {
        let frame = gradient(4, 3);
        let crop = frame.crop(&FaceBox::new(-5, 10, 10, 2));
        assert_eq!((crop.width, crop.height), (2, 3));
        assert_eq!(crop.pixel(0, 0), 2);
        assert_eq!(crop.pixel(1, 2), 11);
    }

    #[test]
    fn test_crop_outside_frame_is_empty() {
        let frame = gradient(4, 3);
        assert!(frame.crop(&FaceBox::new(10, 20, 20, 10)).is_empty());
        assert!(frame.crop(&FaceBox::new(2, 1, 1, 2)).is_empty());
    }
}
