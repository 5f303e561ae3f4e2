//! Hand landmark types and the fixed-length sample encoding.
//!
//! A sample is the 21 landmark positions of one hand flattened into
//! `[x0, y0, x1, y1, ..., x20, y20]`. Coordinates are stored exactly as the
//! detector reports them; no centering or scaling happens here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of tracked landmarks per hand.
pub const LANDMARK_COUNT: usize = 21;
/// Length of an encoded sample (`x` and `y` per landmark).
pub const SAMPLE_LEN: usize = LANDMARK_COUNT * 2;

/// One encoded hand pose.
pub type Sample = Vec<f32>;

/// A single landmark position in detector-native units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Which hand the detector believes it saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

/// One detected hand as delivered by the pose detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hand {
    pub keypoints: Vec<Landmark>,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub handedness: Option<Handedness>,
}

impl Hand {
    pub fn new(keypoints: Vec<Landmark>) -> Self {
        Self {
            keypoints,
            score: None,
            handedness: None,
        }
    }

    /// Encode this hand's keypoints into a sample.
    pub fn encode(&self) -> Result<Sample, EncodeError> {
        encode(&self.keypoints)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    #[error("expected {expected} landmarks, got {actual}")]
    LandmarkCount { expected: usize, actual: usize },
}

/// Flatten exactly [`LANDMARK_COUNT`] landmarks into an interleaved sample.
pub fn encode(landmarks: &[Landmark]) -> Result<Sample, EncodeError> {
    if landmarks.len() != LANDMARK_COUNT {
        return Err(EncodeError::LandmarkCount {
            expected: LANDMARK_COUNT,
            actual: landmarks.len(),
        });
    }
    let mut sample = Vec::with_capacity(SAMPLE_LEN);
    for landmark in landmarks {
        sample.push(landmark.x);
        sample.push(landmark.y);
    }
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Vec<Landmark> {
        (0..LANDMARK_COUNT)
            .map(|i| Landmark::new(i as f32, 100.0 + i as f32))
            .collect()
    }

    #[test]
    fn encode_interleaves_in_landmark_order() {
        let sample = encode(&ramp()).unwrap();
        assert_eq!(sample.len(), SAMPLE_LEN);
        for i in 0..LANDMARK_COUNT {
            assert_eq!(sample[2 * i], i as f32);
            assert_eq!(sample[2 * i + 1], 100.0 + i as f32);
        }
    }

    #[test]
    fn encode_keeps_raw_coordinates() {
        let mut points = ramp();
        points[3] = Landmark::new(-12.5, 640.25);
        let sample = encode(&points).unwrap();
        assert_eq!(&sample[6..8], &[-12.5, 640.25]);
    }

    #[test]
    fn encode_rejects_wrong_landmark_count() {
        let mut points = ramp();
        points.pop();
        assert_eq!(
            encode(&points),
            Err(EncodeError::LandmarkCount {
                expected: 21,
                actual: 20
            })
        );
        assert!(encode(&[]).is_err());
    }

    #[test]
    fn hand_deserializes_without_optional_fields() {
        let json = r#"{"keypoints":[{"x":1.0,"y":2.0}]}"#;
        let hand: Hand = serde_json::from_str(json).unwrap();
        assert_eq!(hand.keypoints, vec![Landmark::new(1.0, 2.0)]);
        assert_eq!(hand.score, None);
        assert!(hand.encode().is_err());
    }
}
