//! Face detection capability and per-tick classification

use async_trait::async_trait;
use thiserror::Error;

use super::gate::PresenceState;
use crate::capture::VideoFrame;

/// One face found in a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Detector confidence in [0, 1]
    pub score: f32,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("face detection model not loaded: {0}")]
    ModelUnavailable(String),
    #[error("face detection failed: {0}")]
    Failed(String),
}

/// Swappable face detection model.
#[async_trait]
pub trait FaceDetector: Send + Sync + 'static {
    async fn detect(&self, frame: &VideoFrame) -> Result<Vec<Detection>, DetectorError>;
}

/// Map raw detections to a presence classification.
///
/// Exactly one detection yields `Single` with the detector's score scaled to
/// 0-100 and rounded; zero is `Absent`; more than one is `Multiple`.
pub fn classify(detections: &[Detection]) -> PresenceState {
    match detections {
        [] => PresenceState::absent(),
        [only] => {
            let score = (only.score.clamp(0.0, 1.0) * 100.0).round() as u8;
            PresenceState::single(score)
        }
        _ => PresenceState::multiple(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceClassification;

    #[test]
    fn classify_counts_faces() {
        assert_eq!(classify(&[]).classification, PresenceClassification::Absent);
        assert_eq!(
            classify(&[Detection { score: 0.9 }]).classification,
            PresenceClassification::Single
        );
        assert_eq!(
            classify(&[Detection { score: 0.9 }, Detection { score: 0.4 }]).classification,
            PresenceClassification::Multiple
        );
    }

    #[test]
    fn single_score_is_scaled_and_rounded() {
        assert_eq!(classify(&[Detection { score: 0.876 }]).confidence, 88);
        assert_eq!(classify(&[Detection { score: 1.7 }]).confidence, 100);
        assert_eq!(classify(&[Detection { score: -0.2 }]).confidence, 0);
    }

    #[test]
    fn multiple_faces_carry_no_confidence() {
        let state = classify(&[Detection { score: 0.99 }, Detection { score: 0.99 }]);
        assert_eq!(state.confidence, 0);
    }
}
