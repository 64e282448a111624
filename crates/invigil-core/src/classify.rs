//! Per-frame classification: face count first, identity second.
//!
//! The identity check only runs when exactly one face is present. Every
//! failure on the way there degrades toward suspicion, never toward a
//! silent pass: an undecodable frame and a crashed detector both read as
//! `no_face`, and a face whose embedding could not be extracted or
//! compared reads as a mismatch.

use crate::types::{Embedding, FrameOutcome, MISMATCH_DISTANCE};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("face scan failed: {0}")]
pub struct ScanError(pub String);

/// A decoded grayscale frame, row-major, one byte per pixel.
#[derive(Debug, Clone)]
pub struct FramePixels {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Result of running the vision backend over one frame.
#[derive(Debug, Clone)]
pub struct FaceScan {
    /// Number of faces detected in the frame.
    pub face_count: usize,
    /// Embedding of the detected face. Populated only when `face_count`
    /// is exactly 1 and extraction succeeded.
    pub embedding: Option<Embedding>,
}

/// The seam to the external face detector/recognizer.
///
/// Implementations may be backed by a GPU or a non-reentrant native
/// library; callers are responsible for serializing access (the daemon
/// routes all calls through one dedicated thread).
pub trait FaceAnalyzer {
    fn scan(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<FaceScan, ScanError>;
}

/// Classify one frame against a registered baseline.
///
/// `frame` is `None` when the transport image could not be decoded.
pub fn classify_frame(
    analyzer: &mut dyn FaceAnalyzer,
    frame: Option<&FramePixels>,
    baseline: &Embedding,
) -> FrameOutcome {
    let Some(frame) = frame else {
        return FrameOutcome::NoFace;
    };

    let scan = match analyzer.scan(&frame.data, frame.width, frame.height) {
        Ok(scan) => scan,
        Err(err) => {
            tracing::warn!(error = %err, "face scan failed; classifying frame as faceless");
            return FrameOutcome::NoFace;
        }
    };

    match scan.face_count {
        0 => FrameOutcome::NoFace,
        1 => {
            let distance = match scan.embedding {
                Some(live) => live.cosine_distance(baseline),
                None => MISMATCH_DISTANCE,
            };
            FrameOutcome::OneFace { distance }
        }
        _ => FrameOutcome::MultiFace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Analyzer stub returning a fixed scan result or error.
    struct FixedAnalyzer(Result<FaceScan, &'static str>);

    impl FaceAnalyzer for FixedAnalyzer {
        fn scan(&mut self, _: &[u8], _: u32, _: u32) -> Result<FaceScan, ScanError> {
            match &self.0 {
                Ok(scan) => Ok(scan.clone()),
                Err(msg) => Err(ScanError(msg.to_string())),
            }
        }
    }

    fn baseline() -> Embedding {
        Embedding {
            values: vec![1.0, 0.0, 0.0],
            model_version: None,
        }
    }

    fn frame() -> FramePixels {
        FramePixels {
            data: vec![0u8; 16],
            width: 4,
            height: 4,
        }
    }

    #[test]
    fn test_undecodable_frame_is_no_face() {
        let mut analyzer = FixedAnalyzer(Ok(FaceScan {
            face_count: 1,
            embedding: Some(baseline()),
        }));
        let outcome = classify_frame(&mut analyzer, None, &baseline());
        assert_eq!(outcome, FrameOutcome::NoFace);
    }

    #[test]
    fn test_analyzer_error_is_no_face() {
        let mut analyzer = FixedAnalyzer(Err("backend exploded"));
        let outcome = classify_frame(&mut analyzer, Some(&frame()), &baseline());
        assert_eq!(outcome, FrameOutcome::NoFace);
    }

    #[test]
    fn test_zero_faces() {
        let mut analyzer = FixedAnalyzer(Ok(FaceScan {
            face_count: 0,
            embedding: None,
        }));
        let outcome = classify_frame(&mut analyzer, Some(&frame()), &baseline());
        assert_eq!(outcome, FrameOutcome::NoFace);
    }

    #[test]
    fn test_two_faces_skip_identity() {
        // Even with an embedding attached, face_count != 1 means multi_face
        let mut analyzer = FixedAnalyzer(Ok(FaceScan {
            face_count: 2,
            embedding: Some(baseline()),
        }));
        let outcome = classify_frame(&mut analyzer, Some(&frame()), &baseline());
        assert_eq!(outcome, FrameOutcome::MultiFace);
    }

    #[test]
    fn test_single_matching_face() {
        let mut analyzer = FixedAnalyzer(Ok(FaceScan {
            face_count: 1,
            embedding: Some(baseline()),
        }));
        let outcome = classify_frame(&mut analyzer, Some(&frame()), &baseline());
        match outcome {
            FrameOutcome::OneFace { distance } => assert!(distance.abs() < 1e-6),
            other => panic!("expected OneFace, got {other:?}"),
        }
    }

    #[test]
    fn test_single_mismatching_face() {
        let mut analyzer = FixedAnalyzer(Ok(FaceScan {
            face_count: 1,
            embedding: Some(Embedding {
                values: vec![0.0, 1.0, 0.0],
                model_version: None,
            }),
        }));
        let outcome = classify_frame(&mut analyzer, Some(&frame()), &baseline());
        match outcome {
            FrameOutcome::OneFace { distance } => assert!((distance - 1.0).abs() < 1e-6),
            other => panic!("expected OneFace, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_embedding_reads_as_mismatch() {
        let mut analyzer = FixedAnalyzer(Ok(FaceScan {
            face_count: 1,
            embedding: None,
        }));
        let outcome = classify_frame(&mut analyzer, Some(&frame()), &baseline());
        match outcome {
            FrameOutcome::OneFace { distance } => assert_eq!(distance, MISMATCH_DISTANCE),
            other => panic!("expected OneFace, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_baseline_reads_as_mismatch() {
        // Live embedding has the wrong length relative to the baseline
        let mut analyzer = FixedAnalyzer(Ok(FaceScan {
            face_count: 1,
            embedding: Some(Embedding {
                values: vec![1.0, 0.0],
                model_version: None,
            }),
        }));
        let outcome = classify_frame(&mut analyzer, Some(&frame()), &baseline());
        match outcome {
            FrameOutcome::OneFace { distance } => assert_eq!(distance, MISMATCH_DISTANCE),
            other => panic!("expected OneFace, got {other:?}"),
        }
    }
}
