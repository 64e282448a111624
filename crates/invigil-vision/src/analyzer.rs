use thiserror::Error;

use invigil_core::{FaceAnalyzer, FaceScan, ScanError};

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

/// The production [`FaceAnalyzer`]: SCRFD detection, then ArcFace
/// embedding extraction when exactly one face is present.
///
/// Owns two ONNX sessions; not `Sync`. The daemon keeps one instance on a
/// dedicated thread and serializes every scan through it.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxAnalyzer {
    /// Load both models, failing fast if either file is absent or invalid.
    pub fn load(detector_path: &str, embedder_path: &str) -> Result<Self, AnalyzerError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            embedder: FaceEmbedder::load(embedder_path)?,
        })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn scan(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<FaceScan, ScanError> {
        let faces = self
            .detector
            .detect(pixels, width, height)
            .map_err(|e| ScanError(e.to_string()))?;

        let embedding = match faces.as_slice() {
            [only] => match self.embedder.extract(pixels, width, height, only) {
                Ok(embedding) => Some(embedding),
                Err(err) => {
                    // A face we cannot embed still counts as one face; the
                    // classifier treats the missing embedding as a mismatch.
                    tracing::warn!(error = %err, "embedding extraction failed for detected face");
                    None
                }
            },
            _ => None,
        };

        Ok(FaceScan {
            face_count: faces.len(),
            embedding,
        })
    }
}
