//! ArcFace embedding extraction via ONNX Runtime.
//!
//! The recognizer consumes a 112x112 crop taken square around the detected
//! bounding box with a small margin. The match threshold used downstream
//! was tuned against unaligned crops, so no landmark alignment is applied.

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

use invigil_core::{Embedding, EMBEDDING_DIM};

use crate::detector::FaceBox;
use crate::resize::{crop, resize_bilinear};

const INPUT_SIZE: usize = 112;
const PIXEL_MEAN: f32 = 127.5;
// Symmetric normalization: ArcFace divides by 127.5, not 128
const PIXEL_STD: f32 = 127.5;
const CROP_MARGIN: f32 = 0.125;
const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("recognition model not found at {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("model produced a {0}-dim embedding, expected {EMBEDDING_DIM}")]
    WrongDimension(usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "recognition model loaded");
        Ok(Self { session })
    }

    /// Extract an L2-normalized embedding for a detected face.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &FaceBox,
    ) -> Result<Embedding, EmbedderError> {
        let aligned = crop_face(frame, width as usize, height as usize, face);
        let input = to_tensor(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(e.to_string()))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedderError::WrongDimension(raw.len()));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

/// Cut a square region centered on the face box, expanded by the margin,
/// and resize it to the recognizer input size. Regions beyond the frame
/// edge come out black.
fn crop_face(frame: &[u8], width: usize, height: usize, face: &FaceBox) -> Vec<u8> {
    let side = face.width().max(face.height()) * (1.0 + 2.0 * CROP_MARGIN);
    let side = side.max(1.0);
    let center_x = (face.x1 + face.x2) / 2.0;
    let center_y = (face.y1 + face.y2) / 2.0;
    let left = (center_x - side / 2.0).round() as i64;
    let top = (center_y - side / 2.0).round() as i64;

    let square = crop(frame, width, height, left, top, side.round() as usize);
    let size = side.round() as usize;
    resize_bilinear(&square, size, size, INPUT_SIZE, INPUT_SIZE)
}

/// 112x112 grayscale crop into a symmetric-normalized NCHW tensor, the
/// single channel replicated three times.
fn to_tensor(aligned: &[u8]) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let pixel = aligned.get(y * INPUT_SIZE + x).copied().unwrap_or(0) as f32;
            let value = (pixel - PIXEL_MEAN) / PIXEL_STD;
            tensor[[0, 0, y, x]] = value;
            tensor[[0, 1, y, x]] = value;
            tensor[[0, 2, y, x]] = value;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
