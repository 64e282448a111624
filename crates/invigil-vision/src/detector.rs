//! SCRFD face detector via ONNX Runtime.
//!
//! Decodes the anchor-free score/bbox heads at strides 8/16/32 and merges
//! them with greedy NMS. The landmark heads the model also exports are
//! not consumed: downstream embedding works from the bounding box alone.

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

use crate::resize::resize_bilinear;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model not found at {0}")]
    ModelNotFound(String),
    #[error("detection model exports {0} outputs, expected at least 6 (score/bbox per stride)")]
    UnexpectedOutputs(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face in original-frame coordinates.
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

/// Score/bbox output tensor indices per stride.
type HeadIndices = [(usize, usize); 3];

pub struct FaceDetector {
    session: Session,
    heads: HeadIndices,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 6 {
            return Err(DetectorError::UnexpectedOutputs(output_names.len()));
        }

        let heads = map_head_indices(&output_names);
        tracing::info!(path = model_path, ?heads, "detection model loaded");

        Ok(Self { session, heads })
    }

    /// Detect faces in a grayscale frame. Results are in original frame
    /// coordinates, strongest detection first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let (tensor, scale) = preprocess(frame, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.heads[slot];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            decode_stride(scores, bboxes, stride, scale, &mut candidates);
        }

        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Map score/bbox output tensors to stride slots.
///
/// Prefers the named convention ("score_8", "bbox_16", ...); models with
/// opaque numeric names fall back to the standard positional layout
/// ([0..2] scores, [3..5] bboxes, landmark heads after that, unused).
fn map_head_indices(names: &[String]) -> HeadIndices {
    let position = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &wanted)
    };

    let by_name: Option<Vec<(usize, usize)>> = STRIDES
        .iter()
        .map(|&s| Some((position("score", s)?, position("bbox", s)?)))
        .collect();

    match by_name {
        Some(pairs) => [pairs[0], pairs[1], pairs[2]],
        None => {
            tracing::debug!(?names, "output names not recognized, using positional layout");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode one stride's anchor grid into frame-space candidate boxes.
///
/// Anchors sit at cell corners scaled by the stride; bbox offsets are
/// (left, top, right, bottom) distances in stride units. `scale` is the
/// frame-to-input resize factor, used to map back to frame coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    scale: f32,
    out: &mut Vec<FaceBox>,
) {
    let grid_w = INPUT_SIZE / stride;
    let grid_h = INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * ANCHORS_PER_CELL;

    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= SCORE_THRESHOLD {
            continue;
        }

        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            break;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let anchor_x = (cell % grid_w) as f32 * stride as f32;
        let anchor_y = (cell / grid_w) as f32 * stride as f32;
        let s = stride as f32;

        out.push(FaceBox {
            x1: (anchor_x - bboxes[off] * s) / scale,
            y1: (anchor_y - bboxes[off + 1] * s) / scale,
            x2: (anchor_x + bboxes[off + 2] * s) / scale,
            y2: (anchor_y + bboxes[off + 3] * s) / scale,
            score,
        });
    }
}

/// Resize the frame to fit the model input (corner-anchored, padded with
/// the mean value so padding normalizes to zero) and lay it out as a
/// 3-channel NCHW tensor. Returns the tensor and the applied scale.
fn preprocess(frame: &[u8], width: usize, height: usize) -> (Array4<f32>, f32) {
    let scale = (INPUT_SIZE as f32 / width.max(1) as f32)
        .min(INPUT_SIZE as f32 / height.max(1) as f32);
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, INPUT_SIZE);

    let resized = resize_bilinear(frame, width, height, new_w, new_h);

    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let pixel = if x < new_w && y < new_h {
                resized[y * new_w + x] as f32
            } else {
                PIXEL_MEAN
            };
            let value = (pixel - PIXEL_MEAN) / PIXEL_STD;
            // Grayscale replicated into all three channels
            tensor[[0, 0, y, x]] = value;
            tensor[[0, 1, y, x]] = value;
            tensor[[0, 2, y, x]] = value;
        }
    }

    (tensor, scale)
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = ix * iy;
    let union = a.width() * a.height() + b.width() * b.height() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy NMS: keep the strongest box, drop everything overlapping it,
/// repeat. Output stays sorted strongest-first.
fn non_max_suppression(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
