use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Embedding dimensionality produced by the ArcFace w600k_r50 model.
pub const EMBEDDING_DIM: usize = 512;

/// Distance reported when a comparison cannot be carried out (dimension
/// mismatch, non-finite components, zero-norm vector). Sits above the
/// match threshold so an uncheckable identity reads as a mismatch.
pub const MISMATCH_DISTANCE: f32 = 1.0;

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine distance to a baseline embedding, in `[0, 2]`.
    ///
    /// `0` means identical direction (best match); larger means less
    /// similar. Both vectors are normalized internally, so raw and
    /// pre-normalized inputs behave the same.
    ///
    /// Fails closed: any malformed input (length mismatch, empty vector,
    /// NaN/Inf component, zero norm) returns [`MISMATCH_DISTANCE`] rather
    /// than panicking.
    pub fn cosine_distance(&self, baseline: &Embedding) -> f32 {
        if self.values.is_empty() || self.values.len() != baseline.values.len() {
            return MISMATCH_DISTANCE;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(baseline.values.iter()) {
            if !a.is_finite() || !b.is_finite() {
                return MISMATCH_DISTANCE;
            }
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom <= 0.0 {
            return MISMATCH_DISTANCE;
        }

        1.0 - dot / denom
    }

    /// Element-wise mean of several embeddings, used to fold multiple
    /// registration captures into one baseline. Returns `None` when the
    /// input is empty or the dimensions disagree. The result is not
    /// re-normalized; [`cosine_distance`](Self::cosine_distance) does not
    /// require unit inputs.
    pub fn mean(embeddings: &[Embedding]) -> Option<Embedding> {
        let first = embeddings.first()?;
        let dim = first.values.len();
        if embeddings.iter().any(|e| e.values.len() != dim) {
            return None;
        }

        let mut sums = vec![0.0f32; dim];
        for e in embeddings {
            for (s, v) in sums.iter_mut().zip(e.values.iter()) {
                *s += v;
            }
        }
        let n = embeddings.len() as f32;

        Some(Embedding {
            values: sums.into_iter().map(|s| s / n).collect(),
            model_version: first.model_version.clone(),
        })
    }
}

/// The violation categories a proctoring session can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    NoFace,
    MultiFace,
    IdentityMismatch,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::NoFace => "no_face",
            AlertKind::MultiFace => "multi_face",
            AlertKind::IdentityMismatch => "identity_mismatch",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-frame classification outcome.
///
/// Stage one tags the face count; only an exactly-one-face frame carries a
/// stage-two identity distance. A frame with several faces never reaches
/// the identity check, since no single embedding is meaningful there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    NoFace,
    MultiFace,
    OneFace {
        /// Cosine distance between the live face and the registered
        /// baseline. Already fail-closed by the comparator.
        distance: f32,
    },
}

impl FrameOutcome {
    /// Event label reported back to the frame submitter.
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameOutcome::NoFace => "no_face",
            FrameOutcome::MultiFace => "multi_face",
            FrameOutcome::OneFace { .. } => "face_ok",
        }
    }
}

/// An alert decided by the engine for a single frame. Persisting it is the
/// caller's job; the wall-clock timestamp is assigned at that point.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub message: &'static str,
    /// Monotonic instant of the decision, the same `now` that stamped the
    /// cooldown window.
    pub fired_at: Instant,
}

/// Key for per-session proctoring state: one exam attempt by one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: i64,
    pub exam_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: None,
        }
    }

    #[test]
    fn test_distance_identical() {
        let a = emb(vec![1.0, 0.0, 0.0]);
        assert!(a.cosine_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_self_zero_unnormalized() {
        // Self-match is exact even for a non-unit vector
        let a = emb(vec![3.0, 4.0]);
        assert!(a.cosine_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_orthogonal() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!((a.cosine_distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_opposite() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![-1.0, 0.0]);
        assert!((a.cosine_distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = emb(vec![0.3, 0.7, 0.1]);
        let b = emb(vec![0.5, 0.2, 0.9]);
        assert_eq!(a.cosine_distance(&b), b.cosine_distance(&a));
    }

    #[test]
    fn test_distance_length_mismatch_fails_closed() {
        let a = emb(vec![1.0, 0.0, 0.0]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(a.cosine_distance(&b), MISMATCH_DISTANCE);
    }

    #[test]
    fn test_distance_nan_fails_closed() {
        let a = emb(vec![1.0, f32::NAN]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(a.cosine_distance(&b), MISMATCH_DISTANCE);
    }

    #[test]
    fn test_distance_infinite_fails_closed() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![f32::INFINITY, 0.0]);
        assert_eq!(a.cosine_distance(&b), MISMATCH_DISTANCE);
    }

    #[test]
    fn test_distance_zero_vector_fails_closed() {
        let a = emb(vec![0.0, 0.0]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(a.cosine_distance(&b), MISMATCH_DISTANCE);
    }

    #[test]
    fn test_distance_empty_fails_closed() {
        let a = emb(vec![]);
        assert_eq!(a.cosine_distance(&a), MISMATCH_DISTANCE);
    }

    #[test]
    fn test_mean_of_one_is_identity() {
        let a = emb(vec![0.25, 0.5]);
        let m = Embedding::mean(std::slice::from_ref(&a)).unwrap();
        assert_eq!(m.values, a.values);
    }

    #[test]
    fn test_mean_averages_elementwise() {
        let a = emb(vec![0.0, 1.0]);
        let b = emb(vec![1.0, 0.0]);
        let m = Embedding::mean(&[a, b]).unwrap();
        assert_eq!(m.values, vec![0.5, 0.5]);
    }

    #[test]
    fn test_mean_rejects_empty() {
        assert!(Embedding::mean(&[]).is_none());
    }

    #[test]
    fn test_mean_rejects_ragged_dimensions() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![1.0]);
        assert!(Embedding::mean(&[a, b]).is_none());
    }

    #[test]
    fn test_alert_kind_labels() {
        assert_eq!(AlertKind::NoFace.as_str(), "no_face");
        assert_eq!(AlertKind::MultiFace.as_str(), "multi_face");
        assert_eq!(AlertKind::IdentityMismatch.as_str(), "identity_mismatch");
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(FrameOutcome::NoFace.as_str(), "no_face");
        assert_eq!(FrameOutcome::MultiFace.as_str(), "multi_face");
        assert_eq!(FrameOutcome::OneFace { distance: 0.1 }.as_str(), "face_ok");
    }
}
