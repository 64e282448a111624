//! invigil-vision — ONNX Runtime implementation of the face analyzer.
//!
//! SCRFD locates faces in a grayscale frame; ArcFace turns the single-face
//! crop into a 512-dimensional embedding. Sessions are not thread-safe and
//! inference is CPU-heavy, so the daemon funnels every call through one
//! dedicated thread.

pub mod analyzer;
pub mod detector;
pub mod embedder;
mod resize;

pub use analyzer::{AnalyzerError, OnnxAnalyzer};
pub use detector::{DetectorError, FaceBox, FaceDetector};
pub use embedder::{EmbedderError, FaceEmbedder};
