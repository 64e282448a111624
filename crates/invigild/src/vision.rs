//! The vision service: one dedicated OS thread owning the ONNX sessions.
//!
//! Every detection/embedding call in the process funnels through this
//! thread's request loop, so at most one inference is in flight at a time.
//! That is deliberate: the underlying runtime is treated as non-reentrant,
//! and frames arrive at roughly one per second per user, so the serialized
//! latency cost stays well under the frame period.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use invigil_core::{classify_frame, Embedding, FaceAnalyzer, FrameOutcome, FramePixels, ScanError};
use invigil_vision::{AnalyzerError, OnnxAnalyzer};

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("failed to load vision models: {0}")]
    Load(#[from] AnalyzerError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("expected exactly one face in the capture, found {0}")]
    NotExactlyOneFace(usize),
    #[error("no embedding could be extracted from the capture")]
    NoEmbedding,
    #[error("vision thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the vision thread.
enum VisionRequest {
    Classify {
        frame: Option<FramePixels>,
        baseline: Embedding,
        reply: oneshot::Sender<FrameOutcome>,
    },
    ExtractBaseline {
        frame: FramePixels,
        reply: oneshot::Sender<Result<Embedding, VisionError>>,
    },
}

/// Clone-safe handle to the vision thread.
#[derive(Clone)]
pub struct VisionHandle {
    tx: mpsc::Sender<VisionRequest>,
}

impl VisionHandle {
    /// Classify one proctoring frame against a registered baseline.
    /// `frame` is `None` when the transport image failed to decode.
    pub async fn classify(
        &self,
        frame: Option<FramePixels>,
        baseline: Embedding,
    ) -> Result<FrameOutcome, VisionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(VisionRequest::Classify {
                frame,
                baseline,
                reply: reply_tx,
            })
            .await
            .map_err(|_| VisionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| VisionError::ChannelClosed)
    }

    /// Extract a registration embedding from a capture that must contain
    /// exactly one face.
    pub async fn extract_baseline(&self, frame: FramePixels) -> Result<Embedding, VisionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(VisionRequest::ExtractBaseline {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| VisionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| VisionError::ChannelClosed)?
    }
}

/// Spawn the vision service on a dedicated OS thread.
///
/// Loads both ONNX models synchronously (fail-fast if either is missing
/// or invalid), then enters the request loop.
pub fn spawn_vision(detector_path: &str, embedder_path: &str) -> Result<VisionHandle, VisionError> {
    let mut analyzer = OnnxAnalyzer::load(detector_path, embedder_path)?;
    tracing::info!(detector = detector_path, embedder = embedder_path, "vision models loaded");

    let (tx, mut rx) = mpsc::channel::<VisionRequest>(4);

    std::thread::Builder::new()
        .name("invigil-vision".into())
        .spawn(move || {
            tracing::info!("vision thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    VisionRequest::Classify {
                        frame,
                        baseline,
                        reply,
                    } => {
                        let outcome = classify_frame(&mut analyzer, frame.as_ref(), &baseline);
                        let _ = reply.send(outcome);
                    }
                    VisionRequest::ExtractBaseline { frame, reply } => {
                        let result = run_extract(&mut analyzer, &frame);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("vision thread exiting");
        })
        .expect("failed to spawn vision thread");

    Ok(VisionHandle { tx })
}

/// Registration is stricter than proctoring: the capture must contain
/// exactly one embeddable face, and failures surface to the caller
/// instead of degrading to a conservative classification.
fn run_extract(analyzer: &mut OnnxAnalyzer, frame: &FramePixels) -> Result<Embedding, VisionError> {
    let scan = analyzer.scan(&frame.data, frame.width, frame.height)?;
    if scan.face_count != 1 {
        return Err(VisionError::NotExactlyOneFace(scan.face_count));
    }
    scan.embedding.ok_or(VisionError::NoEmbedding)
}
