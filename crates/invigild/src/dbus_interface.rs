use std::sync::Arc;
use std::time::Instant;
use zbus::interface;

use invigil_core::{AlertEngine, Embedding, SessionKey, SessionStore};

use crate::config::Config;
use crate::frame::decode_frame;
use crate::store::ProctorStore;
use crate::vision::VisionHandle;

/// Shared state accessible by D-Bus method handlers.
///
/// No outer lock: the session store carries its own per-session locks,
/// the store connection is clone-safe, and the engine and config are
/// immutable after startup.
pub struct AppState {
    pub config: Config,
    pub vision: VisionHandle,
    pub store: ProctorStore,
    pub engine: AlertEngine,
    pub sessions: SessionStore,
}

/// D-Bus interface for the Invigil proctoring daemon.
///
/// Bus name: org.invigil.Proctor1
/// Object path: /org/invigil/Proctor1
pub struct ProctorService {
    pub state: Arc<AppState>,
}

#[interface(name = "org.invigil.Proctor1")]
impl ProctorService {
    /// Register (or replace) a user's baseline face from several captures.
    ///
    /// Every capture must decode and contain exactly one clear face; the
    /// stored baseline is the mean of the per-capture embeddings and the
    /// first capture is kept as the reference image.
    async fn register_face(
        &self,
        user_id: i64,
        images: Vec<Vec<u8>>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(user_id, captures = images.len(), "register_face requested");

        let min_images = self.state.config.registration_min_images;
        if images.len() < min_images {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "at least {min_images} capture images are required for a robust registration"
            )));
        }

        let mut embeddings = Vec::with_capacity(images.len());
        for (i, bytes) in images.iter().enumerate() {
            let frame = decode_frame(bytes).ok_or_else(|| {
                zbus::fdo::Error::InvalidArgs(format!("capture {} could not be decoded", i + 1))
            })?;

            let embedding = self.state.vision.extract_baseline(frame).await.map_err(|e| {
                tracing::warn!(user_id, capture = i + 1, error = %e, "registration capture rejected");
                zbus::fdo::Error::Failed(format!(
                    "could not extract a single clear face from capture {}: {e}. \
                     Ensure the face is well lit and turned toward the camera",
                    i + 1
                ))
            })?;
            embeddings.push(embedding);
        }

        let baseline = Embedding::mean(&embeddings).ok_or_else(|| {
            zbus::fdo::Error::Failed("captures produced inconsistent embeddings".to_string())
        })?;

        let image_path = self.save_reference_image(user_id, &images[0]);

        self.state
            .store
            .save_baseline(user_id, &baseline, image_path)
            .await
            .map_err(|e| {
                tracing::error!(user_id, error = %e, "baseline store failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?;

        tracing::info!(user_id, captures = embeddings.len(), "baseline registered");
        Ok(format!(
            "Face baseline registered from {} captures.",
            embeddings.len()
        ))
    }

    /// Process one proctoring frame for a running exam session.
    ///
    /// Returns JSON `{"event": ..., "alert": <message or null>}`. A fired
    /// alert is appended to the audit log before the reply is sent.
    async fn submit_frame(
        &self,
        user_id: i64,
        exam_id: i64,
        session_id: &str,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        let baseline = self
            .state
            .store
            .baseline(user_id)
            .await
            .map_err(|e| {
                tracing::error!(user_id, error = %e, "baseline fetch failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?
            .ok_or_else(|| {
                // Setup error, not a proctoring signal
                zbus::fdo::Error::Failed(format!(
                    "no baseline face registered for user {user_id}"
                ))
            })?;

        let frame = decode_frame(&image);
        if frame.is_none() {
            tracing::debug!(user_id, exam_id, "frame did not decode; treating as faceless");
        }

        // Vision first (serialized on its own thread), then the per-session
        // lock for the whole update-and-decide step. Nothing awaits while
        // the session lock is held.
        let outcome = self
            .state
            .vision
            .classify(frame, baseline)
            .await
            .map_err(|e| {
                tracing::error!(user_id, exam_id, error = %e, "classification failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?;

        let key = SessionKey { user_id, exam_id };
        let session = self.state.sessions.state(key);
        let alert = {
            let mut state = session.lock().expect("session lock poisoned");
            self.state.engine.evaluate(&mut state, outcome, Instant::now())
        };

        let event = alert
            .as_ref()
            .map(|a| a.kind.as_str())
            .unwrap_or(outcome.as_str());
        tracing::debug!(
            user_id,
            exam_id,
            session_id,
            event,
            alerted = alert.is_some(),
            "frame processed"
        );

        if let Some(alert) = &alert {
            self.state
                .store
                .append_alert(user_id, exam_id, session_id, alert.kind, alert.message)
                .await
                .map_err(|e| {
                    tracing::error!(user_id, exam_id, error = %e, "alert append failed");
                    zbus::fdo::Error::Failed(e.to_string())
                })?;
            tracing::warn!(user_id, exam_id, kind = %alert.kind, "proctoring alert logged");
        }

        Ok(serde_json::json!({
            "event": event,
            "alert": alert.map(|a| a.message),
        })
        .to_string())
    }

    /// Most recent alerts for an exam as JSON, newest first.
    async fn recent_alerts(&self, exam_id: i64, limit: u32) -> zbus::fdo::Result<String> {
        let limit = if limit == 0 { 50 } else { limit };
        let alerts = self
            .state
            .store
            .recent_alerts(exam_id, limit)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        serde_json::to_string(&alerts).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let baselines = self.state.store.baseline_count().await.unwrap_or(0);
        let policy = self.state.engine.policy();

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "baselines_registered": baselines,
            "active_sessions": self.state.sessions.len(),
            "face_missing_threshold": policy.face_missing_threshold,
            "multi_face_threshold": policy.multi_face_threshold,
            "identity_mismatch_threshold": policy.identity_mismatch_threshold,
            "alert_cooldown_secs": policy.alert_cooldown.as_secs(),
            "match_distance_threshold": policy.match_distance_threshold,
        })
        .to_string())
    }
}

impl ProctorService {
    /// Write the first registration capture to the media directory. Best
    /// effort: a failed write loses the reference image, not the
    /// registration.
    fn save_reference_image(&self, user_id: i64, bytes: &[u8]) -> Option<String> {
        let dir = &self.state.config.media_dir;
        if let Err(err) = std::fs::create_dir_all(dir) {
            tracing::warn!(error = %err, "could not create media directory");
            return None;
        }

        let path = dir.join(format!("{user_id}_{}.jpg", uuid::Uuid::new_v4()));
        match std::fs::write(&path, bytes) {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "reference image write failed");
                None
            }
        }
    }
}
