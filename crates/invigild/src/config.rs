use std::path::PathBuf;
use std::time::Duration;

use invigil_core::Policy;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory where reference images are saved at registration.
    pub media_dir: PathBuf,
    /// Consecutive faceless frames before a no-face alert.
    pub face_missing_frames: u32,
    /// Consecutive multi-face frames before a multiple-faces alert.
    pub multi_face_frames: u32,
    /// Consecutive mismatching frames before an identity alert.
    pub identity_mismatch_frames: u32,
    /// Minimum seconds between two alerts of the same kind.
    pub alert_cooldown_secs: u64,
    /// Cosine distance above which a face does not match the baseline.
    pub match_distance_threshold: f32,
    /// Minimum number of capture images required to register a baseline.
    pub registration_min_images: usize,
    /// Whether the daemon serves on the session bus (development mode).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `INVIGIL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("invigil");

        let model_dir = std::env::var("INVIGIL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));
        let db_path = std::env::var("INVIGIL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("proctor.db"));
        let media_dir = std::env::var("INVIGIL_MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("media"));

        Self {
            model_dir,
            db_path,
            media_dir,
            face_missing_frames: env_u32("INVIGIL_FACE_MISSING_FRAMES", 5),
            multi_face_frames: env_u32("INVIGIL_MULTI_FACE_FRAMES", 5),
            identity_mismatch_frames: env_u32("INVIGIL_IDENTITY_MISMATCH_FRAMES", 3),
            alert_cooldown_secs: env_u64("INVIGIL_ALERT_COOLDOWN_SECS", 10),
            match_distance_threshold: env_f32("INVIGIL_MATCH_DISTANCE_THRESHOLD", 0.40),
            registration_min_images: env_usize("INVIGIL_REGISTRATION_MIN_IMAGES", 3),
            session_bus: std::env::var("INVIGIL_SESSION_BUS").is_ok(),
        }
    }

    /// Alerting policy derived from the configured thresholds. Validated
    /// by the engine at startup.
    pub fn policy(&self) -> Policy {
        Policy {
            face_missing_threshold: self.face_missing_frames,
            multi_face_threshold: self.multi_face_frames,
            identity_mismatch_threshold: self.identity_mismatch_frames,
            alert_cooldown: Duration::from_secs(self.alert_cooldown_secs),
            match_distance_threshold: self.match_distance_threshold,
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(invigil_models::DETECTOR_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face recognition model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join(invigil_models::EMBEDDER_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
