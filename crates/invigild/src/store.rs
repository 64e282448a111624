use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

use invigil_core::{AlertKind, Embedding, EMBEDDING_DIM};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

const EMBEDDING_BYTE_LEN: usize = EMBEDDING_DIM * 4;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("embedding encryption failed")]
    EncryptionFailed,
    #[error("embedding decryption failed — key mismatch or corrupted data")]
    DecryptionFailed,
    #[error("invalid embedding blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("invalid embedding dimension: {0} (expected {EMBEDDING_DIM})")]
    InvalidEmbeddingDim(usize),
    #[error("invalid embedding value (NaN/Inf)")]
    InvalidEmbeddingValue,
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
}

/// One persisted proctoring alert.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertRecord {
    pub id: i64,
    pub user_id: i64,
    pub exam_id: i64,
    pub session_id: String,
    pub kind: String,
    pub message: String,
    pub created_at: String,
}

/// SQLite persistence for baselines and the alert log.
///
/// `user_faces` holds one row per user (replaced wholesale on
/// re-registration); `proctor_logs` is append-only. Baseline embeddings
/// are AES-256-GCM encrypted before storage; a per-installation 32-byte
/// key is generated at first use and kept at `{db_dir}/.key` (mode 0600).
#[derive(Clone)]
pub struct ProctorStore {
    conn: Connection,
    enc_key: [u8; 32],
}

impl ProctorStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let enc_key = if db_path == Path::new(":memory:") {
            // In-memory DB (tests): fixed all-zeros key
            [0u8; 32]
        } else {
            let key_path = db_path
                .parent()
                .unwrap_or(Path::new("/var/lib/invigil"))
                .join(".key");
            load_or_generate_key(&key_path)?
        };

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS user_faces (
                     user_id INTEGER PRIMARY KEY,
                     embedding BLOB NOT NULL,
                     model_version TEXT,
                     image_path TEXT,
                     created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS proctor_logs (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     user_id INTEGER NOT NULL,
                     exam_id INTEGER NOT NULL,
                     session_id TEXT NOT NULL,
                     kind TEXT NOT NULL,
                     message TEXT NOT NULL,
                     created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_proctor_logs_exam ON proctor_logs(exam_id);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, enc_key })
    }

    /// Store (or replace) a user's baseline embedding.
    pub async fn save_baseline(
        &self,
        user_id: i64,
        embedding: &Embedding,
        image_path: Option<String>,
    ) -> Result<(), StoreError> {
        let model_version = embedding.model_version.clone();
        let created_at = chrono::Utc::now().to_rfc3339();

        // Encrypt before entering the SQLite closure
        let blob = self.encrypt_embedding(&embedding.values)?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO user_faces (user_id, embedding, model_version, image_path, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(user_id) DO UPDATE SET
                         embedding = excluded.embedding,
                         model_version = excluded.model_version,
                         image_path = excluded.image_path,
                         created_at = excluded.created_at",
                    rusqlite::params![user_id, blob, model_version, image_path, created_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Fetch a user's baseline embedding, if one is registered.
    pub async fn baseline(&self, user_id: i64) -> Result<Option<Embedding>, StoreError> {
        let row: Option<(Vec<u8>, Option<String>)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT embedding, model_version FROM user_faces WHERE user_id = ?1",
                )?;
                let mut rows = stmt.query([user_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
                    None => Ok(None),
                }
            })
            .await?;

        match row {
            Some((blob, model_version)) => {
                let values = self.decrypt_embedding(&blob)?;
                Ok(Some(Embedding {
                    values,
                    model_version,
                }))
            }
            None => Ok(None),
        }
    }

    /// Append one alert to the log. Wall-clock timestamp assigned here.
    pub async fn append_alert(
        &self,
        user_id: i64,
        exam_id: i64,
        session_id: &str,
        kind: AlertKind,
        message: &str,
    ) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        let kind = kind.as_str();
        let message = message.to_string();
        let created_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO proctor_logs (user_id, exam_id, session_id, kind, message, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![user_id, exam_id, session_id, kind, message, created_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Most recent alerts for an exam, newest first.
    pub async fn recent_alerts(
        &self,
        exam_id: i64,
        limit: u32,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, exam_id, session_id, kind, message, created_at
                     FROM proctor_logs WHERE exam_id = ?1
                     ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(rusqlite::params![exam_id, limit], |row| {
                    Ok(AlertRecord {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        exam_id: row.get(2)?,
                        session_id: row.get(3)?,
                        kind: row.get(4)?,
                        message: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Count registered baselines across all users.
    pub async fn baseline_count(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM user_faces", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Encryption helpers ────────────────────────────────────────────────────

    /// Encrypt embedding values with AES-256-GCM.
    ///
    /// Output layout: 12-byte random nonce || ciphertext || 16-byte GCM tag.
    fn encrypt_embedding(&self, values: &[f32]) -> Result<Vec<u8>, StoreError> {
        validate_embedding_values(values)?;
        let plaintext = embedding_to_bytes(values);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt an embedding blob produced by [`encrypt_embedding`](Self::encrypt_embedding).
    fn decrypt_embedding(&self, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;

        bytes_to_embedding(&plaintext)
    }
}

// ── Key management ────────────────────────────────────────────────────────────

/// Load the encryption key from disk, or generate and persist a new one.
/// Written with mode 0600 (owner-readable only).
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    if key_path.exists() {
        let bytes = std::fs::read(key_path).map_err(StoreError::KeyIo)?;
        if bytes.len() != 32 {
            return Err(StoreError::KeyIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "encryption key file has wrong length ({} bytes, expected 32)",
                    bytes.len()
                ),
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        tracing::debug!(path = %key_path.display(), "loaded encryption key");
        Ok(key)
    } else {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(key_path)
            .map_err(StoreError::KeyIo)?;
        f.write_all(&key).map_err(StoreError::KeyIo)?;

        tracing::info!(path = %key_path.display(), "generated new AES-256 encryption key");
        Ok(key)
    }
}

// ── Serialization helpers ─────────────────────────────────────────────────────

fn embedding_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() != EMBEDDING_BYTE_LEN {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }

    let mut values = Vec::with_capacity(EMBEDDING_DIM);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk
            .try_into()
            .map_err(|_| StoreError::InvalidBlob(bytes.len()))?;
        let v = f32::from_le_bytes(arr);
        if !v.is_finite() {
            return Err(StoreError::InvalidEmbeddingValue);
        }
        values.push(v);
    }

    Ok(values)
}

fn validate_embedding_values(values: &[f32]) -> Result<(), StoreError> {
    if values.len() != EMBEDDING_DIM {
        return Err(StoreError::InvalidEmbeddingDim(values.len()));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidEmbeddingValue);
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(fill: impl Fn(usize) -> f32) -> Embedding {
        Embedding {
            values: (0..EMBEDDING_DIM).map(fill).collect(),
            model_version: Some("w600k_r50".to_string()),
        }
    }

    #[tokio::test]
    async fn test_baseline_roundtrip() {
        let store = ProctorStore::open(Path::new(":memory:")).await.unwrap();
        let emb = embedding(|i| i as f32 / EMBEDDING_DIM as f32);

        store
            .save_baseline(7, &emb, Some("media/7_ref.jpg".to_string()))
            .await
            .unwrap();

        let loaded = store.baseline(7).await.unwrap().unwrap();
        assert_eq!(loaded.values, emb.values);
        assert_eq!(loaded.model_version.as_deref(), Some("w600k_r50"));
    }

    #[tokio::test]
    async fn test_baseline_missing_is_none() {
        let store = ProctorStore::open(Path::new(":memory:")).await.unwrap();
        assert!(store.baseline(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_baseline() {
        let store = ProctorStore::open(Path::new(":memory:")).await.unwrap();

        store
            .save_baseline(7, &embedding(|_| 0.25), None)
            .await
            .unwrap();
        store
            .save_baseline(7, &embedding(|_| 0.75), None)
            .await
            .unwrap();

        let loaded = store.baseline(7).await.unwrap().unwrap();
        assert!(loaded.values.iter().all(|&v| (v - 0.75).abs() < 1e-6));
        assert_eq!(store.baseline_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_alert_log_append_and_query() {
        let store = ProctorStore::open(Path::new(":memory:")).await.unwrap();

        store
            .append_alert(1, 10, "sess-a", AlertKind::NoFace, "Face not detected.")
            .await
            .unwrap();
        store
            .append_alert(2, 10, "sess-b", AlertKind::MultiFace, "Multiple faces detected.")
            .await
            .unwrap();
        store
            .append_alert(1, 11, "sess-c", AlertKind::NoFace, "Face not detected.")
            .await
            .unwrap();

        let alerts = store.recent_alerts(10, 50).await.unwrap();
        assert_eq!(alerts.len(), 2);
        // Newest first
        assert_eq!(alerts[0].kind, "multi_face");
        assert_eq!(alerts[0].user_id, 2);
        assert_eq!(alerts[1].kind, "no_face");
        assert!(alerts.iter().all(|a| a.exam_id == 10));
    }

    #[tokio::test]
    async fn test_alert_log_limit() {
        let store = ProctorStore::open(Path::new(":memory:")).await.unwrap();
        for i in 0..5 {
            store
                .append_alert(1, 10, &format!("sess-{i}"), AlertKind::NoFace, "m")
                .await
                .unwrap();
        }
        let alerts = store.recent_alerts(10, 2).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].id > alerts[1].id);
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimension() {
        let store = ProctorStore::open(Path::new(":memory:")).await.unwrap();
        let emb = Embedding {
            values: vec![0.5; 128],
            model_version: None,
        };
        let err = store.save_baseline(1, &emb, None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmbeddingDim(128)));
    }

    #[tokio::test]
    async fn test_rejects_non_finite_values() {
        let store = ProctorStore::open(Path::new(":memory:")).await.unwrap();
        let mut emb = embedding(|_| 0.5);
        emb.values[42] = f32::NAN;
        let err = store.save_baseline(1, &emb, None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmbeddingValue));
    }

    #[tokio::test]
    async fn test_wrong_key_fails_decryption() {
        let store1 = ProctorStore {
            conn: Connection::open(Path::new(":memory:")).await.unwrap(),
            enc_key: [1u8; 32],
        };
        let store2 = ProctorStore {
            conn: store1.conn.clone(),
            enc_key: [2u8; 32],
        };

        let blob = store1
            .encrypt_embedding(&embedding(|i| i as f32).values)
            .unwrap();
        assert!(store2.decrypt_embedding(&blob).is_err());
    }

    #[tokio::test]
    async fn test_blob_bit_fidelity() {
        let store = ProctorStore::open(Path::new(":memory:")).await.unwrap();
        let mut emb = embedding(|_| 0.5);
        emb.values[0] = 0.0;
        emb.values[1] = -0.0;
        emb.values[2] = f32::MIN_POSITIVE;
        emb.values[3] = std::f32::consts::PI;

        let blob = store.encrypt_embedding(&emb.values).unwrap();
        let recovered = store.decrypt_embedding(&blob).unwrap();
        for (orig, rec) in emb.values.iter().zip(recovered.iter()) {
            assert_eq!(orig.to_bits(), rec.to_bits());
        }
    }

    #[tokio::test]
    async fn test_truncated_blob_rejected() {
        let store = ProctorStore::open(Path::new(":memory:")).await.unwrap();
        let err = store.decrypt_embedding(&[0u8; 8]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidBlob(8)));
    }
}
