//! Manifest of the ONNX models the vision pipeline needs, with SHA-256
//! integrity verification for files already on disk.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the SCRFD detection model.
pub const DETECTOR_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model.
pub const EMBEDDER_FILE: &str = "w600k_r50.onnx";

/// One downloadable model file: name, source URL, expected checksum.
pub struct ModelAsset {
    pub file_name: &'static str,
    pub url: &'static str,
    pub sha256: &'static str,
    pub size_display: &'static str,
}

// Checksums taken from the HuggingFace Git LFS pointer files
// (oid sha256: field) at
// https://huggingface.co/public-data/insightface/raw/main/models/buffalo_l/
pub const MODEL_ASSETS: &[ModelAsset] = &[
    ModelAsset {
        file_name: DETECTOR_FILE,
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx",
        sha256: "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
        size_display: "16 MB",
    },
    ModelAsset {
        file_name: EMBEDDER_FILE,
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/w600k_r50.onnx",
        sha256: "4c06341c33c2ca1f86781dab0e829f88ad5b64be9fba56e56bc9ebdefc619e43",
        size_display: "166 MB",
    },
];

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file missing: {file_name} (looked at {path})")]
    Missing { file_name: String, path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch for {file_name}\n  expected: {expected}\n  actual:   {actual}")]
    DigestMismatch {
        file_name: String,
        expected: String,
        actual: String,
    },
}

/// SHA-256 hex digest of a file, streamed in 8 KiB chunks.
pub fn file_digest(path: &Path) -> Result<String, ModelError> {
    let mut file = fs::File::open(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check one asset in `dir` for presence and checksum.
pub fn verify_asset(asset: &ModelAsset, dir: &Path) -> Result<(), ModelError> {
    let path = dir.join(asset.file_name);
    if !path.exists() {
        return Err(ModelError::Missing {
            file_name: asset.file_name.to_string(),
            path,
        });
    }

    let actual = file_digest(&path)?;
    if actual != asset.sha256 {
        return Err(ModelError::DigestMismatch {
            file_name: asset.file_name.to_string(),
            expected: asset.sha256.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Verify every asset in the manifest; fails on the first problem.
pub fn verify_dir(dir: &Path) -> Result<(), ModelError> {
    for asset in MODEL_ASSETS {
        verify_asset(asset, dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "invigil-models-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn digest_matches_known_value() {
        let dir = scratch_dir("digest");
        let path = dir.join("blob");
        fs::write(&path, b"hello").unwrap();

        // sha256("hello")
        assert_eq!(
            file_digest(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_reports_missing_file() {
        let dir = scratch_dir("missing");
        let asset = ModelAsset {
            file_name: "absent.onnx",
            url: "",
            sha256: "00",
            size_display: "",
        };
        let err = verify_asset(&asset, &dir).unwrap_err();
        assert!(matches!(err, ModelError::Missing { .. }));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_reports_digest_mismatch() {
        let dir = scratch_dir("mismatch");
        fs::write(dir.join("model.onnx"), b"not the model").unwrap();

        let asset = ModelAsset {
            file_name: "model.onnx",
            url: "",
            sha256: "00",
            size_display: "",
        };
        let err = verify_asset(&asset, &dir).unwrap_err();
        assert!(matches!(err, ModelError::DigestMismatch { .. }));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_accepts_matching_digest() {
        let dir = scratch_dir("match");
        let path = dir.join("model.onnx");
        fs::write(&path, b"payload").unwrap();

        let digest = file_digest(&path).unwrap();
        let digest: &'static str = Box::leak(digest.into_boxed_str());
        let asset = ModelAsset {
            file_name: "model.onnx",
            url: "",
            sha256: digest,
            size_display: "",
        };
        verify_asset(&asset, &dir).unwrap();
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_dir_flags_empty_directory() {
        let dir = scratch_dir("dir");
        let err = verify_dir(&dir).unwrap_err();
        assert!(matches!(err, ModelError::Missing { .. }));
        let _ = fs::remove_dir_all(&dir);
    }
}
