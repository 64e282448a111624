//! `invigil setup` — downloads the ONNX models the daemon needs.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use invigil_models::{file_digest, ModelAsset, MODEL_ASSETS};

/// Determine the model directory.
///
/// Root installs system-wide under `/var/lib/invigil/models`; everyone
/// else gets `$XDG_DATA_HOME/invigil/models`.
fn default_model_dir() -> PathBuf {
    if is_root() {
        PathBuf::from("/var/lib/invigil/models")
    } else {
        let data_home = std::env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.local/share")
        });
        PathBuf::from(data_home).join("invigil/models")
    }
}

fn is_root() -> bool {
    // SAFETY: geteuid is always safe to call.
    unsafe { libc::geteuid() == 0 }
}

/// Download one model to a temp file, verify its checksum, then rename
/// into place atomically.
fn download_asset(asset: &ModelAsset, dest: &Path) -> Result<()> {
    let tmp_path = dest.with_extension("onnx.part");

    println!("  downloading {} ({})...", asset.file_name, asset.size_display);

    let resp = ureq::get(asset.url)
        .call()
        .with_context(|| format!("failed to download {}", asset.url))?;

    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut buf = [0u8; 65536];
    let mut total: u64 = 0;
    let mut last_pct: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;

        if let Some(len) = content_length {
            let pct = (total * 100) / len.max(1);
            if pct / 10 > last_pct / 10 {
                print!("  {pct}%\r");
                io::stdout().flush().ok();
                last_pct = pct;
            }
        }
    }

    file.flush()?;
    drop(file);

    print!("  verifying checksum... ");
    io::stdout().flush().ok();
    let digest = file_digest(&tmp_path)?;
    if digest != asset.sha256 {
        fs::remove_file(&tmp_path).ok();
        bail!(
            "checksum mismatch for {}:\n  expected: {}\n  got:      {}",
            asset.file_name,
            asset.sha256,
            digest
        );
    }
    println!("ok");

    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    Ok(())
}

/// Run the setup command: download and verify the ONNX models.
pub fn run(model_dir: Option<String>) -> Result<()> {
    let dir = match model_dir {
        Some(d) => PathBuf::from(d),
        None => default_model_dir(),
    };

    println!("Model directory: {}", dir.display());

    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let mut downloaded = 0;
    let mut present = 0;

    for asset in MODEL_ASSETS {
        match invigil_models::verify_asset(asset, &dir) {
            Ok(()) => {
                println!("  {} already present (checksum ok)", asset.file_name);
                present += 1;
                continue;
            }
            Err(invigil_models::ModelError::Missing { .. }) => {}
            Err(err) => {
                println!("  {}: {err} — re-downloading", asset.file_name);
            }
        }

        download_asset(asset, &dir.join(asset.file_name))?;
        downloaded += 1;
    }

    println!();
    if downloaded > 0 {
        println!("Setup complete: {downloaded} model(s) downloaded, {present} already present.");
    } else {
        println!("All models already present. Nothing to download.");
    }

    Ok(())
}
