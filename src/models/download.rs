//! Model storage and download.
//!
//! Models live in `~/.cache/voxrelay/models/` (`$XDG_CACHE_HOME` is honored).

use crate::error::{Result, VoxrelayError};
use crate::models::catalog::{get_model, model_names};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory where models are stored.
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("voxrelay")
        .join("models")
}

/// Path a model would have once installed. The file may not exist.
pub fn model_path(name: &str) -> PathBuf {
    models_dir().join(format!("ggml-{name}.bin"))
}

/// Path of an installed model, if present.
pub fn cached_model_path(name: &str) -> Option<PathBuf> {
    let path = model_path(name);
    path.is_file().then_some(path)
}

pub fn is_model_installed(name: &str) -> bool {
    cached_model_path(name).is_some()
}

/// Installed model names, sorted. Any `ggml-*.bin` file counts.
pub fn list_installed_models() -> Vec<String> {
    let entries = match fs::read_dir(models_dir()) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let file_name = entry.file_name();
            let model = file_name.to_str()?.strip_prefix("ggml-")?.strip_suffix(".bin")?;
            entry.path().is_file().then(|| model.to_string())
        })
        .collect();
    names.sort();
    names
}

/// Turns a `--model` value into a model file.
///
/// An existing file path is used as is. A catalog name resolves to the cache,
/// downloading it first when `allow_download` is set.
///
/// # Errors
/// `ModelNotFound` when the model is neither a file nor installed and
/// downloading is disabled, `Download` when fetching fails.
pub async fn resolve_model(spec: &str, allow_download: bool) -> Result<PathBuf> {
    let as_path = Path::new(spec);
    if as_path.is_file() {
        return Ok(as_path.to_path_buf());
    }
    if let Some(path) = cached_model_path(spec) {
        return Ok(path);
    }
    if get_model(spec).is_none() {
        return Err(VoxrelayError::ModelNotFound {
            path: format!("{spec} (known models: {})", model_names().join(", ")),
        });
    }
    if !allow_download {
        return Err(VoxrelayError::ModelNotFound {
            path: model_path(spec).display().to_string(),
        });
    }
    download_model(spec, true).await
}

/// Downloads a catalog model into the cache and verifies its SHA-1.
///
/// # Errors
/// `Download` for unknown models, HTTP failures and checksum mismatches.
#[cfg(feature = "model-download")]
pub async fn download_model(name: &str, progress: bool) -> Result<PathBuf> {
    let info = get_model(name).ok_or_else(|| VoxrelayError::Download {
        message: format!("unknown model '{name}'"),
    })?;
    let path = model_path(name);
    if path.is_file() {
        return Ok(path);
    }

    download_to_path(&info.url(), info.sha1, info.size_mb, &path, progress).await?;
    Ok(path)
}

#[cfg(not(feature = "model-download"))]
pub async fn download_model(name: &str, _progress: bool) -> Result<PathBuf> {
    Err(VoxrelayError::Download {
        message: format!("built without download support; place ggml-{name}.bin in {}", models_dir().display()),
    })
}

#[cfg(feature = "model-download")]
async fn download_to_path(url: &str, sha1: &str, size_mb: u32, output_path: &Path, progress: bool) -> Result<()> {
    use futures_util::StreamExt;
    use indicatif::{ProgressBar, ProgressStyle};
    use sha1::{Digest, Sha1};
    use std::io::Write;

    let download_error = |message: String| VoxrelayError::Download { message };

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }

    tracing::info!(url, size_mb, "downloading model");
    let response = reqwest::Client::new()
        .get(url)
        .send()
        .await
        .map_err(|e| download_error(format!("failed to start download: {e}")))?;
    if !response.status().is_success() {
        return Err(download_error(format!("download failed with status {}", response.status())));
    }

    let pb = if progress {
        let pb = ProgressBar::new(response.content_length().unwrap_or(0));
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    } else {
        None
    };

    // Stream into a temporary file so an interrupted download never looks installed.
    let partial = output_path.with_extension("bin.part");
    let mut file = fs::File::create(&partial)?;
    let mut hasher = Sha1::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| download_error(format!("failed to read download chunk: {e}")))?;
        file.write_all(&chunk)?;
        hasher.update(&chunk);
        if let Some(pb) = &pb {
            pb.inc(chunk.len() as u64);
        }
    }
    file.flush()?;
    drop(file);

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let calculated = format!("{:x}", hasher.finalize());
    if calculated != sha1 {
        if let Err(e) = fs::remove_file(&partial) {
            tracing::warn!("failed to remove corrupted download: {e}");
        }
        return Err(download_error(format!(
            "SHA-1 checksum mismatch. Expected: {sha1}, got: {calculated}"
        )));
    }

    fs::rename(&partial, output_path)?;
    tracing::info!(path = %output_path.display(), "model installed");
    Ok(())
}
