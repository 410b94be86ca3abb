//! File operations inside a volume directory.
//!
//! Paths are given relative to the volume root, with or without a leading
//! `/`. Failures are logged and returned; they never affect the volume.

use crate::error::{VolumeError, VolumeResult};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Resolves a volume path against the volume directory. Paths that would
/// leave the directory are rejected.
pub fn resolve(directory: &Path, path_in_volume: &str) -> VolumeResult<PathBuf> {
    let relative = Path::new(path_in_volume.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(VolumeError::filesystem(
            directory.join(relative),
            io::Error::new(io::ErrorKind::InvalidInput, "path leaves the volume"),
        ));
    }
    Ok(directory.join(relative))
}

/// Writes `content` to a file, creating parent directories.
pub async fn write_file(
    directory: &Path,
    path_in_volume: &str,
    content: impl AsRef<[u8]>,
) -> VolumeResult<PathBuf> {
    let target = resolve(directory, path_in_volume).inspect_err(log_failure)?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| VolumeError::filesystem(parent, e))
            .inspect_err(log_failure)?;
    }
    tokio::fs::write(&target, content)
        .await
        .map_err(|e| VolumeError::filesystem(&target, e))
        .inspect_err(log_failure)?;
    debug!("Wrote {}", target.display());
    Ok(target)
}

/// Overwrites a file. Parent directories must already exist.
pub async fn update_file(
    directory: &Path,
    path_in_volume: &str,
    content: impl AsRef<[u8]>,
) -> VolumeResult<PathBuf> {
    let target = resolve(directory, path_in_volume).inspect_err(log_failure)?;
    tokio::fs::write(&target, content)
        .await
        .map_err(|e| VolumeError::filesystem(&target, e))
        .inspect_err(log_failure)?;
    debug!("Updated {}", target.display());
    Ok(target)
}

/// Copies `source` into the volume, creating parent directories.
pub async fn copy_file(
    directory: &Path,
    path_in_volume: &str,
    source: &Path,
) -> VolumeResult<PathBuf> {
    let target = resolve(directory, path_in_volume).inspect_err(log_failure)?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| VolumeError::filesystem(parent, e))
            .inspect_err(log_failure)?;
    }
    tokio::fs::copy(source, &target)
        .await
        .map_err(|e| VolumeError::filesystem(source, e))
        .inspect_err(log_failure)?;
    debug!("Copied {} to {}", source.display(), target.display());
    Ok(target)
}

fn log_failure(err: &VolumeError) {
    warn!("File operation failed: {}", err);
}
