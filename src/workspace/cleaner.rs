//! Best-effort cleanup of run artifacts.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, info, warn};

/// File name prefix of the enhancement tool's error logs.
pub const ERROR_LOG_PREFIX: &str = "error_log_";

/// Deletes one intermediate file. Missing files count as removed.
pub async fn remove_file(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed intermediate file");
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove intermediate file");
            false
        }
    }
}

/// Removes the temp directory and everything in it.
pub async fn remove_temp_dir(dir: &Path) -> bool {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            info!(dir = %dir.display(), "Temp directory removed");
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to remove temp directory");
            false
        }
    }
}

/// Deletes `error_log_*` files directly inside `dir`. Returns how many were removed.
pub async fn delete_error_logs(dir: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to list error logs");
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to list error logs");
                break;
            }
        };

        let is_log = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(ERROR_LOG_PREFIX));
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_log || !is_file {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to delete error log");
            }
        }
    }

    if removed > 0 {
        info!(count = removed, "Deleted error logs");
    }
    removed
}
