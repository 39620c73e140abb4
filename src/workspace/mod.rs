//! Working directories of a run.
//!
//! The source, temp and destination folders live side by side under the
//! configured base directory. Nothing here is allowed to abort a run: every
//! failure is logged and reported through the return value.

pub mod cleaner;

use std::path::Path;

use tracing::{debug, warn};

pub use cleaner::{delete_error_logs, remove_file, remove_temp_dir, ERROR_LOG_PREFIX};

/// Creates `dir` (and parents) if absent. Returns whether it exists afterwards.
pub async fn ensure_dir(dir: &Path) -> bool {
    match tokio::fs::create_dir_all(dir).await {
        Ok(()) => {
            debug!(dir = %dir.display(), "Directory ready");
            true
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to create directory");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ensure_dir_creates_nested() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a/b/c");

        assert!(ensure_dir(&nested).await);
        assert!(nested.is_dir());
        // Existing directories are fine.
        assert!(ensure_dir(&nested).await);
    }

    #[tokio::test]
    async fn test_ensure_dir_over_file_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();

        assert!(!ensure_dir(&file).await);
    }
}
