//! A single optimization job.
//!
//! Files that still live in the source tree (pass-through images) are first
//! written to their mirrored destination path as PNG, so the optimizer never
//! rewrites the user's originals. PNG sources are copied byte for byte; other
//! formats are decoded and re-encoded. Everything else is optimized in place.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::pipeline::config::FILE_PLACEHOLDER;
use crate::pipeline::planner::{normalize_output_path, StagePaths, OUTPUT_EXTENSION};

/// Errors from one optimization job. Never fatal to the run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to copy '{}' to '{}': {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to convert '{}' to '{}': {source}", from.display(), to.display())]
    Convert {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to launch optimizer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Optimizer exited with code {code} for '{}': {stderr}", path.display())]
    NonZeroExit {
        path: PathBuf,
        code: i32,
        stderr: String,
    },
}

/// How to run the optimizer on one file.
#[derive(Debug, Clone)]
pub struct OptimizerCommand {
    pub executable: String,
    pub args: Vec<String>,
    /// Maps source-tree files to their destination mirror. `None` optimizes everything in place.
    pub paths: Option<StagePaths>,
}

impl OptimizerCommand {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
            paths: None,
        }
    }

    pub fn with_paths(mut self, paths: StagePaths) -> Self {
        self.paths = Some(paths);
        self
    }

    /// File the optimizer should rewrite for `path`.
    pub fn target_for(&self, path: &Path) -> PathBuf {
        match &self.paths {
            Some(paths) if path.starts_with(paths.source_root()) => {
                normalize_output_path(&paths.destination_mirror(path))
            }
            _ => path.to_path_buf(),
        }
    }

    /// Arguments with the placeholder replaced by `target`.
    pub fn args_for(&self, target: &Path) -> Vec<String> {
        let target = target.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(FILE_PLACEHOLDER, &target))
            .collect()
    }
}

/// Outcome of a successful job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub target: PathBuf,
    pub duration: Duration,
}

/// Optimizes `path`, copying it out of the source tree first if needed.
pub async fn run_job(command: &OptimizerCommand, path: &Path) -> Result<JobReport, JobError> {
    let start = Instant::now();
    let target = command.target_for(path);

    if target != path {
        stage_pass_through(path, &target).await?;
    }

    let output = tokio::process::Command::new(&command.executable)
        .args(command.args_for(&target))
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| JobError::Spawn {
            program: command.executable.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(JobError::NonZeroExit {
            path: target,
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(JobReport {
        target,
        duration: start.elapsed(),
    })
}

fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(OUTPUT_EXTENSION))
}

/// Writes the source file `from` to `to` as PNG.
async fn stage_pass_through(from: &Path, to: &Path) -> Result<(), JobError> {
    let copy_error = |source| JobError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(copy_error)?;
    }

    if is_png(from) {
        tokio::fs::copy(from, to).await.map_err(copy_error)?;
        debug!(from = %from.display(), to = %to.display(), "Copied pass-through image");
        return Ok(());
    }

    let (src, dst) = (from.to_path_buf(), to.to_path_buf());
    tokio::task::spawn_blocking(move || {
        image::open(&src)?.save_with_format(&dst, image::ImageFormat::Png)
    })
    .await
    .unwrap_or_else(|join| Err(image::ImageError::IoError(std::io::Error::other(join))))
    .map_err(|source| JobError::Convert {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    debug!(from = %from.display(), to = %to.display(), "Converted pass-through image to PNG");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn command(temp: &TempDir) -> OptimizerCommand {
        let root = temp.path();
        OptimizerCommand::new(
            "oxipng",
            vec!["-o".to_string(), "4".to_string(), FILE_PLACEHOLDER.to_string()],
        )
        .with_paths(StagePaths::new(
            root.join("Source"),
            root.join("Temp"),
            root.join("Destination"),
        ))
    }

    #[test]
    fn test_source_files_target_destination_mirror() {
        let temp = TempDir::new().unwrap();
        let cmd = command(&temp);
        let original = temp.path().join("Source/ch1/tiny.gif");

        assert_eq!(
            cmd.target_for(&original),
            temp.path().join("Destination/ch1/tiny.png")
        );
    }

    #[test]
    fn test_destination_files_optimized_in_place() {
        let temp = TempDir::new().unwrap();
        let cmd = command(&temp);
        let scaled = temp.path().join("Destination/ch1/page.png");
        assert_eq!(cmd.target_for(&scaled), scaled);

        let unmapped = OptimizerCommand::new("oxipng", Vec::new());
        assert_eq!(unmapped.target_for(&scaled), scaled);
    }

    #[test]
    fn test_args_replace_placeholder() {
        let temp = TempDir::new().unwrap();
        let cmd = command(&temp);
        let args = cmd.args_for(Path::new("/d/page.png"));
        assert_eq!(args, vec!["-o", "4", "/d/page.png"]);
    }

    #[tokio::test]
    async fn test_missing_optimizer_is_spawn_error() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("page.png");
        std::fs::write(&file, b"png").unwrap();

        let cmd = OptimizerCommand::new(
            "superscaler-test-no-such-optimizer",
            vec![FILE_PLACEHOLDER.to_string()],
        );
        let err = run_job(&cmd, &file).await.unwrap_err();
        assert!(matches!(err, JobError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_pass_through_copied_before_optimizing() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("Source/tiny.png");
        std::fs::create_dir_all(original.parent().unwrap()).unwrap();
        std::fs::write(&original, b"png").unwrap();

        let mut cmd = command(&temp);
        cmd.executable = "superscaler-test-no-such-optimizer".to_string();

        // The copy happens even though the optimizer itself cannot start.
        let _ = run_job(&cmd, &original).await;
        let copied = temp.path().join("Destination/tiny.png");
        assert_eq!(std::fs::read(&copied).unwrap(), b"png");
        assert_eq!(std::fs::read(&original).unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_pass_through_jpeg_converted_to_png() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("Source/ch1/tiny.jpg");
        std::fs::create_dir_all(original.parent().unwrap()).unwrap();
        image::RgbImage::from_pixel(3, 2, image::Rgb([200, 40, 40]))
            .save(&original)
            .unwrap();

        let mut cmd = command(&temp);
        cmd.executable = "superscaler-test-no-such-optimizer".to_string();

        let err = run_job(&cmd, &original).await.unwrap_err();
        assert!(matches!(err, JobError::Spawn { .. }));

        let converted = temp.path().join("Destination/ch1/tiny.png");
        let bytes = std::fs::read(&converted).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Png);
        assert_eq!(image::image_dimensions(&converted).unwrap(), (3, 2));
        assert!(!temp.path().join("Destination/ch1/tiny.jpg").exists());
        assert!(original.exists());
    }

    #[tokio::test]
    async fn test_undecodable_pass_through_is_convert_error() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("Source/broken.bmp");
        std::fs::create_dir_all(original.parent().unwrap()).unwrap();
        std::fs::write(&original, b"not a bitmap").unwrap();

        let err = run_job(&command(&temp), &original).await.unwrap_err();

        assert!(matches!(err, JobError::Convert { .. }));
        assert!(err.to_string().contains("broken.bmp"));
    }

    #[test]
    fn test_is_png_ignores_case() {
        assert!(is_png(Path::new("a/B.PNG")));
        assert!(!is_png(Path::new("a/b.jpg")));
        assert!(!is_png(Path::new("a/png")));
    }
}
