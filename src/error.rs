//! Error types for superscaler operations.
//!
//! Defines the error taxonomy shared by the pipeline:
//! - Configuration-fatal, resource-exhaustion-fatal and user-abort failures that end the run
//! - Process spawn failures
//! - Configuration loading and validation
//! - Filesystem errors

use std::path::PathBuf;

use thiserror::Error;

pub use crate::pipeline::config::ConfigError;

/// Errors that can occur while driving the enhancement pipeline.
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("Enhancement tool executable not found: {}", path.display())]
    ToolMissing { path: PathBuf },

    #[error(
        "Could not convert '{}': batch and split options exhausted (last exit code {exit_code})",
        input.display()
    )]
    ResourcesExhausted { input: PathBuf, exit_code: i32 },

    #[error("Aborted by user while '{program}' was running")]
    Aborted { program: String },

    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScalerError {
    /// Returns true for the failures that terminate the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScalerError::ToolMissing { .. }
                | ScalerError::ResourcesExhausted { .. }
                | ScalerError::Aborted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let missing = ScalerError::ToolMissing {
            path: PathBuf::from("/opt/waifu2x/waifu2x-caffe-cui"),
        };
        assert!(missing.is_fatal());
        assert!(missing.to_string().contains("waifu2x-caffe-cui"));

        let exhausted = ScalerError::ResourcesExhausted {
            input: PathBuf::from("page_01.png"),
            exit_code: -1,
        };
        assert!(exhausted.is_fatal());
        assert!(exhausted.to_string().contains("page_01.png"));
        assert!(exhausted.to_string().contains("-1"));

        let aborted = ScalerError::Aborted {
            program: "waifu2x-caffe-cui".to_string(),
        };
        assert!(aborted.is_fatal());

        let io = ScalerError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!io.is_fatal());
    }
}
