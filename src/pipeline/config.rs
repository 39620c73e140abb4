//! Pipeline configuration.
//!
//! Covers folder layout, the enhancement tool invocation, the optimizer pool
//! and the polling cadence. Values come from defaults, an optional YAML file
//! and `SUPERSCALER_*` environment variables, in that order of priority.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(windows)]
const DEFAULT_TOOL_EXECUTABLE: &str = "waifu2x-caffe-cui.exe";
#[cfg(not(windows))]
const DEFAULT_TOOL_EXECUTABLE: &str = "waifu2x-caffe-cui";

/// Placeholder in `optimizer_args` replaced by the file being optimized.
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Configuration for a superscaler run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    // Folder layout
    /// Root holding the source, temp and destination folders.
    /// Falls back to the current directory when unset or missing.
    pub base_dir: Option<PathBuf>,
    /// Source folder name under the root.
    pub source_folder: String,
    /// Temporary folder name under the root.
    pub temp_folder: String,
    /// Destination folder name under the root.
    pub destination_folder: String,

    // Enhancement tool
    /// Directory containing the enhancement tool.
    pub tool_dir: PathBuf,
    /// Executable name inside `tool_dir`.
    pub tool_executable: String,
    /// Model directory, relative to `tool_dir`.
    pub model_dir: PathBuf,
    /// GPU device index.
    pub gpu: u32,
    /// Processor mode passed to the tool (`cudnn`, `gpu`, `cpu`).
    pub processor: String,
    /// Crop depth passed to the tool.
    pub crop_depth: u32,
    /// Denoise level passed to the tool.
    pub denoise_level: u32,
    /// Conversion mode passed to the tool.
    pub conversion_mode: String,

    // Optimizer
    /// Optimizer executable, resolved through PATH when not absolute.
    pub optimizer_executable: String,
    /// Optimizer arguments; `{file}` is replaced by the target path.
    pub optimizer_args: Vec<String>,
    /// Maximum number of optimizer processes in flight.
    pub optimizer_threads: usize,

    // Scheduling
    /// Delay between readiness polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Delay between progress log lines, in milliseconds.
    pub progress_interval_ms: u64,
    /// Whether to listen on stdin / Ctrl-C for a cancellation request.
    pub listen_for_cancel: bool,

    // Cleanup
    /// Delete `error_log_*` files in the root directory at shutdown.
    pub delete_error_logs: bool,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            source_folder: "Source".to_string(),
            temp_folder: "Temp".to_string(),
            destination_folder: "Destination".to_string(),

            tool_dir: PathBuf::from("waifu2x-caffe"),
            tool_executable: DEFAULT_TOOL_EXECUTABLE.to_string(),
            model_dir: PathBuf::from("models/upconv_7_anime_style_art_rgb"),
            gpu: 0,
            processor: "cudnn".to_string(),
            crop_depth: 8,
            denoise_level: 1,
            conversion_mode: "noise_scale".to_string(),

            optimizer_executable: "oxipng".to_string(),
            optimizer_args: ["-o", "4", "--strip", "safe", FILE_PLACEHOLDER]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            optimizer_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),

            poll_interval_ms: 100,
            progress_interval_ms: 2000,
            listen_for_cancel: true,

            delete_error_logs: false,
        }
    }
}

impl ScalerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration file; keys not present keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Creates configuration from defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays environment variables onto this configuration.
    ///
    /// # Environment Variables
    ///
    /// - `SUPERSCALER_BASE_DIR`: root directory
    /// - `SUPERSCALER_SOURCE_FOLDER`, `SUPERSCALER_TEMP_FOLDER`,
    ///   `SUPERSCALER_DESTINATION_FOLDER`: folder names
    /// - `SUPERSCALER_TOOL_DIR`, `SUPERSCALER_TOOL_EXECUTABLE`, `SUPERSCALER_MODEL_DIR`
    /// - `SUPERSCALER_GPU`, `SUPERSCALER_PROCESSOR`, `SUPERSCALER_DENOISE_LEVEL`,
    ///   `SUPERSCALER_CONVERSION_MODE`
    /// - `SUPERSCALER_OPTIMIZER`, `SUPERSCALER_OPTIMIZER_THREADS`
    /// - `SUPERSCALER_POLL_INTERVAL_MS`, `SUPERSCALER_PROGRESS_INTERVAL_MS`
    /// - `SUPERSCALER_DELETE_ERROR_LOGS`
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("SUPERSCALER_BASE_DIR") {
            self.base_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("SUPERSCALER_SOURCE_FOLDER") {
            self.source_folder = val;
        }
        if let Ok(val) = std::env::var("SUPERSCALER_TEMP_FOLDER") {
            self.temp_folder = val;
        }
        if let Ok(val) = std::env::var("SUPERSCALER_DESTINATION_FOLDER") {
            self.destination_folder = val;
        }

        if let Ok(val) = std::env::var("SUPERSCALER_TOOL_DIR") {
            self.tool_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SUPERSCALER_TOOL_EXECUTABLE") {
            self.tool_executable = val;
        }
        if let Ok(val) = std::env::var("SUPERSCALER_MODEL_DIR") {
            self.model_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SUPERSCALER_GPU") {
            self.gpu = parse_env_value(&val, "SUPERSCALER_GPU")?;
        }
        if let Ok(val) = std::env::var("SUPERSCALER_PROCESSOR") {
            self.processor = val;
        }
        if let Ok(val) = std::env::var("SUPERSCALER_DENOISE_LEVEL") {
            self.denoise_level = parse_env_value(&val, "SUPERSCALER_DENOISE_LEVEL")?;
        }
        if let Ok(val) = std::env::var("SUPERSCALER_CONVERSION_MODE") {
            self.conversion_mode = val;
        }

        if let Ok(val) = std::env::var("SUPERSCALER_OPTIMIZER") {
            self.optimizer_executable = val;
        }
        if let Ok(val) = std::env::var("SUPERSCALER_OPTIMIZER_THREADS") {
            self.optimizer_threads = parse_env_value(&val, "SUPERSCALER_OPTIMIZER_THREADS")?;
        }

        if let Ok(val) = std::env::var("SUPERSCALER_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_env_value(&val, "SUPERSCALER_POLL_INTERVAL_MS")?;
        }
        if let Ok(val) = std::env::var("SUPERSCALER_PROGRESS_INTERVAL_MS") {
            self.progress_interval_ms =
                parse_env_value(&val, "SUPERSCALER_PROGRESS_INTERVAL_MS")?;
        }

        if let Ok(val) = std::env::var("SUPERSCALER_DELETE_ERROR_LOGS") {
            self.delete_error_logs = parse_env_bool(&val, "SUPERSCALER_DELETE_ERROR_LOGS")?;
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("source_folder", &self.source_folder),
            ("temp_folder", &self.temp_folder),
            ("destination_folder", &self.destination_folder),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        // The temp tree is deleted at shutdown, so no folder may contain another.
        let folders = [
            ("source_folder", &self.source_folder),
            ("temp_folder", &self.temp_folder),
            ("destination_folder", &self.destination_folder),
        ];
        for (i, (name, value)) in folders.iter().enumerate() {
            for (other_name, other) in &folders[i + 1..] {
                if folders_overlap(value, other) {
                    return Err(ConfigError::ValidationFailed(format!(
                        "{} and {} must be separate folders (got '{}' and '{}')",
                        name, other_name, value, other
                    )));
                }
            }
        }

        if self.tool_executable.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "tool_executable cannot be empty".to_string(),
            ));
        }

        if self.optimizer_executable.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "optimizer_executable cannot be empty".to_string(),
            ));
        }

        if self.optimizer_threads == 0 {
            return Err(ConfigError::ValidationFailed(
                "optimizer_threads must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.progress_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "progress_interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Root directory: `base_dir` when it exists, otherwise the current directory.
    pub fn root_dir(&self) -> PathBuf {
        match &self.base_dir {
            Some(dir) if dir.is_dir() => dir.clone(),
            _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root_dir().join(&self.source_folder)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root_dir().join(&self.temp_folder)
    }

    pub fn destination_dir(&self) -> PathBuf {
        self.root_dir().join(&self.destination_folder)
    }

    /// Full path of the enhancement tool executable.
    pub fn tool_path(&self) -> PathBuf {
        self.tool_dir.join(&self.tool_executable)
    }

    /// Full path of the model directory handed to the tool.
    pub fn model_path(&self) -> PathBuf {
        self.tool_dir.join(&self.model_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Builder method to set the root directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Builder method to set the source folder name.
    pub fn with_source_folder(mut self, name: impl Into<String>) -> Self {
        self.source_folder = name.into();
        self
    }

    /// Builder method to set the temp folder name.
    pub fn with_temp_folder(mut self, name: impl Into<String>) -> Self {
        self.temp_folder = name.into();
        self
    }

    /// Builder method to set the destination folder name.
    pub fn with_destination_folder(mut self, name: impl Into<String>) -> Self {
        self.destination_folder = name.into();
        self
    }

    /// Builder method to set the tool directory.
    pub fn with_tool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tool_dir = dir.into();
        self
    }

    /// Builder method to set the tool executable name.
    pub fn with_tool_executable(mut self, name: impl Into<String>) -> Self {
        self.tool_executable = name.into();
        self
    }

    /// Builder method to set the denoise level.
    pub fn with_denoise_level(mut self, level: u32) -> Self {
        self.denoise_level = level;
        self
    }

    /// Builder method to set the optimizer executable.
    pub fn with_optimizer(mut self, executable: impl Into<String>) -> Self {
        self.optimizer_executable = executable.into();
        self
    }

    /// Builder method to set the optimizer thread count.
    pub fn with_optimizer_threads(mut self, threads: usize) -> Self {
        self.optimizer_threads = threads;
        self
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method to enable or disable the cancellation listener.
    pub fn with_cancel_listener(mut self, enabled: bool) -> Self {
        self.listen_for_cancel = enabled;
        self
    }

    /// Builder method to enable or disable error log deletion.
    pub fn with_delete_error_logs(mut self, enabled: bool) -> Self {
        self.delete_error_logs = enabled;
        self
    }
}

/// Whether one folder name equals or contains the other.
fn folders_overlap(a: &str, b: &str) -> bool {
    let normalize = |name: &str| -> PathBuf {
        Path::new(name.trim())
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    };
    let (a, b) = (normalize(a), normalize(b));
    a.starts_with(&b) || b.starts_with(&a)
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
