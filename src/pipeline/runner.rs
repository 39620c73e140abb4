//! Adaptive execution of enhancement tool invocations.
//!
//! The enhancement tool is a black box keyed by exit code: a non-negative code
//! is success, a negative one means the device ran out of resources. On
//! failure the runner retries the same invocation with a smaller resource
//! budget, halving the batch size first and the split (tile) size once the
//! batch is down to 1. When both are 1 the image cannot be processed at all
//! and the run is aborted.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::ScalerError;

use super::cancel::CancelFlag;
use super::config::ScalerConfig;
use super::planner::{normalize_output_path, InvocationSpec, OUTPUT_EXTENSION};

/// One concrete launch of the enhancement tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub input: PathBuf,
    pub output: PathBuf,
    pub magnification: u32,
    pub batch: u32,
    pub split: u32,
}

/// Launches the external enhancement tool.
///
/// Implementations block (asynchronously) until the process exits and report
/// only its exit code.
#[async_trait]
pub trait ToolLauncher: Send + Sync {
    /// Path of the executable, used in diagnostics.
    fn program(&self) -> &Path;

    /// Whether the executable is present.
    fn is_available(&self) -> bool;

    /// Runs the tool once and returns its exit code.
    async fn launch(&self, invocation: &ToolInvocation) -> Result<i32, ScalerError>;
}

/// Batch and split values for a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBudget {
    pub batch: u32,
    pub split: u32,
}

/// Which parameter a retry reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Batch { from: u32, to: u32 },
    Split { from: u32, to: u32 },
}

impl ResourceBudget {
    pub fn from_spec(spec: &InvocationSpec) -> Self {
        Self {
            batch: spec.batch,
            split: spec.split,
        }
    }

    /// Next smaller budget, or `None` once both parameters are at 1.
    pub fn reduce(self) -> Option<(Reduction, ResourceBudget)> {
        if self.batch > 1 {
            let to = self.batch / 2;
            Some((
                Reduction::Batch {
                    from: self.batch,
                    to,
                },
                ResourceBudget { batch: to, ..self },
            ))
        } else if self.split > 1 {
            let to = self.split / 2;
            Some((
                Reduction::Split {
                    from: self.split,
                    to,
                },
                ResourceBudget { split: to, ..self },
            ))
        } else {
            None
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.batch <= 1 && self.split <= 1
    }
}

/// Result of running one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The tool produced `output`.
    Completed {
        output: PathBuf,
        attempts: u32,
        budget: ResourceBudget,
    },
    /// The stage input did not exist; nothing was produced.
    Skipped { missing_input: PathBuf },
}

impl StageOutcome {
    pub fn output(&self) -> Option<&Path> {
        match self {
            StageOutcome::Completed { output, .. } => Some(output),
            StageOutcome::Skipped { .. } => None,
        }
    }
}

/// Runs invocations through a [`ToolLauncher`], shrinking resources on failure.
pub struct AdaptiveRunner<L> {
    launcher: L,
}

impl<L: ToolLauncher> AdaptiveRunner<L> {
    pub fn new(launcher: L) -> Self {
        Self { launcher }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Runs `spec` on `input`, writing to `output` (extension normalized).
    ///
    /// # Errors
    ///
    /// - `ScalerError::ToolMissing` when the executable is absent.
    /// - `ScalerError::ResourcesExhausted` when the tool still fails at batch 1, split 1.
    /// - `ScalerError::Spawn` / `ScalerError::Io` for launch and filesystem failures.
    pub async fn run(
        &self,
        input: &Path,
        output: &Path,
        spec: &InvocationSpec,
    ) -> Result<StageOutcome, ScalerError> {
        if !self.launcher.is_available() {
            error!(
                program = %self.launcher.program().display(),
                "Enhancement tool executable not found"
            );
            return Err(ScalerError::ToolMissing {
                path: self.launcher.program().to_path_buf(),
            });
        }

        if !input.exists() {
            warn!(input = %input.display(), "No such file, skipping stage");
            return Ok(StageOutcome::Skipped {
                missing_input: input.to_path_buf(),
            });
        }

        let output = normalize_output_path(output);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut budget = ResourceBudget::from_spec(spec);
        let mut attempts = 0u32;
        let start = Instant::now();

        loop {
            attempts += 1;
            let invocation = ToolInvocation {
                input: input.to_path_buf(),
                output: output.clone(),
                magnification: spec.magnification,
                batch: budget.batch,
                split: budget.split,
            };

            debug!(
                input = %input.display(),
                output = %output.display(),
                magnification = spec.magnification,
                batch = budget.batch,
                split = budget.split,
                attempt = attempts,
                "Launching enhancement tool"
            );

            let exit_code = self.launcher.launch(&invocation).await?;
            if exit_code >= 0 {
                info!(
                    file = %file_name,
                    magnification = spec.magnification,
                    attempts = attempts,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Stage completed"
                );
                return Ok(StageOutcome::Completed {
                    output,
                    attempts,
                    budget,
                });
            }

            match budget.reduce() {
                Some((Reduction::Batch { from, to }, next)) => {
                    warn!(
                        file = %file_name,
                        exit_code = exit_code,
                        from = from,
                        to = to,
                        "Could not convert, reducing batch size"
                    );
                    budget = next;
                }
                Some((Reduction::Split { from, to }, next)) => {
                    warn!(
                        file = %file_name,
                        exit_code = exit_code,
                        from = from,
                        to = to,
                        "Could not convert, reducing split size"
                    );
                    budget = next;
                }
                None => {
                    error!(
                        file = %file_name,
                        exit_code = exit_code,
                        "Could not convert, split/batch options exhausted"
                    );
                    return Err(ScalerError::ResourcesExhausted {
                        input: input.to_path_buf(),
                        exit_code,
                    });
                }
            }
        }
    }
}

/// Launches waifu2x-caffe's command line interface.
#[derive(Debug, Clone)]
pub struct Waifu2xLauncher {
    executable: PathBuf,
    model_dir: PathBuf,
    gpu: u32,
    processor: String,
    crop_depth: u32,
    denoise_level: u32,
    conversion_mode: String,
    abort: Option<CancelFlag>,
}

impl Waifu2xLauncher {
    pub fn from_config(config: &ScalerConfig) -> Self {
        Self {
            executable: config.tool_path(),
            model_dir: config.model_path(),
            gpu: config.gpu,
            processor: config.processor.clone(),
            crop_depth: config.crop_depth,
            denoise_level: config.denoise_level,
            conversion_mode: config.conversion_mode.clone(),
            abort: None,
        }
    }

    /// Hands interrupt handling to `flag`: the tool runs in its own process
    /// group (Unix) so terminal interrupts never reach it, and it is killed
    /// once `flag` is forced.
    ///
    /// Without a flag the tool shares superscaler's process group and dies
    /// with it on Ctrl-C.
    pub fn with_abort_flag(mut self, flag: CancelFlag) -> Self {
        self.abort = Some(flag);
        self
    }

    /// Command-line arguments for one invocation.
    pub fn args(&self, invocation: &ToolInvocation) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(26);
        let mut push = |flag: &str, value: OsString| {
            args.push(flag.into());
            args.push(value);
        };

        push("--gpu", self.gpu.to_string().into());
        push("-b", invocation.batch.to_string().into());
        push("-c", invocation.split.to_string().into());
        push("-d", self.crop_depth.to_string().into());
        push("-p", self.processor.clone().into());
        push("--model_dir", self.model_dir.clone().into_os_string());
        push("-s", invocation.magnification.to_string().into());
        push("-n", self.denoise_level.to_string().into());
        push("-m", self.conversion_mode.clone().into());
        push("-e", format!(".{}", OUTPUT_EXTENSION).into());
        push("-l", OUTPUT_EXTENSION.into());
        push("-o", invocation.output.clone().into_os_string());
        push("-i", invocation.input.clone().into_os_string());

        args
    }
}

#[async_trait]
impl ToolLauncher for Waifu2xLauncher {
    fn program(&self) -> &Path {
        &self.executable
    }

    fn is_available(&self) -> bool {
        self.executable.is_file()
    }

    async fn launch(&self, invocation: &ToolInvocation) -> Result<i32, ScalerError> {
        let mut command = tokio::process::Command::new(&self.executable);
        command
            .args(self.args(invocation))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.abort.is_some() {
            detach_from_terminal(&mut command);
        }

        let child = command.spawn().map_err(|source| ScalerError::Spawn {
            program: self.executable.display().to_string(),
            source,
        })?;

        let forced = async {
            match &self.abort {
                Some(flag) => flag.forced().await,
                None => std::future::pending().await,
            }
        };

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = forced => {
                warn!(input = %invocation.input.display(), "Killing enhancement tool");
                return Err(ScalerError::Aborted {
                    program: self.executable.display().to_string(),
                });
            }
        };

        // Signal termination has no code; count it as a resource failure.
        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code < 0 {
            debug!(
                exit_code = exit_code,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Enhancement tool failed"
            );
        }
        Ok(exit_code)
    }
}

/// Moves the child into its own process group so terminal interrupts skip it.
#[cfg(unix)]
fn detach_from_terminal(command: &mut tokio::process::Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
fn detach_from_terminal(_command: &mut tokio::process::Command) {}
