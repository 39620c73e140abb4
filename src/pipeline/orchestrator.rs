//! Top-level driver of a run.
//!
//! The [`Orchestrator`] scales images one at a time in classification order,
//! hands each finished file to the optimization queue, then waits for the
//! queue to drain before reporting.
//!
//! ```text
//! Idle ──► Scaling ──► DrainingOptimization ──► Done
//!             │                 │                ▲
//!             └────► Cancelling ◄┘───────────────┘
//! ```
//!
//! Cancellation is two-phased. The scaling loop checks the cancel flag before
//! each image and never interrupts a running invocation. The optimization
//! queue has its own signal, sent once draining is complete (or right away if
//! the user cancels during the drain, in which case only already-running
//! optimizations are awaited).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ScalerError;
use crate::scheduler::OptimizationQueue;
use crate::workspace;

use super::classify::ClassifiedImage;
use super::planner::{plan, InputSelector, OutputSelector, StagePaths};
use super::runner::{AdaptiveRunner, StageOutcome, ToolLauncher};
use super::state::{format_percentage, Phase, PipelineState};

/// Default delay between drain polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Normal,
    Cancelled,
}

impl std::fmt::Display for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Normal => write!(f, "Completed Normally"),
            Completion::Cancelled => write!(f, "User Cancelled"),
        }
    }
}

/// Final counters of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub total: usize,
    pub scaled: usize,
    /// Images whose input disappeared or whose stage failed without being fatal.
    pub skipped: usize,
    pub optimized: usize,
    pub optimization_failed: usize,
    pub completion: Completion,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl RunReport {
    pub fn is_cancelled(&self) -> bool {
        self.completion == Completion::Cancelled
    }

    /// Images the user's cancellation left unscaled.
    pub fn unprocessed(&self) -> usize {
        self.total.saturating_sub(self.scaled)
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run {} ({})", self.run_id, self.completion)?;
        writeln!(
            f,
            "  {:<22}: {}% ({}/{})",
            "Images scaled",
            format_percentage(self.scaled, self.total),
            self.scaled,
            self.total
        )?;
        writeln!(
            f,
            "  {:<22}: {}% ({}/{})",
            "Images optimized",
            format_percentage(self.optimized, self.total),
            self.optimized,
            self.total
        )?;
        writeln!(f, "  {:<22}: {}", "Skipped", self.skipped)?;
        writeln!(f, "  {:<22}: {}", "Optimization failures", self.optimization_failed)?;
        if self.is_cancelled() {
            writeln!(f, "  {:<22}: {}", "Not started", self.unprocessed())?;
        }
        write!(f, "  {:<22}: {}", "Elapsed", readable_time(self.elapsed))
    }
}

/// Formats a duration as `00h:00m:00s:000ms`. Hours are not wrapped.
pub fn readable_time(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1_000) % 60;
    let millis = total_ms % 1_000;
    format!("{:02}h:{:02}m:{:02}s:{:03}ms", hours, minutes, seconds, millis)
}

/// What one image produced.
enum ImageOutcome {
    /// File to hand to the optimizer.
    Finished(PathBuf),
    /// Nothing to optimize.
    Skipped,
}

/// Sequential scaler feeding a concurrent optimization queue.
pub struct Orchestrator<L, Q> {
    runner: AdaptiveRunner<L>,
    queue: Q,
    paths: StagePaths,
    state: PipelineState,
    poll_interval: Duration,
}

impl<L: ToolLauncher, Q: OptimizationQueue> Orchestrator<L, Q> {
    pub fn new(launcher: L, queue: Q, paths: StagePaths) -> Self {
        Self {
            runner: AdaptiveRunner::new(launcher),
            queue,
            paths,
            state: PipelineState::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Uses `state` instead of a fresh one, e.g. to share the cancel flag
    /// with a listener or the counters with a progress monitor.
    pub fn with_state(mut self, state: PipelineState) -> Self {
        self.state = state;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn launcher(&self) -> &L {
        self.runner.launcher()
    }

    /// Processes `images` in order and waits for optimization to drain.
    ///
    /// # Errors
    ///
    /// Returns the fatal [`ScalerError`] that stopped scaling (missing tool or
    /// exhausted resources). The optimization queue is cancelled and the temp
    /// directory removed before returning.
    pub async fn run(&self, images: Vec<ClassifiedImage>) -> Result<RunReport, ScalerError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        self.state.set_total(images.len());
        info!(run_id = %run_id, images = images.len(), "Starting run");
        self.transition(Phase::Scaling);

        let scaling = self.scale_all(&images).await;
        self.state.mark_scaling_finished();

        if let Err(e) = scaling {
            error!(error = %e, "Aborting run");
            self.queue.request_cancel();
            self.transition(Phase::Done);
            workspace::remove_temp_dir(self.paths.temp_root()).await;
            return Err(e);
        }

        self.log_scaling_summary();
        self.drain().await;
        self.queue.request_cancel();
        self.transition(Phase::Done);
        workspace::remove_temp_dir(self.paths.temp_root()).await;

        let completion = if self.state.is_cancel_requested() {
            Completion::Cancelled
        } else {
            Completion::Normal
        };

        let report = RunReport {
            run_id,
            total: self.state.total(),
            scaled: self.state.scaled(),
            skipped: self.state.skipped(),
            optimized: self.queue.completed_count(),
            optimization_failed: self.queue.failed_count(),
            completion,
            started_at,
            elapsed: start.elapsed(),
        };

        info!(
            run_id = %run_id,
            completion = %completion,
            scaled = report.scaled,
            total = report.total,
            elapsed = %readable_time(report.elapsed),
            "Run finished"
        );
        Ok(report)
    }

    async fn scale_all(&self, images: &[ClassifiedImage]) -> Result<(), ScalerError> {
        for image in images {
            if self.state.is_cancel_requested() {
                info!(
                    remaining = images.len().saturating_sub(self.state.scaled()),
                    "Cancellation observed, not starting remaining images"
                );
                break;
            }

            debug!(
                path = %image.path().display(),
                class = %image.size_class(),
                pixels = image.pixel_count(),
                "Processing image"
            );

            let outcome = match self.process_image(image).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(path = %image.path().display(), error = %e, "Image failed, skipping");
                    ImageOutcome::Skipped
                }
            };

            self.state.record_scaled();
            match outcome {
                ImageOutcome::Finished(path) => self.queue.enqueue(path),
                ImageOutcome::Skipped => self.state.record_skipped(),
            }

            info!(
                progress = %format_percentage(self.state.scaled(), self.state.total()),
                scaled = self.state.scaled(),
                total = self.state.total(),
                "Images scaled"
            );
        }
        Ok(())
    }

    /// Runs every stage of the image's plan.
    async fn process_image(&self, image: &ClassifiedImage) -> Result<ImageOutcome, ScalerError> {
        let plan = plan(image.size_class());
        if plan.is_pass_through() {
            debug!(path = %image.path().display(), "Pass-through image");
            return Ok(ImageOutcome::Finished(image.path().to_path_buf()));
        }

        let mut current = image.path().to_path_buf();
        let mut temp_artifact: Option<PathBuf> = None;

        for spec in plan.stages() {
            let input = match spec.input {
                InputSelector::Original => image.path().to_path_buf(),
                InputSelector::PreviousStage => current.clone(),
            };
            let output = self.paths.output_for(image.path(), spec.output);

            match self.runner.run(&input, &output, spec).await? {
                StageOutcome::Completed { output, .. } => {
                    if spec.output == OutputSelector::Temp {
                        temp_artifact = Some(output.clone());
                    }
                    current = output;
                }
                StageOutcome::Skipped { .. } => return Ok(ImageOutcome::Skipped),
            }
        }

        // Only reached when the last stage succeeded.
        if let Some(temp) = temp_artifact {
            remove_intermediate(&temp).await;
        }

        Ok(ImageOutcome::Finished(current))
    }

    /// Waits until nothing is pending and no optimization is running.
    async fn drain(&self) {
        let mut cancelling = self.state.is_cancel_requested();
        self.transition(if cancelling {
            Phase::Cancelling
        } else {
            Phase::DrainingOptimization
        });
        // Set when the user cancelled during the drain itself.
        let mut dispatch_stopped = false;

        loop {
            if !cancelling && self.state.is_cancel_requested() {
                cancelling = true;
                dispatch_stopped = true;
                self.queue.request_cancel();
                self.transition(Phase::Cancelling);
            }

            // Pending first: an item leaving the queue is already counted as active.
            let pending = self.queue.pending_count();
            let active = self.queue.active_worker_count();

            let drained = if dispatch_stopped {
                active == 0
            } else {
                pending == 0 && active == 0
            };
            if drained {
                if dispatch_stopped && pending > 0 {
                    warn!(dropped = pending, "Queued optimizations were not started");
                }
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn transition(&self, phase: Phase) {
        let from = self.state.phase();
        self.state.set_phase(phase);
        let snap = self.state.snapshot();
        info!(
            from = %from,
            to = %phase,
            scaled = snap.scaled,
            total = snap.total,
            scaling_progress = %snap.scaling_percentage(),
            optimized = self.queue.completed_count(),
            optimization_progress = %format_percentage(self.queue.completed_count(), snap.total),
            "Pipeline state changed"
        );
    }

    fn log_scaling_summary(&self) {
        let snap = self.state.snapshot();
        if snap.scaled == snap.total {
            info!(
                scaled = snap.scaled,
                total = snap.total,
                skipped = snap.skipped,
                "Files converted, completed normally"
            );
        } else {
            info!(
                scaled = snap.scaled,
                total = snap.total,
                skipped = snap.skipped,
                "Files converted, remainder not started"
            );
        }
    }
}

async fn remove_intermediate(path: &Path) {
    if !workspace::remove_file(path).await {
        debug!(path = %path.display(), "Temp artifact left for shutdown cleanup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(completion: Completion) -> RunReport {
        RunReport {
            run_id: Uuid::nil(),
            total: 3,
            scaled: 1,
            skipped: 0,
            optimized: 1,
            optimization_failed: 0,
            completion,
            started_at: Utc::now(),
            elapsed: Duration::from_millis(3_723_045),
        }
    }

    #[test]
    fn test_readable_time() {
        assert_eq!(readable_time(Duration::ZERO), "00h:00m:00s:000ms");
        assert_eq!(
            readable_time(Duration::from_millis(3_723_045)),
            "01h:02m:03s:045ms"
        );
        assert_eq!(
            readable_time(Duration::from_secs(100 * 3600)),
            "100h:00m:00s:000ms"
        );
    }

    #[test]
    fn test_completion_display() {
        assert_eq!(Completion::Normal.to_string(), "Completed Normally");
        assert_eq!(Completion::Cancelled.to_string(), "User Cancelled");
    }

    #[test]
    fn test_report_text() {
        let text = report(Completion::Cancelled).to_string();
        assert!(text.contains("User Cancelled"));
        assert!(text.contains("33.3% (1/3)"));
        assert!(text.contains("Not started"));
        assert!(text.contains("01h:02m:03s:045ms"));

        let normal = report(Completion::Normal).to_string();
        assert!(!normal.contains("Not started"));
    }

    #[test]
    fn test_report_json() {
        let json = serde_json::to_value(report(Completion::Cancelled)).unwrap();
        assert_eq!(json["completion"], "cancelled");
        assert_eq!(json["elapsed_ms"], 3_723_045);
        assert_eq!(json["scaled"], 1);
        assert!(json.get("elapsed").is_none());
    }
}
