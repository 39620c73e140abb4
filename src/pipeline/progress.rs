//! Background progress monitor for a run.
//!
//! Periodically logs the phase together with the scaling and optimization
//! percentages so long runs can be followed without watching individual
//! stage logs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::scheduler::OptimizationQueue;

use super::orchestrator::readable_time;
use super::state::{format_percentage, PipelineState};

/// A background task that periodically logs run progress.
///
/// Call [`ProgressMonitor::stop`] to cancel.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start a background progress monitor that logs every `interval`.
    ///
    /// # Arguments
    ///
    /// * `state` - Counters shared with the orchestrator
    /// * `queue` - Optimization queue, read for its completion counters
    /// * `interval` - How often to emit progress logs
    pub fn start<Q>(state: PipelineState, queue: Q, interval: Duration) -> Self
    where
        Q: OptimizationQueue + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = state.snapshot();
                let optimized = queue.completed_count();

                tracing::info!(
                    phase = %snap.phase,
                    scaled = snap.scaled,
                    total = snap.total,
                    scaling_pct = %format!("{}%", snap.scaling_percentage()),
                    optimized = optimized,
                    optimization_failed = queue.failed_count(),
                    optimization_pct = %format!("{}%", format_percentage(optimized, snap.total)),
                    queued = queue.pending_count(),
                    optimizing = queue.active_worker_count(),
                    elapsed = %readable_time(start.elapsed()),
                    "Pipeline progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signal the background monitor to stop and wait for it to finish.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            // The task may be parked on a long tick.
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct IdleQueue;

    impl OptimizationQueue for IdleQueue {
        fn enqueue(&self, _path: PathBuf) {}

        fn pending_count(&self) -> usize {
            0
        }

        fn active_worker_count(&self) -> usize {
            0
        }

        fn request_cancel(&self) {}
    }

    #[tokio::test]
    async fn test_progress_monitor_start_stop() {
        let state = PipelineState::new();
        state.set_total(10);
        state.record_scaled();

        let monitor = ProgressMonitor::start(state, IdleQueue, Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(70)).await;
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_progress_monitor_stops_on_drop() {
        let monitor =
            ProgressMonitor::start(PipelineState::new(), IdleQueue, Duration::from_secs(3600));
        drop(monitor);
    }
}
