//! Worker pool running the optimizer over enqueued files.
//!
//! A single dispatcher task polls the [`WorkQueue`] and spawns one job task
//! per file, up to `num_workers` at a time. Completion order is not tied to
//! enqueue order.
//!
//! # Features
//!
//! - Configurable worker limit
//! - Shutdown via broadcast channel: queued files are not started, running
//!   jobs finish
//! - Pool statistics tracking

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::config::ScalerConfig;
use crate::pipeline::planner::StagePaths;

use super::job::{run_job, OptimizerCommand};
use super::queue::WorkQueue;
use super::OptimizationQueue;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct OptimizerPoolConfig {
    /// Maximum number of optimizer processes in flight.
    pub num_workers: usize,
    /// How often the dispatcher checks for new files.
    pub poll_interval: Duration,
    /// Timeout for waiting on running jobs during shutdown.
    pub shutdown_timeout: Duration,
    /// The optimizer invocation.
    pub command: OptimizerCommand,
}

impl Default for OptimizerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(600),
            command: OptimizerCommand::new("oxipng", Vec::new()),
        }
    }
}

impl OptimizerPoolConfig {
    /// Pool configuration for a run.
    pub fn from_scaler_config(config: &ScalerConfig, paths: StagePaths) -> Self {
        Self {
            num_workers: config.optimizer_threads,
            poll_interval: config.poll_interval(),
            command: OptimizerCommand::new(
                config.optimizer_executable.clone(),
                config.optimizer_args.clone(),
            )
            .with_paths(paths),
            ..Default::default()
        }
    }

    /// Sets the number of workers.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the optimizer command.
    pub fn with_command(mut self, command: OptimizerCommand) -> Self {
        self.command = command;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Worker limit.
    pub num_workers: usize,
    /// Files waiting to be dispatched.
    pub pending: usize,
    /// Jobs currently running.
    pub active_workers: usize,
    /// Jobs that finished successfully.
    pub jobs_completed: u64,
    /// Jobs that failed.
    pub jobs_failed: u64,
    /// Average job duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }
}

/// Shared counters updated by job tasks.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize, queue: &WorkQueue) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let total_jobs = completed + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            pending: queue.pending(),
            active_workers: queue.active(),
            jobs_completed: completed,
            jobs_failed: failed,
            average_job_duration: average_duration,
        }
    }
}

/// Background optimizer pool.
pub struct OptimizerPool {
    config: OptimizerPoolConfig,
    queue: Arc<WorkQueue>,
    stats: Arc<SharedPoolStats>,
    wake: Arc<Notify>,
    shutdown_tx: broadcast::Sender<()>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    is_running: AtomicBool,
}

impl OptimizerPool {
    pub fn new(config: OptimizerPoolConfig) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue: Arc::new(WorkQueue::new()),
            stats: Arc::new(SharedPoolStats::new()),
            wake: Arc::new(Notify::new()),
            shutdown_tx,
            dispatcher: Mutex::new(None),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts the dispatcher. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&self) -> Result<(), PoolError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        let dispatcher = Dispatcher {
            queue: Arc::clone(&self.queue),
            stats: Arc::clone(&self.stats),
            wake: Arc::clone(&self.wake),
            permits: Arc::new(Semaphore::new(self.config.num_workers.max(1))),
            command: Arc::new(self.config.command.clone()),
            poll_interval: self.config.poll_interval,
            shutdown_rx: self.shutdown_tx.subscribe(),
        };
        let handle = tokio::spawn(dispatcher.run());
        *self.lock_dispatcher() = Some(handle);

        info!(num_workers = self.config.num_workers, "Optimizer pool started");
        Ok(())
    }

    /// Stops dispatching and waits for running jobs to finish.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if running jobs don't finish
    /// within the configured timeout.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating optimizer pool shutdown");
        let _ = self.shutdown_tx.send(());

        let handle = self.lock_dispatcher().take();
        let queue = Arc::clone(&self.queue);
        let drain = async move {
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    error!(error = %e, "Optimizer dispatcher panicked during shutdown");
                }
            }
            while queue.active() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, drain).await {
            Ok(()) => {
                let dropped = self.queue.pending();
                if dropped > 0 {
                    warn!(dropped = dropped, "Queued files were not optimized");
                }
                info!("Optimizer pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats
            .to_pool_stats(self.config.num_workers, &self.queue)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn lock_dispatcher(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.dispatcher.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OptimizationQueue for OptimizerPool {
    fn enqueue(&self, path: PathBuf) {
        debug!(path = %path.display(), "Enqueued for optimization");
        self.queue.push(path);
        self.wake.notify_one();
    }

    fn pending_count(&self) -> usize {
        self.queue.pending()
    }

    fn active_worker_count(&self) -> usize {
        self.queue.active()
    }

    fn request_cancel(&self) {
        // Ignore send error - the dispatcher may have already stopped
        let _ = self.shutdown_tx.send(());
    }

    fn completed_count(&self) -> usize {
        self.stats.jobs_completed.load(Ordering::SeqCst) as usize
    }

    fn failed_count(&self) -> usize {
        self.stats.jobs_failed.load(Ordering::SeqCst) as usize
    }
}

/// Background optimization driver.
struct Dispatcher {
    queue: Arc<WorkQueue>,
    stats: Arc<SharedPoolStats>,
    wake: Arc<Notify>,
    permits: Arc<Semaphore>,
    command: Arc<OptimizerCommand>,
    poll_interval: Duration,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Dispatcher {
    async fn run(mut self) {
        debug!("Optimizer dispatcher started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => break,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            self.dispatch_ready();

            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        debug!("Optimizer dispatcher stopped");
    }

    /// Starts as many queued jobs as there are free permits.
    fn dispatch_ready(&self) {
        loop {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                return;
            };
            let Some(path) = self.queue.dispatch() else {
                return;
            };

            let queue = Arc::clone(&self.queue);
            let stats = Arc::clone(&self.stats);
            let command = Arc::clone(&self.command);

            tokio::spawn(async move {
                let _permit = permit;
                let start = Instant::now();

                match run_job(&command, &path).await {
                    Ok(report) => {
                        stats.record_completion(report.duration);
                        info!(
                            file = %report.target.display(),
                            duration_ms = report.duration.as_millis() as u64,
                            "Image optimized"
                        );
                    }
                    Err(e) => {
                        stats.record_failure(start.elapsed());
                        warn!(path = %path.display(), error = %e, "Optimization failed");
                    }
                }

                queue.finish();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::FILE_PLACEHOLDER;
    use tempfile::TempDir;

    fn missing_optimizer_pool(workers: usize) -> OptimizerPool {
        OptimizerPool::new(
            OptimizerPoolConfig::default()
                .with_num_workers(workers)
                .with_poll_interval(Duration::from_millis(10))
                .with_shutdown_timeout(Duration::from_secs(10))
                .with_command(OptimizerCommand::new(
                    "superscaler-test-no-such-optimizer",
                    vec![FILE_PLACEHOLDER.to_string()],
                )),
        )
    }

    async fn wait_idle(pool: &OptimizerPool) {
        for _ in 0..500 {
            if pool.pending_count() == 0 && pool.active_worker_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pool did not become idle");
    }

    #[test]
    fn test_pool_config_builder() {
        let config = OptimizerPoolConfig::default()
            .with_num_workers(8)
            .with_poll_interval(Duration::from_millis(250))
            .with_shutdown_timeout(Duration::from_secs(30));

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_pool_config_from_scaler_config() {
        let scaler = ScalerConfig::default().with_optimizer_threads(3);
        let paths = StagePaths::new("/s", "/t", "/d");
        let config = OptimizerPoolConfig::from_scaler_config(&scaler, paths);

        assert_eq!(config.num_workers, 3);
        assert_eq!(config.command.executable, scaler.optimizer_executable);
        assert!(config.command.paths.is_some());
    }

    #[test]
    fn test_shared_pool_stats() {
        let stats = SharedPoolStats::new();
        let queue = WorkQueue::new();

        stats.record_completion(Duration::from_secs(10));
        stats.record_completion(Duration::from_secs(20));
        stats.record_failure(Duration::from_secs(6));

        let pool_stats = stats.to_pool_stats(4, &queue);
        assert_eq!(pool_stats.num_workers, 4);
        assert_eq!(pool_stats.jobs_completed, 2);
        assert_eq!(pool_stats.jobs_failed, 1);
        assert_eq!(pool_stats.total_processed(), 3);
        assert_eq!(pool_stats.average_job_duration, Duration::from_secs(12));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let pool = missing_optimizer_pool(1);
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(PoolError::AlreadyRunning)));
        pool.shutdown().await.unwrap();
        assert!(matches!(pool.shutdown().await, Err(PoolError::NotRunning)));
    }

    #[tokio::test]
    async fn test_failed_jobs_are_counted_and_drained() {
        let temp = TempDir::new().unwrap();
        let pool = missing_optimizer_pool(2);
        pool.start().unwrap();

        for i in 0..5 {
            let file = temp.path().join(format!("{}.png", i));
            std::fs::write(&file, b"png").unwrap();
            pool.enqueue(file);
        }

        wait_idle(&pool).await;
        let stats = pool.stats();
        assert_eq!(stats.jobs_failed, 5);
        assert_eq!(stats.jobs_completed, 0);
        assert_eq!(pool.failed_count(), 5);

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatching() {
        let pool = missing_optimizer_pool(1);
        pool.request_cancel();
        pool.start().unwrap();

        // The dispatcher subscribed after the signal, so stop it explicitly.
        pool.shutdown().await.unwrap();
        pool.enqueue(PathBuf::from("late.png"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(pool.pending_count(), 1);
        assert_eq!(pool.active_worker_count(), 0);
    }
}
