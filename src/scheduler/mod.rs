//! Background optimization of finished images.
//!
//! The scaling loop hands each finished file to an [`OptimizationQueue`] and
//! moves on. [`OptimizerPool`] is the production implementation: a bounded
//! set of optimizer processes fed from an in-process FIFO.
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────────┐  enqueue   ┌──────────────┐
//!    │ Orchestrator ├───────────►│  WorkQueue   │
//!    └──────────────┘            └──────┬───────┘
//!                                       │ dispatch
//!         ┌─────────────────────────────┼─────────────────┐
//!         ▼                             ▼                 ▼
//!    ┌─────────┐                   ┌─────────┐       ┌─────────┐
//!    │  Job 1  │                   │  Job 2  │       │  Job N  │
//!    └─────────┘                   └─────────┘       └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use superscaler::scheduler::{OptimizationQueue, OptimizerPool, OptimizerPoolConfig};
//!
//! let pool = OptimizerPool::new(OptimizerPoolConfig::default().with_num_workers(4));
//! pool.start()?;
//! pool.enqueue("Destination/001.png".into());
//!
//! // Once pending and active both read zero
//! pool.request_cancel();
//! pool.shutdown().await?;
//! ```

pub mod job;
pub mod queue;
pub mod worker_pool;

use std::path::PathBuf;

// Re-export main types for convenience
pub use job::{run_job, JobError, JobReport, OptimizerCommand};
pub use queue::WorkQueue;
pub use worker_pool::{OptimizerPool, OptimizerPoolConfig, PoolError, PoolStats};

/// Seam between the scaling loop and the optimizer.
///
/// Callers that need "fully drained" must read [`pending_count`] before
/// [`active_worker_count`]; implementations count a dispatched item as
/// active before removing it from the pending list.
///
/// [`pending_count`]: OptimizationQueue::pending_count
/// [`active_worker_count`]: OptimizationQueue::active_worker_count
pub trait OptimizationQueue: Send + Sync {
    /// Adds a file to the back of the queue. Never blocks on optimization.
    fn enqueue(&self, path: PathBuf);

    /// Files waiting to be dispatched.
    fn pending_count(&self) -> usize;

    /// Optimizations currently running.
    fn active_worker_count(&self) -> usize;

    /// Stops the dispatcher. Running optimizations finish; queued ones are dropped.
    fn request_cancel(&self);

    /// Optimizations that succeeded so far.
    fn completed_count(&self) -> usize {
        0
    }

    /// Optimizations that failed so far.
    fn failed_count(&self) -> usize {
        0
    }
}

impl<T: OptimizationQueue + ?Sized> OptimizationQueue for std::sync::Arc<T> {
    fn enqueue(&self, path: PathBuf) {
        (**self).enqueue(path)
    }

    fn pending_count(&self) -> usize {
        (**self).pending_count()
    }

    fn active_worker_count(&self) -> usize {
        (**self).active_worker_count()
    }

    fn request_cancel(&self) {
        (**self).request_cancel()
    }

    fn completed_count(&self) -> usize {
        (**self).completed_count()
    }

    fn failed_count(&self) -> usize {
        (**self).failed_count()
    }
}
