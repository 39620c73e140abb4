//! Adaptive two-stage image pipeline.
//!
//! Images are enhanced one at a time by an external tool and then handed to
//! a concurrent optimization stage.
//!
//! # Architecture
//!
//! - **Classify**: pixel count to [`SizeClass`]
//! - **Planner**: size class to an ordered [`StagePlan`]
//! - **Runner**: one tool invocation, retried with smaller batch and split
//!   values when the device runs out of resources
//! - **Orchestrator**: the sequential scaling loop, the drain, and the report
//!
//! # Pipeline Flow
//!
//! 1. **Discovery**: source images are listed in natural order and probed
//! 2. **Classification**: each image gets a size class
//! 3. **Scaling**: each plan is run through the [`AdaptiveRunner`]; the temp
//!    artifact of a two-stage plan is deleted once stage 2 succeeds
//! 4. **Optimization**: finished files are enqueued in scaling order
//! 5. **Drain**: the orchestrator polls the queue until it is idle
//! 6. **Cleanup**: the temp directory is removed and a [`RunReport`] produced
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use superscaler::pipeline::{Orchestrator, ScalerConfig, StagePaths, Waifu2xLauncher};
//! use superscaler::scheduler::{OptimizerPool, OptimizerPoolConfig};
//!
//! let config = ScalerConfig::from_env()?;
//! let paths = StagePaths::new(config.source_dir(), config.temp_dir(), config.destination_dir());
//!
//! let pool = Arc::new(OptimizerPool::new(OptimizerPoolConfig::from_scaler_config(&config, paths.clone())));
//! pool.start()?;
//!
//! let orchestrator = Orchestrator::new(Waifu2xLauncher::from_config(&config), pool.clone(), paths);
//! let report = orchestrator.run(images).await?;
//! println!("{}", report);
//! ```
//!
//! # Configuration
//!
//! ```rust,ignore
//! // Via builder pattern
//! let config = ScalerConfig::new()
//!     .with_base_dir("/comics")
//!     .with_denoise_level(2)
//!     .with_optimizer_threads(8);
//!
//! // Via environment variables
//! let config = ScalerConfig::from_env()?;
//! ```

pub mod cancel;
pub mod classify;
pub mod config;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod runner;
pub mod state;

// Re-export main types for convenience
pub use cancel::{spawn_cancel_listener, CancelFlag};
pub use classify::{classify_all, ClassifiedImage, SizeClass};
pub use config::{ConfigError, ScalerConfig};
pub use orchestrator::{readable_time, Completion, Orchestrator, RunReport};
pub use planner::{plan, InvocationSpec, StagePaths, StagePlan};
pub use progress::ProgressMonitor;
pub use runner::{
    AdaptiveRunner, ResourceBudget, StageOutcome, ToolInvocation, ToolLauncher, Waifu2xLauncher,
};
pub use state::{Phase, PipelineState, StateSnapshot};
