//! superscaler: two-stage upscaling and optimization of drawn images.
//!
//! Images are enhanced one at a time by an external tool (waifu2x-caffe),
//! with batch and tile sizes reduced automatically when the device runs out
//! of resources, then optimized concurrently by a second external tool.

// Core modules
pub mod cli;
pub mod discovery;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod workspace;

// Re-export commonly used error types
pub use error::{ConfigError, ScalerError};
