//! Training utilities for multi-output graphs.
//!
//! This module provides training functionality including:
//! - Loss functions (MSE, binary and categorical cross entropy)
//! - Training configuration
//! - Joint training loop with Adam optimizer
//! - Held-out evaluation per output

mod config;
mod loss;
mod metrics;
mod trainer;

pub use config::TrainingConfig;
pub use loss::Loss;
pub use metrics::{EpochMetrics, Evaluation, History, OutputMetrics, evaluate};
pub use trainer::{TrainingResult, train};
