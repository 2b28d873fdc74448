//! Tiny Recursive Model inference server for ARC-AGI puzzles.
//!
//! Serves a pretrained TRM over HTTP: given an ARC-AGI task (training
//! input/output grid pairs demonstrating a transformation rule plus test
//! inputs), the model predicts each test output grid through an iterative
//! halting-based forward loop.
//!
//! # Architecture
//!
//! The model is the recursive reasoning architecture from
//! TinyRecursiveModels:
//! - **H-cycles**: high-level refinement cycles over the carry state
//! - **L-cycles**: low-level update cycles per H-cycle
//! - **ACT**: adaptive computation time with a learned halting head
//!
//! The serving layer treats the model as a black box: encode a grid, step
//! the model until it halts (or the step budget runs out), decode the
//! final logits back into a grid.
//!
//! # Example
//!
//! ```ignore
//! use trm_server::{InferenceEngine, TRMConfig};
//! use trm_server::inference::{DevicePreference, SolveOptions};
//!
//! let config = TRMConfig::default();
//! let engine = InferenceEngine::new(&config, None, DevicePreference::Auto)?;
//! let predictions = engine.solve(&task, &SolveOptions::default())?;
//! ```

pub mod config;
pub mod data;
pub mod inference;
pub mod layers;
pub mod models;
pub mod server;
pub mod verify;

// Re-export commonly used items
pub use config::TRMConfig;
pub use data::TaskStore;
pub use inference::InferenceEngine;
pub use models::{ActModel, TinyRecursiveModel};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum TRMError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Task error: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TRMError>;
