//! ARC-AGI task data.

pub mod arc;

pub use arc::{ArcTask, Grid, TaskStore, TestInput, TrainPair};
