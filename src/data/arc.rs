//! ARC-AGI task types and the evaluation task store.
//!
//! Tasks follow the ARC-AGI JSON layout: a top-level object keyed by task ID,
//! each task holding `train` input/output pairs that demonstrate the rule and
//! `test` inputs to solve. Grids are rows of color values 0-9, at most 30x30.

use crate::{Result, TRMError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// A puzzle grid: rows of color values.
pub type Grid = Vec<Vec<u8>>;

/// Maximum grid side length.
pub const MAX_GRID_SIDE: usize = 30;

/// Highest valid color value.
pub const MAX_COLOR: u8 = 9;

/// Demonstration pair showing the transformation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainPair {
    pub input: Grid,
    pub output: Grid,
}

/// Test input to solve (no output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestInput {
    pub input: Grid,
}

/// A complete ARC-AGI task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArcTask {
    pub train: Vec<TrainPair>,
    pub test: Vec<TestInput>,
}

/// Check a single grid: non-empty, rectangular, within 30x30, colors 0-9.
pub fn validate_grid(grid: &Grid) -> Result<()> {
    let height = grid.len();
    if height == 0 {
        return Err(TRMError::Task("grid must not be empty".to_string()));
    }
    if height > MAX_GRID_SIDE {
        return Err(TRMError::Task(format!(
            "grid height {} exceeds maximum of {}",
            height, MAX_GRID_SIDE
        )));
    }

    let width = grid[0].len();
    if width == 0 {
        return Err(TRMError::Task("grid rows must not be empty".to_string()));
    }
    if width > MAX_GRID_SIDE {
        return Err(TRMError::Task(format!(
            "grid width {} exceeds maximum of {}",
            width, MAX_GRID_SIDE
        )));
    }

    for row in grid {
        if row.len() != width {
            return Err(TRMError::Task(
                "grid rows must all have the same width".to_string(),
            ));
        }
        for &cell in row {
            if cell > MAX_COLOR {
                return Err(TRMError::Task(format!(
                    "grid value {} is outside the color range 0-{}",
                    cell, MAX_COLOR
                )));
            }
        }
    }

    Ok(())
}

/// Validate every grid in a task.
pub fn validate_task(task: &ArcTask) -> Result<()> {
    for pair in &task.train {
        validate_grid(&pair.input)?;
        validate_grid(&pair.output)?;
    }
    for test in &task.test {
        validate_grid(&test.input)?;
    }
    Ok(())
}

/// In-memory store of evaluation tasks, keeping the file's task order.
pub struct TaskStore {
    tasks: Vec<(String, ArcTask)>,
    index: HashMap<String, usize>,
}

impl TaskStore {
    /// Load the store from an ARC-AGI challenges JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading ARC-AGI tasks from {}", path.display());

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_reader(reader)?;

        let store = Self::from_entries(raw)?;
        log::info!("Loaded {} tasks", store.len());
        Ok(store)
    }

    /// Parse a store from a JSON string.
    pub fn from_json_str(data: &str) -> Result<Self> {
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(data)?;
        Self::from_entries(raw)
    }

    fn from_entries(raw: serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let mut tasks = Vec::with_capacity(raw.len());
        let mut index = HashMap::with_capacity(raw.len());

        for (id, value) in raw {
            let task: ArcTask = serde_json::from_value(value)
                .map_err(|e| TRMError::Task(format!("task {}: {}", id, e)))?;
            index.insert(id.clone(), tasks.len());
            tasks.push((id, task));
        }

        Ok(Self { tasks, index })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task by ID.
    pub fn get(&self, task_id: &str) -> Option<&ArcTask> {
        self.index.get(task_id).map(|&i| &self.tasks[i].1)
    }

    /// The first `n` tasks in file order.
    pub fn sample(&self, n: usize) -> Vec<(&str, &ArcTask)> {
        self.tasks
            .iter()
            .take(n)
            .map(|(id, task)| (id.as_str(), task))
            .collect()
    }
}
