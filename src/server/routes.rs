//! Request handlers and API payload types.

use super::error::ApiError;
use super::AppState;
use crate::data::arc::{self, ArcTask};
use crate::inference::{Prediction, SolveOptions};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Html;
use serde::{Deserialize, Serialize};

/// Upper bound on the `max_steps` a solve request may ask for.
const MAX_SOLVE_STEPS: usize = 32;

/// How many tasks `/api/examples` returns.
const NUM_EXAMPLE_TASKS: usize = 5;

const FALLBACK_HOME: &str = "<h1>TRM Inference API</h1><p>Web interface not found.</p>";

#[derive(Debug, Deserialize)]
pub struct SolveRequest {
    pub task: ArcTask,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default)]
    pub show_iterations: bool,
}

fn default_max_steps() -> usize {
    16
}

#[derive(Debug, Serialize)]
pub struct SolveResponse {
    pub predictions: Vec<Prediction>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    pub name: String,
    pub parameters: usize,
    pub config: ModelConfigInfo,
    pub checkpoint_loaded: bool,
    pub device: String,
}

/// The model hyperparameters exposed over the API, with their
/// conventional capitalized names.
#[derive(Debug, Serialize)]
pub struct ModelConfigInfo {
    #[serde(rename = "H_cycles")]
    pub h_cycles: usize,
    #[serde(rename = "L_cycles")]
    pub l_cycles: usize,
    #[serde(rename = "L_layers")]
    pub l_layers: usize,
    pub hidden_size: usize,
    pub halt_max_steps: usize,
}

#[derive(Debug, Serialize)]
pub struct ExampleEntry {
    pub id: String,
    pub name: String,
    pub task: ArcTask,
    pub num_train: usize,
    pub num_test: usize,
}

#[derive(Debug, Serialize)]
pub struct ExamplesResponse {
    pub examples: Vec<ExampleEntry>,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: String,
    pub task: ArcTask,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
}

/// `GET /` - the web interface, or a minimal page when it is missing.
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let index_path = state.static_dir.join("index.html");
    match tokio::fs::read_to_string(&index_path).await {
        Ok(html) => Html(html),
        Err(_) => Html(FALLBACK_HOME.to_string()),
    }
}

/// `GET /api/model-info`
pub async fn model_info(
    State(state): State<AppState>,
) -> Result<Json<ModelInfoResponse>, ApiError> {
    let engine = state.engine.as_ref().ok_or(ApiError::ModelUnavailable)?;
    let config = engine.config();

    Ok(Json(ModelInfoResponse {
        name: "Tiny Recursive Model (TRM)".to_string(),
        parameters: engine.param_count(),
        config: ModelConfigInfo {
            h_cycles: config.h_cycles,
            l_cycles: config.l_cycles,
            l_layers: config.l_layers,
            hidden_size: config.hidden_size,
            halt_max_steps: config.halt_max_steps,
        },
        checkpoint_loaded: engine.checkpoint_loaded(),
        device: engine.device_label().to_string(),
    }))
}

/// `POST /api/solve` - run the model on a task.
///
/// Inference is synchronous CPU/GPU work, so it runs on the blocking pool.
pub async fn solve(
    State(state): State<AppState>,
    payload: Result<Json<SolveRequest>, JsonRejection>,
) -> Result<Json<SolveResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;

    let engine = state.engine.clone().ok_or(ApiError::ModelUnavailable)?;

    if request.max_steps < 1 || request.max_steps > MAX_SOLVE_STEPS {
        return Err(ApiError::Validation(format!(
            "max_steps must be between 1 and {}",
            MAX_SOLVE_STEPS
        )));
    }
    arc::validate_task(&request.task).map_err(|e| ApiError::Validation(e.to_string()))?;

    let options = SolveOptions {
        max_steps: request.max_steps,
        show_iterations: request.show_iterations,
    };
    let task = request.task;

    let predictions = tokio::task::spawn_blocking(move || engine.solve(&task, &options))
        .await
        .map_err(|e| ApiError::Internal(format!("Inference error: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("Inference error: {}", e)))?;

    Ok(Json(SolveResponse {
        predictions,
        message: "✓ Inference completed successfully".to_string(),
    }))
}

/// `GET /api/examples` - the first few evaluation tasks.
pub async fn examples(State(state): State<AppState>) -> Result<Json<ExamplesResponse>, ApiError> {
    let tasks = state.tasks.as_ref().ok_or_else(|| {
        ApiError::Internal("Error loading examples: task dataset not available".to_string())
    })?;

    let examples = tasks
        .sample(NUM_EXAMPLE_TASKS)
        .into_iter()
        .map(|(id, task)| ExampleEntry {
            id: id.to_string(),
            name: format!("ARC-AGI Task {}", id),
            task: task.clone(),
            num_train: task.train.len(),
            num_test: task.test.len(),
        })
        .collect();

    Ok(Json(ExamplesResponse { examples }))
}

/// `GET /api/task/{task_id}`
pub async fn task_by_id(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let tasks = state.tasks.as_ref().ok_or_else(|| {
        ApiError::Internal("Error loading task: task dataset not available".to_string())
    })?;

    let task = tasks.get(&task_id).ok_or_else(|| {
        ApiError::NotFound(format!("Task {} not found in dataset", task_id))
    })?;

    Ok(Json(TaskResponse {
        id: task_id,
        task: task.clone(),
    }))
}

/// `GET /health` - always 200, reports whether the model is up.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.engine.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_request_defaults() {
        let request: SolveRequest =
            serde_json::from_str(r#"{"task": {"train": [], "test": []}}"#)
                .expect("minimal request should parse");
        assert_eq!(request.max_steps, 16);
        assert!(!request.show_iterations);
    }

    #[test]
    fn test_config_info_uses_capitalized_keys() {
        let info = ModelConfigInfo {
            h_cycles: 3,
            l_cycles: 6,
            l_layers: 2,
            hidden_size: 512,
            halt_max_steps: 16,
        };
        let value = serde_json::to_value(&info).expect("serializes");

        assert_eq!(value["H_cycles"], 3);
        assert_eq!(value["L_cycles"], 6);
        assert_eq!(value["L_layers"], 2);
        assert_eq!(value["hidden_size"], 512);
        assert_eq!(value["halt_max_steps"], 16);
    }

    #[test]
    fn test_health_response_shape() {
        let body = serde_json::to_value(HealthResponse {
            status: "healthy",
            model_loaded: false,
        })
        .expect("serializes");
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_loaded"], false);
    }
}
