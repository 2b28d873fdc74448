//! Command-line entry point: serve the HTTP API, verify the setup, or
//! solve a single task from the terminal.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use trm_server::config::TRMConfig;
use trm_server::data::arc;
use trm_server::data::{ArcTask, Grid, TaskStore};
use trm_server::inference::{DevicePreference, InferenceEngine, SolveOptions};
use trm_server::server::{self, AppState};
use trm_server::verify::{self, VerifyOptions};

const DEFAULT_TASKS: &str = "data/arc-agi_evaluation_challenges.json";

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Tiny Recursive Model inference server for ARC-AGI tasks",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Model flags shared by every subcommand.
#[derive(Args)]
struct ModelArgs {
    /// Safetensors checkpoint to load (random weights when omitted)
    #[arg(long, env = "TRM_CHECKPOINT_PATH")]
    checkpoint: Option<PathBuf>,

    /// Device to run on: auto, cpu, cuda or metal
    #[arg(long, default_value = "auto")]
    device: DevicePreference,

    /// JSON file overriding the default model configuration
    #[arg(long)]
    model_config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP inference server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value_t = 8000)]
        port: u16,

        #[command(flatten)]
        model: ModelArgs,

        /// ARC-AGI evaluation challenges JSON
        #[arg(long, default_value = DEFAULT_TASKS)]
        tasks: PathBuf,

        /// Directory holding the web interface
        #[arg(long, default_value = "static")]
        static_dir: PathBuf,
    },

    /// Check that device, config, checkpoint, dataset and inference all work
    Verify {
        #[command(flatten)]
        model: ModelArgs,

        /// ARC-AGI evaluation challenges JSON
        #[arg(long, default_value = DEFAULT_TASKS)]
        tasks: PathBuf,
    },

    /// Solve a single task and print the predicted grids
    Solve {
        /// Task ID to look up in the dataset
        #[arg(long, conflicts_with = "task_file")]
        task_id: Option<String>,

        /// JSON file holding one task (an object with "train" and "test")
        #[arg(long)]
        task_file: Option<PathBuf>,

        /// Upper bound on reasoning steps per test input
        #[arg(long, default_value_t = 16)]
        max_steps: usize,

        /// Print the prediction after every reasoning step
        #[arg(long)]
        show_iterations: bool,

        #[command(flatten)]
        model: ModelArgs,

        /// Dataset used to resolve --task-id
        #[arg(long, default_value = DEFAULT_TASKS)]
        tasks: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::Serve {
            host,
            port,
            model,
            tasks,
            static_dir,
        } => run_serve(host, port, model, tasks, static_dir).await,
        Commands::Verify { model, tasks } => run_verify(model, tasks),
        Commands::Solve {
            task_id,
            task_file,
            max_steps,
            show_iterations,
            model,
            tasks,
        } => run_solve(task_id, task_file, max_steps, show_iterations, model, tasks),
    }
}

fn load_model_config(model: &ModelArgs) -> anyhow::Result<TRMConfig> {
    match &model.model_config {
        Some(path) => Ok(TRMConfig::from_json_file(path)?),
        None => Ok(TRMConfig::default()),
    }
}

fn build_engine(model: &ModelArgs) -> anyhow::Result<InferenceEngine> {
    let config = load_model_config(model)?;
    Ok(InferenceEngine::new(
        &config,
        model.checkpoint.as_deref(),
        model.device,
    )?)
}

async fn run_serve(
    host: String,
    port: u16,
    model: ModelArgs,
    tasks: PathBuf,
    static_dir: PathBuf,
) -> anyhow::Result<()> {
    log::info!("Loading TRM model...");
    let engine = match build_engine(&model) {
        Ok(engine) => {
            log::info!(
                "✓ Model ready: {} parameters on {}",
                engine.param_count(),
                engine.device_label()
            );
            Some(Arc::new(engine))
        }
        Err(e) => {
            // Keep serving so /api/health and the dataset endpoints stay up;
            // model endpoints answer 503 until the server is restarted.
            log::error!("✗ Failed to load model: {}", e);
            None
        }
    };

    let task_store = match TaskStore::load(&tasks) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            log::warn!("Task dataset {} unavailable: {}", tasks.display(), e);
            None
        }
    };

    let state = AppState {
        engine,
        tasks: task_store,
        static_dir,
    };
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    server::serve(state, addr).await?;
    Ok(())
}

fn run_verify(model: ModelArgs, tasks: PathBuf) -> anyhow::Result<()> {
    let options = VerifyOptions {
        model_config: model.model_config,
        checkpoint: model.checkpoint,
        device: model.device,
        tasks,
    };
    let results = verify::run_checks(&options);
    if !verify::print_report(&results) {
        std::process::exit(1);
    }
    Ok(())
}

fn run_solve(
    task_id: Option<String>,
    task_file: Option<PathBuf>,
    max_steps: usize,
    show_iterations: bool,
    model: ModelArgs,
    tasks: PathBuf,
) -> anyhow::Result<()> {
    let (label, task) = match (task_id, task_file) {
        (Some(id), None) => {
            let store = TaskStore::load(&tasks)?;
            let task = store.get(&id).cloned().ok_or_else(|| {
                anyhow::anyhow!("Task {} not found in {}", id, tasks.display())
            })?;
            (id, task)
        }
        (None, Some(path)) => {
            let data = std::fs::read_to_string(&path)?;
            let task: ArcTask = serde_json::from_str(&data)?;
            (path.display().to_string(), task)
        }
        _ => anyhow::bail!("exactly one of --task-id or --task-file is required"),
    };
    arc::validate_task(&task)?;

    log::info!(
        "Task {}: {} train pairs, {} test inputs",
        label,
        task.train.len(),
        task.test.len()
    );

    let engine = build_engine(&model)?;
    let options = SolveOptions {
        max_steps,
        show_iterations,
    };

    log::info!("Running inference...");
    let predictions = engine.solve(&task, &options)?;

    for (i, prediction) in predictions.iter().enumerate() {
        println!("Test {}:", i + 1);
        if let Some(iterations) = &prediction.iterations {
            for iteration in iterations {
                println!("  Step {}:", iteration.step);
                print_grid(&iteration.prediction);
            }
            println!("  Final:");
        }
        print_grid(&prediction.prediction);
    }
    Ok(())
}

fn print_grid(grid: &Grid) {
    for row in grid {
        let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
        println!("  {}", cells.join(" "));
    }
}
