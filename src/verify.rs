//! Setup verification.
//!
//! Runs a sequence of named checks covering everything the server needs:
//! device, configuration, model construction, checkpoint, task dataset and
//! an end-to-end smoke solve. Each check reports pass/fail with a one-line
//! detail; the caller prints a summary and exits nonzero on failure.

use crate::config::TRMConfig;
use crate::data::TaskStore;
use crate::data::arc::{ArcTask, TestInput};
use crate::inference::{DevicePreference, InferenceEngine, SolveOptions};
use crate::models::loader;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// Not applicable in this configuration; counts as passed
    Skip,
    Fail,
}

#[derive(Debug)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Pass,
            message: message.into(),
        }
    }

    fn skip(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Skip,
            message: message.into(),
        }
    }

    fn fail(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Fail,
            message: message.into(),
        }
    }

    fn symbol(&self) -> &'static str {
        match self.status {
            CheckStatus::Pass => "✓",
            CheckStatus::Skip => "⚠",
            CheckStatus::Fail => "✗",
        }
    }
}

/// What to verify.
pub struct VerifyOptions {
    pub model_config: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub device: DevicePreference,
    pub tasks: PathBuf,
}

/// Run every check and collect the results. Checks that depend on an
/// earlier failure are skipped rather than reported as extra failures.
pub fn run_checks(options: &VerifyOptions) -> Vec<CheckResult> {
    let mut results = Vec::new();

    // Device
    let device = match options.device.resolve() {
        Ok((device, label)) => {
            results.push(CheckResult::pass("Device", label));
            Some(device)
        }
        Err(e) => {
            results.push(CheckResult::fail("Device", e.to_string()));
            None
        }
    };

    // Model config
    let config = {
        let loaded = match &options.model_config {
            Some(path) => TRMConfig::from_json_file(path),
            None => Ok(TRMConfig::default()),
        };
        match loaded {
            Ok(config) => {
                results.push(CheckResult::pass(
                    "Model Config",
                    format!(
                        "hidden_size={}, H_cycles={}, L_cycles={}, halt_max_steps={}",
                        config.hidden_size, config.h_cycles, config.l_cycles,
                        config.halt_max_steps
                    ),
                ));
                Some(config)
            }
            Err(e) => {
                results.push(CheckResult::fail("Model Config", e.to_string()));
                None
            }
        }
    };

    // Model construction with random weights
    match (&device, &config) {
        (Some(device), Some(config)) => match loader::random_model(config, device) {
            Ok(loaded) => results.push(CheckResult::pass(
                "Model Build",
                format!("{} parameters", loaded.param_count),
            )),
            Err(e) => results.push(CheckResult::fail("Model Build", e.to_string())),
        },
        _ => results.push(CheckResult::skip(
            "Model Build",
            "requires a working device and config",
        )),
    }

    // Checkpoint
    match (&options.checkpoint, &device, &config) {
        (None, _, _) => results.push(CheckResult::skip(
            "Checkpoint",
            "no checkpoint configured, server will use random weights",
        )),
        (Some(path), _, _) if !path.exists() => {
            results.push(CheckResult::fail(
                "Checkpoint",
                format!("{} not found", path.display()),
            ));
        }
        (Some(path), Some(device), Some(config)) => {
            match loader::load_checkpoint(config, path, device) {
                Ok(loaded) => results.push(CheckResult::pass(
                    "Checkpoint",
                    format!("{} ({} parameters)", path.display(), loaded.param_count),
                )),
                Err(e) => results.push(CheckResult::fail("Checkpoint", e.to_string())),
            }
        }
        (Some(_), _, _) => results.push(CheckResult::skip(
            "Checkpoint",
            "requires a working device and config",
        )),
    }

    // Task dataset
    match TaskStore::load(&options.tasks) {
        Ok(store) => results.push(CheckResult::pass(
            "ARC-AGI Dataset",
            format!("{} tasks", store.len()),
        )),
        Err(e) => results.push(CheckResult::fail("ARC-AGI Dataset", e.to_string())),
    }

    // End-to-end smoke solve on a tiny grid
    match config {
        Some(config) => {
            let checkpoint = options
                .checkpoint
                .as_deref()
                .filter(|path| path.exists());
            let smoke = InferenceEngine::new(&config, checkpoint, options.device)
                .and_then(|engine| {
                    let task = ArcTask {
                        train: vec![],
                        test: vec![TestInput {
                            input: vec![vec![0, 1], vec![2, 3]],
                        }],
                    };
                    let solve_options = SolveOptions {
                        max_steps: 1,
                        show_iterations: false,
                    };
                    engine.solve(&task, &solve_options)
                });
            match smoke {
                Ok(predictions) if predictions.len() == 1 => {
                    results.push(CheckResult::pass("Inference", "solved a 2x2 smoke grid"))
                }
                Ok(predictions) => results.push(CheckResult::fail(
                    "Inference",
                    format!("expected 1 prediction, got {}", predictions.len()),
                )),
                Err(e) => results.push(CheckResult::fail("Inference", e.to_string())),
            }
        }
        None => results.push(CheckResult::skip("Inference", "requires a valid config")),
    }

    results
}

/// True when no check failed (skips count as passed).
pub fn all_ok(results: &[CheckResult]) -> bool {
    results.iter().all(|r| r.status != CheckStatus::Fail)
}

/// Print the check report. Returns [`all_ok`].
pub fn print_report(results: &[CheckResult]) -> bool {
    println!("{}", "=".repeat(50));
    println!("TRM Setup Verification");
    println!("{}", "=".repeat(50));

    for result in results {
        println!();
        println!("Checking {}...", result.name);
        println!("{} {}", result.symbol(), result.message);
    }

    let passed = results
        .iter()
        .filter(|r| r.status != CheckStatus::Fail)
        .count();
    let total = results.len();

    println!();
    println!("{}", "=".repeat(50));
    if all_ok(results) {
        println!("✅ All checks passed ({}/{})", passed, total);
        println!();
        println!("Setup is complete! Start the server with:");
        println!("  trm-server serve");
        true
    } else {
        println!("⚠️  {}/{} checks passed", passed, total);
        println!();
        println!("Please review the failed checks above.");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TINY_CONFIG: &str = r#"{
        "hidden_size": 32, "num_heads": 4, "seq_len": 16,
        "puzzle_emb_ndim": 32, "num_puzzle_identifiers": 8,
        "h_cycles": 1, "l_cycles": 1, "l_layers": 1,
        "expansion": 2.0, "halt_max_steps": 2
    }"#;

    const ONE_TASK: &str = r#"{
        "aaaa1111": {
            "train": [{"input": [[0]], "output": [[1]]}],
            "test": [{"input": [[0]]}]
        }
    }"#;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create temp file");
        file.write_all(content.as_bytes()).expect("write temp file");
        path
    }

    fn status_of<'a>(results: &'a [CheckResult], name: &str) -> &'a CheckResult {
        results
            .iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("missing check {}", name))
    }

    #[test]
    fn test_healthy_setup_passes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = VerifyOptions {
            model_config: Some(write_file(&dir, "config.json", TINY_CONFIG)),
            checkpoint: None,
            device: DevicePreference::Cpu,
            tasks: write_file(&dir, "tasks.json", ONE_TASK),
        };

        let results = run_checks(&options);
        assert!(all_ok(&results), "results: {:?}", results);
        assert_eq!(results.len(), 6);
        assert_eq!(
            status_of(&results, "Checkpoint").status,
            CheckStatus::Skip
        );
        assert_eq!(status_of(&results, "Inference").status, CheckStatus::Pass);
    }

    #[test]
    fn test_missing_dataset_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = VerifyOptions {
            model_config: Some(write_file(&dir, "config.json", TINY_CONFIG)),
            checkpoint: None,
            device: DevicePreference::Cpu,
            tasks: dir.path().join("missing.json"),
        };

        let results = run_checks(&options);
        assert!(!all_ok(&results));
        assert_eq!(
            status_of(&results, "ARC-AGI Dataset").status,
            CheckStatus::Fail
        );
        // Other checks keep running and passing
        assert_eq!(status_of(&results, "Model Build").status, CheckStatus::Pass);
    }

    #[test]
    fn test_configured_but_missing_checkpoint_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = VerifyOptions {
            model_config: Some(write_file(&dir, "config.json", TINY_CONFIG)),
            checkpoint: Some(dir.path().join("missing.safetensors")),
            device: DevicePreference::Cpu,
            tasks: write_file(&dir, "tasks.json", ONE_TASK),
        };

        let results = run_checks(&options);
        assert_eq!(status_of(&results, "Checkpoint").status, CheckStatus::Fail);
        assert!(!all_ok(&results));
    }

    #[test]
    fn test_invalid_config_skips_dependents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = VerifyOptions {
            model_config: Some(write_file(
                &dir,
                "config.json",
                r#"{"hidden_size": 100, "num_heads": 8}"#,
            )),
            checkpoint: None,
            device: DevicePreference::Cpu,
            tasks: write_file(&dir, "tasks.json", ONE_TASK),
        };

        let results = run_checks(&options);
        assert!(!all_ok(&results));
        assert_eq!(
            status_of(&results, "Model Config").status,
            CheckStatus::Fail
        );
        assert_eq!(status_of(&results, "Model Build").status, CheckStatus::Skip);
        assert_eq!(status_of(&results, "Inference").status, CheckStatus::Skip);
    }
}
