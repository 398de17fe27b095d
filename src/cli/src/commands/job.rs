//! Job commands: submit, list, inspect, cancel and watch jobs.

use anyhow::Result;
use clap::{Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tabled::Tabled;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a training job
    SubmitTraining {
        /// code_review, rag, multi_hop, classification or generation
        #[arg(long)]
        model_type: Option<String>,
        /// Number of epochs, 1-100
        #[arg(long)]
        epochs: Option<u32>,
        /// Batch size, 1-128
        #[arg(long)]
        batch_size: Option<u32>,
        #[arg(long)]
        learning_rate: Option<f64>,
        #[arg(long)]
        optimization_type: Option<OptimizationTypeArg>,
    },

    /// Submit an optimization job
    SubmitOptimization {
        #[arg(long)]
        target_module: Option<String>,
        /// e.g. bootstrap_few_shot, random_search, bayesian_optimization
        #[arg(long)]
        algorithm: Option<String>,
        /// Number of trials, 1-1000
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        metric: Option<String>,
    },

    /// Submit a hyperparameter tuning job
    SubmitTuning {
        #[arg(long)]
        target_model: Option<String>,
        /// Candidate values, e.g. --param learning_rate=0.01,0.001 (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Vec<f64>)>,
        #[arg(long)]
        method: Option<TuningMethodArg>,
        /// Cross-validation folds, 2-20
        #[arg(long)]
        cv_folds: Option<u32>,
        #[arg(long)]
        metric: Option<String>,
        /// Number of trials, 1-1000
        #[arg(long)]
        max_trials: Option<u32>,
    },

    /// List jobs
    List {
        #[arg(short, long)]
        status: Option<StatusFilter>,
        #[arg(short, long)]
        kind: Option<KindFilter>,
    },

    /// Show a job's progress
    Status { job_id: Uuid },

    /// Request cancellation of a job
    Cancel { job_id: Uuid },

    /// Show the result of a completed job
    Result { job_id: Uuid },

    /// Follow a job until it finishes
    Watch {
        job_id: Uuid,
        /// Poll interval in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusFilter {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum KindFilter {
    Training,
    Optimization,
    HyperparameterTuning,
}

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
#[value(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OptimizationTypeArg {
    PromptOptimization,
    WeightOptimization,
    HybridOptimization,
}

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
#[value(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TuningMethodArg {
    GridSearch,
    RandomSearch,
}

/// Parse `name=v1,v2,...` into a grid entry.
fn parse_param(raw: &str) -> std::result::Result<(String, Vec<f64>), String> {
    let (name, values) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=v1,v2,... but got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("parameter name must not be empty".to_string());
    }
    let values = values
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid value '{}' for {}: {}", v, name, e))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((name.to_string(), values))
}

fn query_value<V: ValueEnum>(value: &V) -> Option<String> {
    value.to_possible_value().map(|v| v.get_name().to_string())
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
struct TrainingRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    epochs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    learning_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optimization_type: Option<OptimizationTypeArg>,
}

#[derive(Debug, Default, Serialize)]
struct OptimizationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    target_module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optimization_algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    evaluation_metric: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct TuningRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    target_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hyperparameters: Option<BTreeMap<String, Vec<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tuning_method: Option<TuningMethodArg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cross_validation_folds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    evaluation_metric: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_trials: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
struct SubmitResponse {
    job_id: Uuid,
    status: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct JobSummary {
    job_id: Uuid,
    kind: String,
    label: String,
    status: String,
    current_step: u32,
    total_steps: u32,
    percent: f64,
    best_metric: Option<f64>,
    created_at: String,
}

#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Best")]
    best: String,
    #[tabled(rename = "Created")]
    created_at: String,
}

impl From<JobSummary> for JobRow {
    fn from(job: JobSummary) -> Self {
        Self {
            id: job.job_id.to_string()[..8].to_string(),
            kind: job.kind,
            label: job.label,
            status: job.status,
            progress: format!("{}/{} ({:.0}%)", job.current_step, job.total_steps, job.percent),
            best: fmt_metric(job.best_metric),
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Progress {
    job_id: Uuid,
    kind: String,
    status: String,
    current_step: u32,
    total_steps: u32,
    percent: f64,
    latest_metrics: Option<BTreeMap<String, f64>>,
    best_metric: Option<f64>,
    baseline_metric: Option<f64>,
    elapsed: String,
    cancel_requested: bool,
    error: Option<String>,
}

impl Progress {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "failed" | "cancelled")
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct CancelResponse {
    job_id: Uuid,
    cancelled: bool,
}

#[derive(Debug, Deserialize, Serialize)]
struct Outcome {
    job_id: Uuid,
    kind: String,
    final_metric: Option<f64>,
    baseline_metric: Option<f64>,
    improvement_pct: Option<f64>,
    duration: String,
    steps_completed: u32,
    best_step: Option<u32>,
    #[serde(default)]
    best_parameters: Option<BTreeMap<String, f64>>,
}

fn fmt_metric(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}

fn print_progress(progress: &Progress) {
    output::print_header(&format!("Job: {}", progress.job_id));
    output::print_detail("Kind", &progress.kind);
    output::print_detail("Status", &output::status_colored(&progress.status).to_string());
    output::print_detail(
        "Progress",
        &format!(
            "{}/{} ({:.1}%)",
            progress.current_step, progress.total_steps, progress.percent
        ),
    );
    output::print_detail("Baseline", &fmt_metric(progress.baseline_metric));
    output::print_detail("Best", &fmt_metric(progress.best_metric));
    if let Some(metrics) = &progress.latest_metrics {
        for (name, value) in metrics {
            output::print_detail(name, &format!("{:.4}", value));
        }
    }
    output::print_detail("Elapsed", &progress.elapsed);
    if progress.cancel_requested {
        output::print_detail("Cancel requested", "yes");
    }
    if let Some(error) = &progress.error {
        output::print_detail("Error", error);
    }
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: JobCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        JobCommands::SubmitTraining {
            model_type,
            epochs,
            batch_size,
            learning_rate,
            optimization_type,
        } => {
            let body = TrainingRequest {
                model_type,
                epochs,
                batch_size,
                learning_rate,
                optimization_type,
            };
            let resp: SubmitResponse = client.post("/api/v1/training", &body).await?;
            print_submitted(&resp, "Training", format)?;
        }

        JobCommands::SubmitOptimization {
            target_module,
            algorithm,
            max_iterations,
            metric,
        } => {
            let body = OptimizationRequest {
                target_module,
                optimization_algorithm: algorithm,
                max_iterations,
                evaluation_metric: metric,
            };
            let resp: SubmitResponse = client.post("/api/v1/optimization", &body).await?;
            print_submitted(&resp, "Optimization", format)?;
        }

        JobCommands::SubmitTuning {
            target_model,
            params,
            method,
            cv_folds,
            metric,
            max_trials,
        } => {
            let body = TuningRequest {
                target_model,
                hyperparameters: (!params.is_empty()).then(|| params.into_iter().collect()),
                tuning_method: method,
                cross_validation_folds: cv_folds,
                evaluation_metric: metric,
                max_trials,
            };
            let resp: SubmitResponse = client.post("/api/v1/tuning", &body).await?;
            print_submitted(&resp, "Tuning", format)?;
        }

        JobCommands::List { status, kind } => {
            let mut params = Vec::new();
            if let Some(s) = status.as_ref().and_then(query_value) {
                params.push(format!("status={}", s));
            }
            if let Some(k) = kind.as_ref().and_then(query_value) {
                params.push(format!("kind={}", k));
            }
            let path = if params.is_empty() {
                "/api/v1/jobs".to_string()
            } else {
                format!("/api/v1/jobs?{}", params.join("&"))
            };

            let jobs: Vec<JobSummary> = client.get(&path).await?;
            match format {
                OutputFormat::Table => {
                    let rows: Vec<JobRow> = jobs.into_iter().map(JobRow::from).collect();
                    output::print_list(&rows, format)?;
                }
                _ => output::print_item(&jobs, format)?,
            }
        }

        JobCommands::Status { job_id } => {
            let progress: Progress = client.get(&format!("/api/v1/jobs/{}", job_id)).await?;
            match format {
                OutputFormat::Table => print_progress(&progress),
                _ => output::print_item(&progress, format)?,
            }
        }

        JobCommands::Cancel { job_id } => {
            let resp: CancelResponse = client
                .post_empty(&format!("/api/v1/jobs/{}/cancel", job_id))
                .await?;
            match format {
                OutputFormat::Table if resp.cancelled => {
                    output::print_success(&format!("Cancellation requested for {}", job_id));
                }
                OutputFormat::Table => {
                    output::print_info(&format!(
                        "Job {} is already finished or being cancelled",
                        job_id
                    ));
                }
                _ => output::print_item(&resp, format)?,
            }
        }

        JobCommands::Result { job_id } => {
            let outcome: Outcome = client
                .get(&format!("/api/v1/jobs/{}/result", job_id))
                .await?;
            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Result: {}", outcome.job_id));
                    output::print_detail("Kind", &outcome.kind);
                    output::print_detail("Steps", &outcome.steps_completed.to_string());
                    output::print_detail("Baseline", &fmt_metric(outcome.baseline_metric));
                    output::print_detail("Final", &fmt_metric(outcome.final_metric));
                    if let Some(step) = outcome.best_step {
                        output::print_detail("Best step", &step.to_string());
                    }
                    if let Some(params) = &outcome.best_parameters {
                        for (name, value) in params {
                            output::print_detail(&format!("  {}", name), &value.to_string());
                        }
                    }
                    output::print_detail(
                        "Improvement",
                        &outcome
                            .improvement_pct
                            .map_or_else(|| "-".to_string(), |p| format!("{:+.2}%", p)),
                    );
                    output::print_detail("Duration", &outcome.duration);
                }
                _ => output::print_item(&outcome, format)?,
            }
        }

        JobCommands::Watch {
            job_id,
            interval_ms,
        } => {
            watch(client, job_id, Duration::from_millis(interval_ms.max(50)), format).await?;
        }
    }

    Ok(())
}

fn print_submitted(resp: &SubmitResponse, what: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            output::print_success(&format!("{} job submitted", what));
            output::print_detail("Job ID", &resp.job_id.to_string());
            output::print_detail("Status", &resp.status);
            Ok(())
        }
        _ => output::print_item(resp, format),
    }
}

async fn watch(
    client: &ApiClient,
    job_id: Uuid,
    interval: Duration,
    format: OutputFormat,
) -> Result<()> {
    let path = format!("/api/v1/jobs/{}", job_id);
    let mut progress: Progress = client.get(&path).await?;
    let pb = output::step_progress_bar(u64::from(progress.total_steps))?;

    loop {
        pb.set_position(u64::from(progress.current_step));
        pb.set_message(format!(
            "{} best={}",
            progress.status,
            fmt_metric(progress.best_metric)
        ));
        if progress.is_terminal() {
            break;
        }
        tokio::time::sleep(interval).await;
        progress = client.get(&path).await?;
    }

    pb.finish_with_message(progress.status.clone());
    match format {
        OutputFormat::Table => print_progress(&progress),
        _ => output::print_item(&progress, format)?,
    }
    if progress.status == "failed" {
        anyhow::bail!(
            "job failed: {}",
            progress.error.as_deref().unwrap_or("no error message")
        );
    }
    Ok(())
}
