//! Health check command.
//!
//! Queries `/health` and, with `--detailed`, the engine statistics.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Also show pool and job counters
    #[arg(short, long)]
    detailed: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (http_status, health) = client.get_raw("/health").await?;
    let stats: Option<serde_json::Value> = if args.detailed {
        Some(client.get("/api/v1/stats").await?)
    } else {
        None
    };

    match format {
        OutputFormat::Table => {
            let status = health
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            output::print_header("System Health");
            output::print_detail("Status", status);
            output::print_detail("API URL", client.base_url());
            if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
                output::print_detail("Version", version);
            }
            for key in ["jobs_running", "jobs_queued"] {
                if let Some(n) = health.get(key).and_then(|v| v.as_u64()) {
                    output::print_detail(key, &n.to_string());
                }
            }

            if let Some(stats) = &stats {
                output::print_header("Jobs");
                if let Some(jobs) = stats.get("jobs").and_then(|v| v.as_object()) {
                    for (name, count) in jobs {
                        output::print_detail(name, &count.to_string());
                    }
                }
                output::print_header("Pool");
                if let Some(pool) = stats.get("pool").and_then(|v| v.as_object()) {
                    for (name, value) in pool {
                        output::print_detail(name, &value.to_string());
                    }
                }
            }

            if http_status.is_success() {
                output::print_success("Engine is accepting jobs");
            } else {
                output::print_error(&format!("Engine status: {}", status));
            }
        }
        _ => {
            let report = serde_json::json!({
                "health": health,
                "stats": stats,
            });
            output::print_item(&report, format)?;
        }
    }

    Ok(())
}
