//! Running-job registry commands.
//!
//! Provides list, count, prune and status operations per job kind.

use anyhow::Result;
use clap::Subcommand;
use jobgate_core::jobs::JobId;
use serde::Serialize;
use tabled::Tabled;

use crate::context::EngineContext;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum RunningCommands {
    /// List running job ids for a kind, oldest first
    List {
        /// Job kind
        job_kind: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Count running jobs for a kind
    Count {
        /// Job kind
        job_kind: String,
    },

    /// Remove entries for jobs that are known to be dead
    Prune {
        /// Job kind
        job_kind: String,
    },

    /// Check whether a job still has a live status key
    Status {
        /// Job id
        job_id: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct RunningRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Registered")]
    registered_at: String,
    #[tabled(rename = "Age")]
    age: String,
}

pub async fn execute(cmd: RunningCommands, ctx: &EngineContext, format: OutputFormat) -> Result<()> {
    match cmd {
        RunningCommands::List { job_kind, limit } => {
            let registry = ctx.registry(&job_kind);
            let now = ctx.clock.now();
            let rows: Vec<RunningRow> = registry
                .running_ids()
                .await?
                .into_iter()
                .take(limit)
                .map(|job| RunningRow {
                    id: job.id.to_string(),
                    registered_at: job.registered_at.to_rfc3339(),
                    age: output::format_duration(
                        (now - job.registered_at).to_std().unwrap_or_default(),
                    ),
                })
                .collect();

            output::print_list(&rows, format)?;
        }

        RunningCommands::Count { job_kind } => {
            let count = ctx.registry(&job_kind).count().await?;
            match format {
                OutputFormat::Table => println!("{}", count),
                _ => output::print_item(
                    &serde_json::json!({ "job_kind": job_kind, "running": count }),
                    format,
                )?,
            }
        }

        RunningCommands::Prune { job_kind } => {
            let registry = ctx.registry(&job_kind);
            let removed = registry.clean_up().await?;
            let remaining = registry.count().await?;
            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "Removed {} dead entries from {} ({} still running)",
                    removed,
                    registry.key(),
                    remaining
                )),
                _ => output::print_item(
                    &serde_json::json!({
                        "job_kind": job_kind,
                        "removed": removed,
                        "running": remaining,
                    }),
                    format,
                )?,
            }
        }

        RunningCommands::Status { job_id } => {
            let id = JobId::from(job_id);
            let running = ctx.status_tracker().is_running(&id).await?;
            match format {
                OutputFormat::Table => {
                    let state = if running { "running" } else { "not running" };
                    output::print_detail(id.as_str(), state);
                }
                _ => output::print_item(
                    &serde_json::json!({ "job_id": id, "running": running }),
                    format,
                )?,
            }
        }
    }

    Ok(())
}
