//! Deduplication record commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use jobgate_core::jobs::duplicate::{dedup_key, idempotency_hash};
use serde_json::Value;

use crate::context::EngineContext;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum DedupCommands {
    /// Show the idempotency key for a submission and who owns it
    Key {
        /// Job kind
        job_kind: String,

        /// Job arguments, one JSON value each, e.g. 42 '{"full": true}'
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Delete the dedup record for a submission
    Clear {
        /// Job kind
        job_kind: String,

        /// Job arguments, one JSON value each
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn parse_args(raw: &[String]) -> Result<Vec<Value>> {
    raw.iter()
        .map(|arg| {
            serde_json::from_str(arg)
                .with_context(|| format!("Argument {} is not valid JSON", arg))
        })
        .collect()
}

pub async fn execute(cmd: DedupCommands, ctx: &EngineContext, format: OutputFormat) -> Result<()> {
    match cmd {
        DedupCommands::Key { job_kind, args } => {
            let args = parse_args(&args)?;
            let key = dedup_key(&job_kind, &args);
            let owner = ctx.store.get(&key).await?;
            let ttl = ctx.store.ttl(&key).await?;

            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Dedup record for {}", job_kind));
                    output::print_detail("Hash", &idempotency_hash(&job_kind, &args));
                    output::print_detail("Key", &key);
                    output::print_detail("Owner", owner.as_deref().unwrap_or("-"));
                    output::print_detail(
                        "Expires in",
                        &ttl.map(output::format_duration).unwrap_or_else(|| "-".to_string()),
                    );
                }
                _ => output::print_item(
                    &serde_json::json!({
                        "job_kind": job_kind,
                        "key": key,
                        "owner": owner,
                        "ttl_ms": ttl.map(|t| t.as_millis() as u64),
                    }),
                    format,
                )?,
            }
        }

        DedupCommands::Clear { job_kind, args } => {
            let args = parse_args(&args)?;
            let key = dedup_key(&job_kind, &args);
            let deleted = ctx.store.delete(&key).await?;

            match format {
                OutputFormat::Table if deleted => output::print_success(&format!("Deleted {}", key)),
                OutputFormat::Table => output::print_info(&format!("No record at {}", key)),
                _ => output::print_item(
                    &serde_json::json!({ "key": key, "deleted": deleted }),
                    format,
                )?,
            }
        }
    }

    Ok(())
}
