//! Exclusive lease commands.

use anyhow::{bail, Result};
use clap::Subcommand;
use jobgate_core::lease::ExclusiveLease;

use crate::context::EngineContext;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum LeaseCommands {
    /// Show who holds a lease and for how long
    Show {
        /// Lease key
        key: String,
    },

    /// Release a lease
    Release {
        /// Lease key
        key: String,

        /// Release only if this token holds the lease
        #[arg(short, long, conflicts_with = "force")]
        token: Option<String>,

        /// Delete the lease regardless of holder
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn execute(cmd: LeaseCommands, ctx: &EngineContext, format: OutputFormat) -> Result<()> {
    match cmd {
        LeaseCommands::Show { key } => {
            let lease = ExclusiveLease::new(ctx.store.clone(), key.as_str(), ctx.config.lease.ttl)?;
            let holder = lease.holder().await?;
            let ttl = lease.ttl().await?;

            match format {
                OutputFormat::Table => match &holder {
                    Some(token) => {
                        output::print_header(&format!("Lease {}", key));
                        output::print_detail("Holder", token);
                        output::print_detail(
                            "Expires in",
                            &ttl.map(output::format_duration).unwrap_or_else(|| "-".to_string()),
                        );
                    }
                    None => output::print_info(&format!("Lease {} is free", key)),
                },
                _ => output::print_item(
                    &serde_json::json!({
                        "key": key,
                        "holder": holder,
                        "ttl_ms": ttl.map(|t| t.as_millis() as u64),
                    }),
                    format,
                )?,
            }
        }

        LeaseCommands::Release { key, token, force } => {
            let released = match (token, force) {
                (Some(token), _) => ExclusiveLease::cancel(ctx.store.as_ref(), &key, &token).await?,
                (None, true) => {
                    output::print_warning(&format!("Force-releasing {}", key));
                    ctx.store.delete(&key).await?
                }
                (None, false) => bail!("Pass --token <TOKEN> or --force"),
            };

            match format {
                OutputFormat::Table if released => {
                    output::print_success(&format!("Released {}", key))
                }
                OutputFormat::Table => {
                    output::print_info(&format!("{} was not held by that token", key))
                }
                _ => output::print_item(
                    &serde_json::json!({ "key": key, "released": released }),
                    format,
                )?,
            }
        }
    }

    Ok(())
}
