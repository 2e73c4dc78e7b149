//! Configuration inspection commands.
//!
//! The engine configuration is read from `--config`, `$JOBGATE_CONFIG`, or
//! `<config dir>/jobgate/config.toml` when present, with `JOBGATE__*`
//! variables on top.

use anyhow::Result;
use clap::Subcommand;
use jobgate_core::config::Config;
use std::path::{Path, PathBuf};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective engine configuration
    Show,

    /// Show which configuration file is in use
    Path,

    /// Validate the configuration and report problems
    Check,
}

/// `<config dir>/jobgate/config.toml`, if it exists.
pub fn default_config_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("jobgate").join("config.toml");
    path.exists().then_some(path)
}

pub fn execute(
    cmd: ConfigCommands,
    config: &Config,
    path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        ConfigCommands::Show => match format {
            OutputFormat::Table => {
                output::print_header("Configuration");
                output::print_detail("store.backend", &format!("{:?}", config.store.backend));
                output::print_detail("redis.url", &config.redis.url);
                output::print_detail("redis.key_prefix", &config.redis.key_prefix);
                output::print_detail(
                    "registry.entry_ttl",
                    &output::format_duration(config.registry.entry_ttl),
                );
                output::print_detail(
                    "registry.clean_up_batch_size",
                    &config.registry.clean_up_batch_size.to_string(),
                );
                output::print_detail(
                    "dedup.default_strategy",
                    &format!("{:?}", config.dedup.default_strategy),
                );
                output::print_detail(
                    "dedup.including_scheduled",
                    &config.dedup.including_scheduled.to_string(),
                );
                output::print_detail("dedup.ttl", &output::format_duration(config.dedup.ttl));
                output::print_detail("lease.ttl", &output::format_duration(config.lease.ttl));
                output::print_detail("lease.retries", &config.lease.retries.to_string());
                output::print_detail("status.ttl", &output::format_duration(config.status.ttl));
            }
            _ => output::print_item(config, format)?,
        },

        ConfigCommands::Path => match path {
            Some(path) => println!("{}", path.display()),
            None => output::print_info("No configuration file; using environment and defaults"),
        },

        ConfigCommands::Check => {
            config.validate()?;
            output::print_success("Configuration is valid");
        }
    }

    Ok(())
}
