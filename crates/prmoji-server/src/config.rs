use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use prmoji_runtime::{IgnoredCommenters, RetentionSweeperConfig, DEFAULT_SWEEP_TIMEOUT};
use prmoji_slack::DEFAULT_SLACK_API_BASE;
use tracing::level_filters::LevelFilter;

pub(crate) const SLACK_REQUEST_TIMEOUT_MS: u64 = 10_000;

fn parse_non_blank(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("value must not be empty".to_string());
    }
    Ok(trimmed.to_string())
}

fn parse_non_blank_path(value: &str) -> Result<PathBuf, String> {
    parse_non_blank(value).map(PathBuf::from)
}

fn parse_positive_u32(value: &str) -> Result<u32, String> {
    let parsed = value
        .trim()
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .trim()
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_log_level(value: &str) -> Result<LevelFilter, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" | "warning" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        other => Err(format!(
            "unsupported log level '{other}' (expected debug, info, warn or error)"
        )),
    }
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "prmoji",
    about = "Reacts to Slack messages with emoji as the pull requests they mention change state",
    version
)]
pub(crate) struct PrmojiConfig {
    #[arg(
        long = "slack-token",
        env = "SLACK_TOKEN",
        hide_env_values = true,
        value_parser = parse_non_blank,
        help = "Slack bot token used for reactions.add"
    )]
    pub slack_token: String,

    #[arg(
        long,
        env = "PORT",
        default_value_t = 5000,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "HTTP listen port"
    )]
    pub port: u16,

    #[arg(
        long = "bind-host",
        env = "BIND_HOST",
        default_value = "0.0.0.0",
        help = "HTTP listen address"
    )]
    pub bind_host: IpAddr,

    #[arg(
        long = "log-level",
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = parse_log_level,
        help = "Default log level (debug, info, warn, error); RUST_LOG overrides it"
    )]
    pub log_level: LevelFilter,

    #[arg(
        long = "ignored-commenters",
        env = "IGNORED_COMMENTERS",
        value_delimiter = ',',
        help = "Comma-separated GitHub logins whose comments never produce a reaction"
    )]
    pub ignored_commenters: Vec<String>,

    #[arg(
        long = "retention-days",
        env = "RETENTION_DAYS",
        default_value = "90",
        value_parser = parse_positive_u32,
        help = "Days to keep message mappings before the sweep removes them"
    )]
    pub retention_days: u32,

    #[arg(
        long = "db-path",
        env = "DB_PATH",
        default_value = "./prmoji.db",
        value_parser = parse_non_blank_path,
        help = "SQLite database file"
    )]
    pub db_path: PathBuf,

    #[arg(
        long = "slack-api-base",
        env = "SLACK_API_BASE",
        default_value = DEFAULT_SLACK_API_BASE,
        value_parser = parse_non_blank,
        help = "Slack Web API base URL"
    )]
    pub slack_api_base: String,

    #[arg(
        long = "sweep-interval-hours",
        env = "SWEEP_INTERVAL_HOURS",
        default_value = "24",
        value_parser = parse_positive_u64,
        help = "Hours between periodic retention sweeps"
    )]
    pub sweep_interval_hours: u64,
}

impl PrmojiConfig {
    pub(crate) fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }

    pub(crate) fn ignored_commenters(&self) -> IgnoredCommenters {
        IgnoredCommenters::from_entries(&self.ignored_commenters)
    }

    pub(crate) fn retention_sweeper(&self) -> RetentionSweeperConfig {
        RetentionSweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_hours.saturating_mul(60 * 60)),
            retention_days: self.retention_days,
            run_timeout: DEFAULT_SWEEP_TIMEOUT,
        }
    }
}
