//! `prmoji` service binary.

mod bootstrap_helpers;
mod config;
mod server;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::config::PrmojiConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = PrmojiConfig::parse();
    init_tracing(config.log_level);
    server::run_prmoji_server(config).await
}
