mod cli;
mod crawler;
mod error;
mod fetch;
mod parse;
mod storage;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = cli::parse_args();
    cli::process_command(cli).await
}
