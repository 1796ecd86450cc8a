use amqp_header_projector::{Config, LogFormat, SharedHealthState, init_logging, run_with_ctrl_c};
use anyhow::{Context, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    init_logging(LogFormat::from_env());

    let config = Config::from_env().context("Failed to load configuration")?;

    run_with_ctrl_c(config, SharedHealthState::default()).await
}
