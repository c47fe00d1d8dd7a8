use clap::Parser;
use ksef_client::{config::Config, telemetry};

mod cli;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    telemetry::init_tracing(&config.log.filter);
    tracing::debug!("Loaded configuration: {:?}", config);

    cli::Cli::parse().run(config).await
}
