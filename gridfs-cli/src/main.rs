mod commands;
mod errors;
mod params;

use std::process::ExitCode;

use clap::Parser;
use gridfs_handler::FileStoreClient;
use tracing_subscriber::EnvFilter;

use crate::errors::CliError;
use crate::params::Args;

async fn run(args: Args) -> Result<ExitCode, CliError> {
    let config = args.store_config();
    let mut client = FileStoreClient::connect(&config).await?;

    let result = commands::dispatch(&client, args.command, &mut std::io::stdout()).await;
    client.close().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "gridfs-cli failed");
            ExitCode::FAILURE
        }
    }
}
