//! BlueChat CLI entry point

use anyhow::Context;
use clap::Parser;
use tracing::info;

use bluechat_cli::{ChatApp, Cli, CliAppConfig, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_configuration(&cli)?;
    let app = ChatApp::new(config).context("failed to start session")?;

    match &cli.command {
        Commands::Listen => app.listen().await?,
        Commands::Connect { address } => app
            .connect(address)
            .await
            .with_context(|| format!("chat with {} failed", address))?,
        Commands::Peers => app.list_peers().await?,
    }

    info!("BlueChat exited");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or the default location
fn load_configuration(cli: &Cli) -> anyhow::Result<CliAppConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        CliAppConfig::load_from_file(config_path)
            .with_context(|| format!("invalid configuration file {}", config_path))
    } else {
        Ok(CliAppConfig::load()?)
    }
}
