use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use canary_core::parse_duration;
use canaryd::cli::{Cli, Command, ServeArgs};
use canaryd::{Daemon, Wiring, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Query {
            assignment,
            socket,
            timeout,
        } => {
            let timeout = parse_duration(&timeout)
                .with_context(|| format!("invalid timeout {timeout:?}"))?;
            let input = assignment.unwrap_or_default();
            let placement = canary_server::query(&socket, &input, timeout)
                .await
                .with_context(|| format!("query to {} failed", socket.display()))?;
            println!("{}\n{}", placement.assignment, placement.location);
            Ok(())
        }
        Command::Config(args) => {
            let config = args.load()?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.load()?;
    logging::init(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "canaryd starting");

    let wiring = Wiring::from_config(&config, args.seed)?;
    let daemon = Daemon::start(&config, wiring).await?;

    shutdown_signal().await?;
    info!("shutdown signal received");

    // Leave in-flight requests a bounded amount of time.
    let grace = config.connection_timeout()? + Duration::from_secs(1);
    tokio::time::timeout(grace, daemon.shutdown())
        .await
        .context("shutdown timed out")??;
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("failed to install CTRL+C handler")?,
        _ = term.recv() => {}
    }
    Ok(())
}
