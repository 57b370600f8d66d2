mod cli;
mod config;
mod listener;

use crate::{cli::Args, config::AppConfig, listener::LiveMsgHandler};
use anyhow::{Result, bail};
use blcapi::{BlivechatClient, Dispatcher};
use clap::Parser;
use std::process;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(&args);
    let client_config = config.client_config()?;

    let shutdown = CancellationToken::new();
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();

    let client = BlivechatClient::new(client_config);
    info!(
        room = %client.room_key(),
        "Listening through {}",
        client.config().ws_url
    );
    client.set_handler(Dispatcher::new(LiveMsgHandler::new(
        shutdown.clone(),
        fatal_tx,
    )));
    client.start();

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down");
            shutdown.cancel();
            client.stop_and_release().await;
            Ok(())
        }
        Some(reason) = fatal_rx.recv() => {
            client.release().await;
            bail!("Server refused the client: {}", reason)
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(verbose))
        .init();
}
