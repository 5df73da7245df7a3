//! Binary entry point for the blocker volume plugin.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blocker::{
    BlockerConfig, DriverSettings, Ec2BlockStore, PluginError, PluginHandler, PluginServer,
    PollPolicy, ProcessCommandRunner, VolumeDriver, VolumeError, detect_host_identity,
    shutdown_signal,
};

mod cli;

use cli::{Cli, ServeCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to initialise logging: {0}")]
    Logging(String),
    #[error("host identity unavailable: {0}")]
    Identity(#[from] VolumeError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Serve(command) => serve(command).await,
    }
}

async fn serve(args: ServeCommand) -> Result<(), CliError> {
    let config =
        BlockerConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    init_tracing(&config.log_filter)?;

    let identity = detect_host_identity().await?;

    let store = Arc::new(
        Ec2BlockStore::connect(&identity.region, config.endpoint_url.as_deref()).await,
    );
    let settings = DriverSettings {
        identity,
        layout: config.layout(),
        commands: config.host_commands(),
        poll: PollPolicy::default(),
    };
    let driver = VolumeDriver::new(store, ProcessCommandRunner, settings);
    let handler = PluginHandler::new(Arc::new(driver));

    let socket = resolve_socket(&args, &config);
    info!(%socket, mount_root = %config.mount_root, "starting volume plugin");
    let shutdown = shutdown_signal()?;
    PluginServer::new(socket, handler).serve(shutdown).await?;
    Ok(())
}

fn resolve_socket(args: &ServeCommand, config: &BlockerConfig) -> Utf8PathBuf {
    args.socket
        .as_ref()
        .map_or_else(|| config.socket_path(), Utf8PathBuf::from)
}

fn init_tracing(default_filter: &str) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|err| CliError::Logging(err.to_string()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|err| CliError::Logging(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
