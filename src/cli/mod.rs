//! Command-line interface definitions for the `blocker` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `blocker` binary.
#[derive(Debug, Parser)]
#[command(
    name = "blocker",
    about = "Docker volume plugin backed by EBS volumes",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Serve the volume plugin protocol on a Unix socket.
    #[command(name = "serve", about = "Serve the volume plugin protocol on a Unix socket")]
    Serve(ServeCommand),
}

/// Arguments for the `blocker serve` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ServeCommand {
    /// Override the socket path from configuration.
    ///
    /// Docker discovers plugins under `/run/docker/plugins`, so the socket
    /// name there decides the driver name used with `--driver`.
    #[arg(long, value_name = "PATH")]
    pub(crate) socket: Option<String>,
}
