use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vx_cli::commands::{Cli, Command};
use vx_cli::{build_runtime, EXIT_INTERRUPTED};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match vx_cli::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    };

    let runtime = match build_runtime(config).await {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            eprintln!("error: failed to initialize runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = match cli.command {
        Command::Chat(args) => vx_cli::commands::chat::run(&runtime, args).await,
        Command::Send(args) => vx_cli::commands::send::run(&runtime, args).await,
        Command::Process(args) => vx_cli::commands::process::run(&runtime, args).await,
        Command::Monitor(args) => {
            vx_cli::commands::monitor::run(&runtime, args, cli.verbose).await
        }
        Command::Status(args) => vx_cli::commands::status::run(&runtime, args).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    };

    if let Err(e) = runtime.shutdown().await {
        tracing::error!(error = %e, "runtime shutdown failed");
    }

    match code {
        EXIT_INTERRUPTED => ExitCode::from(130),
        0 => ExitCode::SUCCESS,
        n => ExitCode::from(n as u8),
    }
}

/// Structured log output on stderr; `-v` raises the default level.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}
