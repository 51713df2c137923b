//! k6x - Build k6 binaries with extensions
//!
//! `k6x build` produces one binary locally; `k6x service` serves builds
//! over HTTP.

mod cli;
mod error;
mod logging;

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::logging::init_tracing;
use clap::Parser;
use k6x_builder::{CancellationToken, EngineRegistry};
use k6x_config::Config;
use k6x_service::{
    install_panic_hook, BuildService, PassthroughResolver, Server, ServerOptions,
};
use k6x_types::{Modules, Platform};
use std::path::Path;
use std::process;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Main application logic
async fn run(cli: Cli) -> Result<(), CliError> {
    // Precedence: defaults < file < environment < flags
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;
    apply_cli_config(&mut config, &cli);

    init_tracing(cli.global.json, debug_logging(&cli, &config));
    debug!("Starting k6x v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    match cli.command {
        Commands::Build {
            modules,
            platform,
            output,
            ..
        } => {
            build_command(
                &config,
                modules.into(),
                platform.as_ref(),
                &output,
                &shutdown,
            )
            .await
        }
        Commands::Service { .. } => service_command(&config, shutdown).await,
    }
}

/// Fold command line flags into the loaded configuration
fn apply_cli_config(config: &mut Config, cli: &Cli) {
    if cli.global.debug {
        config.build.verbose = true;
    }

    match &cli.command {
        Commands::Build {
            builder, verbose, ..
        } => {
            if !builder.is_empty() {
                config.build.engines.clone_from(builder);
            }
            if *verbose {
                config.build.verbose = true;
            }
        }
        Commands::Service {
            addr,
            filter,
            builder,
        } => {
            if let Some(addr) = addr {
                config.service.addr.clone_from(addr);
            }
            if let Some(filter) = filter {
                config.service.filter.clone_from(filter);
            }
            if !builder.is_empty() {
                config.service.builders.clone_from(builder);
            }
        }
    }
}

/// Container output is drained at debug level, so a verbose build needs it
fn debug_logging(cli: &Cli, config: &Config) -> bool {
    cli.global.debug || config.build.verbose
}

/// Cancel running work on Ctrl-C
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            shutdown.cancel();
        }
    });
}

async fn build_command(
    config: &Config,
    modules: Modules,
    platform: Option<&Platform>,
    output: &Path,
    shutdown: &CancellationToken,
) -> Result<(), CliError> {
    let registry = EngineRegistry::with_defaults(config.build.verbose);
    let builder = registry.select(&config.build.engines).await?;
    info!(engine = %builder.engine(), "Using builder");

    let mut file = tokio::fs::File::create(output)
        .await
        .map_err(|source| CliError::Output {
            path: output.to_path_buf(),
            source,
        })?;

    if let Err(e) = builder.build(shutdown, platform, &modules, &mut file).await {
        drop(file);
        if let Err(remove) = tokio::fs::remove_file(output).await {
            warn!(path = %output.display(), error = %remove, "Failed to remove partial output");
        }
        return Err(e.into());
    }

    make_executable(&file, output).await?;
    info!(path = %output.display(), "k6 binary written");
    Ok(())
}

#[cfg(unix)]
async fn make_executable(file: &tokio::fs::File, output: &Path) -> Result<(), CliError> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|source| CliError::Output {
            path: output.to_path_buf(),
            source,
        })
}

#[cfg(not(unix))]
async fn make_executable(_file: &tokio::fs::File, _output: &Path) -> Result<(), CliError> {
    Ok(())
}

async fn service_command(config: &Config, shutdown: CancellationToken) -> Result<(), CliError> {
    install_panic_hook();

    let registry = EngineRegistry::with_defaults(config.build.verbose);
    let builder = registry.select(&config.service.builders).await?;
    info!(engine = %builder.engine(), "Using builder");

    let service = BuildService::new(PassthroughResolver, builder, config.service.filter.as_str())
        .with_shutdown(shutdown.clone());
    let server = Server::bind(
        &config.service.addr,
        service,
        ServerOptions::from_config(&config.service),
    )
    .await?;

    server.serve(shutdown).await?;
    Ok(())
}
